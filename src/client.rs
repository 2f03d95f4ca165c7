mod body;
mod http;
pub mod layer;
pub mod middleware;
mod request;
mod response;
mod upgrade;

pub use self::{
    body::Body,
    http::{Client, ClientBuilder},
    request::{Request, RequestBuilder},
    response::Response,
    upgrade::Upgraded,
};
