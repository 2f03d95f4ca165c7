//! Classification and scoping types backing [`crate::retry::Policy`].
//!
//! The policy itself only carries configuration; the actual retry loop lives
//! in [`crate::engine::interceptor::retry_followup`], which consults its own
//! fixed transport-error/status classification. These types are the ones a
//! caller builds a custom [`crate::retry::Policy`] out of.

mod classify;
mod policy;
mod scope;

pub(crate) use self::{
    classify::{Action, Classifier, ClassifyFn, ReqRep},
    policy::RetryPolicy,
    scope::{ScopeFn, Scoped},
};

pub(crate) type Req = http::Request<crate::client::Body>;
