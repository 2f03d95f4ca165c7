use std::{error::Error as StdError, sync::Arc};

use http::{Method, StatusCode, Uri};

use super::Req;
use crate::error::BoxError;

pub trait Classify: Send + Sync + 'static {
    fn classify(&self, req_rep: ReqRep<'_>) -> Action;
}

/// Wraps a closure as a [`Classify`] impl.
///
/// A blanket impl over any `Fn(ReqRep) -> Action` would be more convenient,
/// but breaks inference at call sites; every closure would need an explicit
/// `ReqRep` argument type.
pub struct ClassifyFn<F>(pub(crate) F);

impl<F> Classify for ClassifyFn<F>
where
    F: Fn(ReqRep<'_>) -> Action + Send + Sync + 'static,
{
    fn classify(&self, req_rep: ReqRep<'_>) -> Action {
        (self.0)(req_rep)
    }
}

/// A request paired with its outcome, handed to a [`Classify`] implementation.
#[derive(Debug)]
pub struct ReqRep<'a>(&'a Req, Result<StatusCode, &'a BoxError>);

impl ReqRep<'_> {
    /// The HTTP method of the request.
    pub fn method(&self) -> &Method {
        self.0.method()
    }

    /// The URI of the request.
    pub fn uri(&self) -> &Uri {
        self.0.uri()
    }

    /// The response status, if the request did not error.
    pub fn status(&self) -> Option<StatusCode> {
        self.1.ok()
    }

    /// The error the request failed with, if any.
    pub fn error(&self) -> Option<&(dyn StdError + 'static)> {
        self.1.as_ref().err().map(|&e| &**e as _)
    }

    /// Mark this request/response pair as retryable.
    pub fn retryable(self) -> Action {
        Action::Retryable
    }

    /// Mark this request/response pair as not needing a retry.
    pub fn success(self) -> Action {
        Action::Success
    }
}

/// The verdict a [`Classify`] reaches for one request/response pair.
#[must_use]
pub enum Action {
    /// The response is final; don't retry.
    Success,
    /// The request failed in a way that's safe to retry.
    Retryable,
}

/// How a [`crate::retry::Policy`] decides whether an outcome is retryable.
#[derive(Clone)]
pub(crate) enum Classifier {
    /// Never retry.
    Never,
    /// Retry protocol-level nacks (HTTP/2 REFUSED_STREAM, graceful GOAWAY).
    ProtocolNacks,
    /// Defer to user-supplied logic.
    Dyn(Arc<dyn Classify>),
}

impl Classifier {
    pub(super) fn classify(&self, req: &Req, outcome: Result<StatusCode, &BoxError>) -> Action {
        let req_rep = ReqRep(req, outcome);
        match self {
            Classifier::Never => Action::Success,
            Classifier::ProtocolNacks => {
                if req_rep.error().map(is_retryable_error).unwrap_or(false) {
                    Action::Retryable
                } else {
                    Action::Success
                }
            }
            Classifier::Dyn(c) => c.classify(req_rep),
        }
    }
}

/// Whether a transport error is a known-safe-to-retry HTTP/2 protocol nack.
fn is_retryable_error(err: &(dyn StdError + 'static)) -> bool {
    let Some(cause) = err.source() else {
        return false;
    };

    if let Some(err) = cause.downcast_ref::<h2::Error>() {
        // Graceful shutdown: the peer is done with the connection, not the request.
        if err.is_go_away() && err.is_remote() && err.reason() == Some(h2::Reason::NO_ERROR) {
            return true;
        }

        // https://www.rfc-editor.org/rfc/rfc9113.html#section-8.7-3.2
        if err.is_reset() && err.is_remote() && err.reason() == Some(h2::Reason::REFUSED_STREAM) {
            return true;
        }
    }
    false
}
