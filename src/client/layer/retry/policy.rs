use std::{sync::Arc, time::Duration};

use http::StatusCode;
use tower::retry::{
    Policy,
    budget::{Budget, TpsBudget},
};

use super::{Action, Classifier, Req, Scoped};
use crate::{error::BoxError, retry};

/// Drives [`tower::retry::Retry`] from a [`retry::Policy`].
#[derive(Clone)]
pub(crate) struct RetryPolicy {
    budget: Option<Arc<TpsBudget>>,
    classifier: Classifier,
    max_retries_per_request: u32,
    retry_cnt: u32,
    scope: Scoped,
}

impl RetryPolicy {
    pub(crate) fn new(policy: retry::Policy) -> Self {
        Self {
            budget: policy
                .budget
                .map(|extra_percent| Arc::new(TpsBudget::new(Duration::from_secs(10), 10, extra_percent))),
            classifier: policy.classifier,
            max_retries_per_request: policy.max_retries_per_request,
            retry_cnt: 0,
            scope: policy.scope,
        }
    }
}

impl<ResBody> Policy<Req, http::Response<ResBody>, BoxError> for RetryPolicy {
    type Future = std::future::Ready<()>;

    fn retry(
        &mut self,
        req: &mut Req,
        result: &mut Result<http::Response<ResBody>, BoxError>,
    ) -> Option<Self::Future> {
        let outcome: Result<StatusCode, &BoxError> = result.as_ref().map(|res| res.status());

        match self.classifier.classify(req, outcome) {
            Action::Success => {
                if let Some(ref budget) = self.budget {
                    budget.deposit();
                }
                None
            }
            Action::Retryable => {
                if self.budget.as_ref().map(|b| b.withdraw()).unwrap_or(true) {
                    self.retry_cnt += 1;
                    Some(std::future::ready(()))
                } else {
                    None
                }
            }
        }
    }

    fn clone_request(&mut self, req: &Req) -> Option<Req> {
        if self.retry_cnt > 0 && !self.scope.applies_to(req) {
            return None;
        }

        if self.retry_cnt >= self.max_retries_per_request {
            return None;
        }

        let body = req.body().try_clone()?;
        let mut new = http::Request::new(body);
        *new.method_mut() = req.method().clone();
        *new.uri_mut() = req.uri().clone();
        *new.version_mut() = req.version();
        *new.headers_mut() = req.headers().clone();
        *new.extensions_mut() = req.extensions().clone();

        Some(new)
    }
}
