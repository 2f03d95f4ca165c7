use std::sync::Arc;

use super::Req;

pub trait Scope: Send + Sync + 'static {
    fn applies_to(&self, req: &Req) -> bool;
}

/// Wraps a closure as a [`Scope`] impl, for the same inference reasons as
/// [`super::classify::ClassifyFn`].
pub struct ScopeFn<F>(pub(crate) F);

impl<F> Scope for ScopeFn<F>
where
    F: Fn(&Req) -> bool + Send + Sync + 'static,
{
    fn applies_to(&self, req: &Req) -> bool {
        (self.0)(req)
    }
}

/// The set of requests a [`crate::retry::Policy`] applies to.
#[derive(Clone)]
pub(crate) enum Scoped {
    /// All requests are eligible.
    Unscoped,
    /// Custom logic decides eligibility.
    Dyn(Arc<dyn Scope>),
}

impl Scoped {
    pub(super) fn applies_to(&self, req: &Req) -> bool {
        match self {
            Scoped::Unscoped => true,
            Scoped::Dyn(s) => s.applies_to(req),
        }
    }
}
