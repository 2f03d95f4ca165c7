//! Redirect Handling
//!
//! By default, a `Client` does not follow HTTP redirects. To enable automatic
//! redirect handling with a maximum redirect chain of 10 hops, use a [`Policy`]
//! with [`ClientBuilder::redirect()`](crate::ClientBuilder::redirect).
//!
//! [`RetryFollowUpInterceptor`](crate::engine::interceptor::retry_followup::RetryFollowUpInterceptor)
//! is the only consumer of [`Policy`]: it calls [`Policy::check`] once per
//! redirect response, in place of the teacher's `tower::Service`-wrapping
//! `FollowRedirect` middleware, which has no equivalent here since this
//! engine dispatches through an explicit interceptor chain rather than a
//! `tower::Service` stack.

use std::{borrow::Cow, error::Error as StdError, fmt, sync::Arc};

use futures_util::FutureExt;
use http::{HeaderMap, StatusCode, Uri};

use crate::error::BoxError;

/// A type that controls the policy on how to handle the following of redirects.
///
/// The default value will catch redirect loops, and has a maximum of 10
/// redirects it will follow in a chain before returning an error.
///
/// - `limited` can be used have the same as the default behavior, but adjust the allowed maximum
///   redirect hops in a chain.
/// - `none` can be used to disable all redirect behavior.
/// - `custom` can be used to create a customized policy.
#[derive(Clone)]
pub struct Policy {
    inner: PolicyKind,
}

/// A type that holds information on the next request and previous requests
/// in redirect chain.
#[derive(Debug)]
pub struct Attempt<'a, const PENDING: bool = true> {
    status: StatusCode,
    headers: Cow<'a, HeaderMap>,
    next: Cow<'a, Uri>,
    previous: Cow<'a, [Uri]>,
}

/// An action to perform when a redirect status code is found.
#[derive(Debug)]
pub struct Action {
    inner: ActionKind,
}

#[derive(Debug)]
pub(crate) enum ActionKind {
    Follow,
    Stop,
    Error(BoxError),
    Pending(std::pin::Pin<Box<dyn Future<Output = ActionKind> + Send>>),
}

/// An entry in the redirect history.
#[derive(Debug, Clone)]
pub struct History {
    status: StatusCode,
    uri: Uri,
    previous: Uri,
    headers: HeaderMap,
}

#[derive(Clone)]
enum PolicyKind {
    Custom(Arc<dyn Fn(Attempt) -> Action + Send + Sync + 'static>),
    Limit(usize),
    None,
}

#[derive(Debug)]
struct TooManyRedirects;

// ===== impl Policy =====

impl Policy {
    /// Create a [`Policy`] with a maximum number of redirects.
    ///
    /// An [`Error`](crate::Error) will be returned if the max is reached.
    #[inline]
    pub fn limited(max: usize) -> Self {
        Self {
            inner: PolicyKind::Limit(max),
        }
    }

    /// Create a [`Policy`] that does not follow any redirect.
    #[inline]
    pub fn none() -> Self {
        Self {
            inner: PolicyKind::None,
        }
    }

    /// Create a custom [`Policy`] using the passed function.
    ///
    /// # Note
    ///
    /// The default [`Policy`] handles a maximum loop
    /// chain, but the custom variant does not do that for you automatically.
    /// The custom policy should have some way of handling those.
    ///
    /// Information on the next request and previous requests can be found
    /// on the [`Attempt`] argument passed to the closure.
    ///
    /// Actions can be conveniently created from methods on the
    /// [`Attempt`].
    ///
    /// # Example
    ///
    /// ```rust
    /// # use voyage::{Error, redirect};
    /// #
    /// # fn run() -> Result<(), Error> {
    /// let custom = redirect::Policy::custom(|attempt| {
    ///     if attempt.previous().len() > 5 {
    ///         attempt.error("too many redirects")
    ///     } else if attempt.uri() == "example.domain" {
    ///         // prevent redirects to 'example.domain'
    ///         attempt.stop()
    ///     } else {
    ///         attempt.follow()
    ///     }
    /// });
    /// let client = voyage::Client::builder().redirect(custom).build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[inline]
    pub fn custom<T>(policy: T) -> Self
    where
        T: Fn(Attempt) -> Action + Send + Sync + 'static,
    {
        Self {
            inner: PolicyKind::Custom(Arc::new(policy)),
        }
    }

    /// Apply this policy to a given [`Attempt`] to produce an [`Action`].
    ///
    /// # Note
    ///
    /// This method can be used together with [`Policy::custom()`]
    /// to construct one [`Policy`] that wraps another.
    pub fn redirect(&self, attempt: Attempt) -> Action {
        match self.inner {
            PolicyKind::Custom(ref custom) => custom(attempt),
            PolicyKind::Limit(max) => {
                // `previous` excludes the initial request, so this is the
                // count of redirects already followed in this chain.
                if attempt.previous.len() > max {
                    attempt.error(TooManyRedirects)
                } else {
                    attempt.follow()
                }
            }
            PolicyKind::None => attempt.stop(),
        }
    }

    /// Resolves this policy against a concrete redirect response, awaiting
    /// a [`Attempt::pending`] decision if the policy returned one.
    pub(crate) async fn check(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        next: &Uri,
        previous: &[Uri],
    ) -> Result<bool, BoxError> {
        let action = self.redirect(Attempt {
            status,
            headers: Cow::Borrowed(headers),
            next: Cow::Borrowed(next),
            previous: Cow::Borrowed(previous),
        });

        let mut kind = action.inner;
        loop {
            match kind {
                ActionKind::Follow => return Ok(true),
                ActionKind::Stop => return Ok(false),
                ActionKind::Error(err) => return Err(err),
                ActionKind::Pending(fut) => kind = fut.await,
            }
        }
    }

    /// Whether this policy follows redirects at all.
    pub(crate) fn is_active(&self) -> bool {
        !matches!(self.inner, PolicyKind::None)
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy").field("inner", &self.inner).finish()
    }
}

impl Default for Policy {
    #[inline]
    fn default() -> Policy {
        // Keep `is_active` in sync.
        Policy::limited(10)
    }
}

// ===== impl Attempt =====

impl<'a, const PENDING: bool> Attempt<'a, PENDING> {
    /// Get the type of redirect.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the headers of redirect.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        self.headers.as_ref()
    }

    /// Get the next URI to redirect to.
    #[inline]
    pub fn uri(&self) -> &Uri {
        self.next.as_ref()
    }

    /// Get the list of previous URIs that have already been requested in this chain.
    #[inline]
    pub fn previous(&self) -> &[Uri] {
        self.previous.as_ref()
    }

    /// Returns an action meaning voyage should follow the next URI.
    #[inline]
    pub fn follow(self) -> Action {
        Action {
            inner: ActionKind::Follow,
        }
    }

    /// Returns an action meaning voyage should not follow the next URI.
    ///
    /// The 30x response will be returned as the `Ok` result.
    #[inline]
    pub fn stop(self) -> Action {
        Action {
            inner: ActionKind::Stop,
        }
    }

    /// Returns an [`Action`] failing the redirect with an error.
    ///
    /// The [`Error`](crate::Error) will be returned for the result of the sent request.
    #[inline]
    pub fn error<E: Into<BoxError>>(self, error: E) -> Action {
        Action {
            inner: ActionKind::Error(error.into()),
        }
    }
}

impl<'a> Attempt<'a, true> {
    /// Returns an action meaning voyage should perform the redirect asynchronously.
    ///
    /// The provided async closure receives an owned [`Attempt<'static>`] and should
    /// return an [`Action`] to determine the final redirect behavior.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use voyage::redirect;
    /// #
    /// let policy = redirect::Policy::custom(|attempt| {
    ///     attempt.pending(|attempt| async move {
    ///         // Perform some async operation
    ///         if attempt.uri().host() == Some("trusted.domain") {
    ///             attempt.follow()
    ///         } else {
    ///             attempt.stop()
    ///         }
    ///     })
    /// });
    /// ```
    pub fn pending<F, Fut>(self, task: F) -> Action
    where
        F: FnOnce(Attempt<'static, false>) -> Fut + Send + 'static,
        Fut: Future<Output = Action> + Send + 'static,
    {
        let attempt = Attempt {
            status: self.status,
            headers: Cow::Owned(self.headers().clone()),
            next: Cow::Owned(self.uri().clone()),
            previous: Cow::Owned(self.previous().to_vec()),
        };
        let pending = Box::pin(task(attempt).map(|action| action.inner));
        Action {
            inner: ActionKind::Pending(pending),
        }
    }
}

// ===== impl History =====

impl History {
    /// Get the status code of the redirect response.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the URI of the redirect response.
    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Get the previous URI before the redirect response.
    #[inline]
    pub fn previous(&self) -> &Uri {
        &self.previous
    }

    /// Get the headers of the redirect response.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn new(status: StatusCode, uri: Uri, previous: Uri, headers: HeaderMap) -> Self {
        Self { status, uri, previous, headers }
    }
}

// ===== impl PolicyKind =====

impl fmt::Debug for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PolicyKind::Custom(..) => f.pad("Custom"),
            PolicyKind::Limit(max) => f.debug_tuple("Limit").field(&max).finish(),
            PolicyKind::None => f.pad("None"),
        }
    }
}

// ===== impl TooManyRedirects =====

impl fmt::Display for TooManyRedirects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("too many redirects")
    }
}

impl StdError for TooManyRedirects {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_redirect_policy_limit() {
        let policy = Policy::default();
        let next = Uri::try_from("http://x.y/z").unwrap();
        let mut previous = (0..=9)
            .map(|i| Uri::try_from(&format!("http://a.b/c/{i}")).unwrap())
            .collect::<Vec<_>>();

        assert!(policy.check(StatusCode::FOUND, &HeaderMap::new(), &next, &previous).await.unwrap());

        previous.push(Uri::try_from("http://a.b.d/e/33").unwrap());

        let err = policy.check(StatusCode::FOUND, &HeaderMap::new(), &next, &previous).await.unwrap_err();
        assert!(err.is::<TooManyRedirects>());
    }

    #[tokio::test]
    async fn test_redirect_policy_limit_to_0() {
        let policy = Policy::limited(0);
        let next = Uri::try_from("http://x.y/z").unwrap();
        let previous = vec![Uri::try_from("http://a.b/c").unwrap()];

        let err = policy.check(StatusCode::FOUND, &HeaderMap::new(), &next, &previous).await.unwrap_err();
        assert!(err.is::<TooManyRedirects>());
    }

    #[tokio::test]
    async fn test_redirect_policy_custom() {
        let policy = Policy::custom(|attempt| {
            if attempt.uri().host() == Some("foo") {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let next = Uri::try_from("http://bar/baz").unwrap();
        assert!(policy.check(StatusCode::FOUND, &HeaderMap::new(), &next, &[]).await.unwrap());

        let next = Uri::try_from("http://foo/baz").unwrap();
        assert!(!policy.check(StatusCode::FOUND, &HeaderMap::new(), &next, &[]).await.unwrap());
    }

    #[test]
    fn test_redirect_policy_none_is_inactive() {
        assert!(!Policy::none().is_active());
        assert!(Policy::default().is_active());
    }
}
