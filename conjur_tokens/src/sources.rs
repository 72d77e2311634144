//! Token sources
//!
//! A token source knows how to obtain a fresh token from the remote
//! authentication endpoint. [`CachedTokenSource`] combines a source with a
//! [`TokenCache`] so that fetches only happen when the cached token is no
//! longer valid.
//!
//! The set of sources is closed; see [`Authenticator`][crate::Authenticator].

use std::time::Duration;

use async_trait::async_trait;
use conjur_clock::{Clock, System};
use reqwest::Url;

use crate::{
    cache::{CacheState, TokenCache},
    transport::HttpResponse,
    AccessToken, AuthnError,
};

pub mod api_key;
pub mod iam;
pub mod jwt;

pub use api_key::ApiKeySource;
pub use iam::IamSource;
pub use jwt::JwtSource;

mod private {
    pub trait Sealed {}
}

/// A way of obtaining a fresh token from the authentication endpoint
///
/// This trait is sealed and cannot be implemented outside of this crate.
#[async_trait]
pub trait TokenSource: private::Sealed + Send + Sync {
    /// Requests a new token, blocking the current thread
    fn authenticate_blocking(&self) -> Result<AccessToken, AuthnError>;

    /// Requests a new token asynchronously
    async fn authenticate(&self) -> Result<AccessToken, AuthnError>;
}

/// A token source fronted by a single-slot cache
#[derive(Debug)]
pub struct CachedTokenSource<S, C = System> {
    source: S,
    cache: TokenCache<C>,
}

impl<S> CachedTokenSource<S, System> {
    /// Constructs a new cached token source whose tokens are valid for `validity`
    pub fn new(source: S, validity: Duration) -> Self {
        Self {
            source,
            cache: TokenCache::new(validity),
        }
    }
}

impl<S, C> CachedTokenSource<S, C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> CachedTokenSource<S, D> {
        CachedTokenSource {
            source: self.source,
            cache: self.cache.with_clock(clock),
        }
    }

    /// The underlying token source
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The cache in front of the token source
    #[inline]
    pub fn cache(&self) -> &TokenCache<C> {
        &self.cache
    }

    /// Clears the cached token
    pub fn invalidate(&self) {
        self.cache.invalidate()
    }
}

impl<S, C> CachedTokenSource<S, C>
where
    S: TokenSource,
    C: Clock + Send + Sync,
{
    /// Gets the current token, fetching a new one if the cached one is no longer valid
    pub async fn token(&self) -> Result<AccessToken, AuthnError> {
        self.cache.get_or_fetch(|| self.source.authenticate()).await
    }

    /// Blocking variant of [`token()`][Self::token()]
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn token_blocking(&self) -> Result<AccessToken, AuthnError> {
        self.cache
            .get_or_fetch_blocking(|| self.source.authenticate_blocking())
    }

    /// Re-arms the refresh timer of the cached token to fire after `timeout`
    pub fn start_token_timer(&self, timeout: Duration) {
        self.cache.start_timer(timeout)
    }

    /// The current state of the cache
    pub fn state(&self) -> CacheState {
        self.cache.state()
    }
}

/// Appends `segments` and a final `authenticate` segment to `base`
pub(crate) fn authenticate_url<I>(base: &Url, segments: I) -> Result<Url, AuthnError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| AuthnError::CannotBeABase { url: base.clone() })?
        .pop_if_empty()
        .extend(segments)
        .push("authenticate");
    Ok(url)
}

/// Reads a verbatim token from an authentication response
pub(crate) fn read_token(response: HttpResponse) -> Result<AccessToken, AuthnError> {
    let token = response
        .error_for_status()?
        .text()
        .map_err(AuthnError::TokenNotUtf8)?;
    Ok(AccessToken::new(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_url_encodes_segments() {
        let base: Url = "test:///authn".parse().unwrap();
        let url = authenticate_url(&base, ["test-account", "host/jenkins"]).unwrap();
        assert_eq!(
            url.as_str(),
            "test:///authn/test-account/host%2Fjenkins/authenticate"
        );
    }

    #[test]
    fn authenticate_url_ignores_trailing_slash() {
        let base: Url = "https://conjur.example.com/".parse().unwrap();
        let url = authenticate_url(&base, ["authn-jwt", "sid", "acct"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://conjur.example.com/authn-jwt/sid/acct/authenticate"
        );
    }

    #[test]
    fn authenticate_url_rejects_cannot_be_a_base() {
        let base: Url = "mailto:someone@example.com".parse().unwrap();
        let err = authenticate_url(&base, ["x"]).unwrap_err();
        assert!(matches!(err, AuthnError::CannotBeABase { .. }));
    }
}
