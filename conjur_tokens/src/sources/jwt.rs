//! A token source that exchanges a JWT assertion for an access token

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;

use super::{authenticate_url, private::Sealed, read_token, CachedTokenSource, TokenSource};
use crate::{
    transport::{HttpRequest, HttpTransport},
    AccessToken, AccountRef, AuthnError, JwtRef, LoginRef, ServiceIdRef,
};

mod providers;

pub use providers::{
    ConstantJwtProvider, FileJwtProvider, FnJwtProvider, JwtProvider, JwtProviderError,
    K8S_JWT_PATH,
};

/// A JWT authenticator with a cached token
pub type JwtAuthenticator<C = conjur_clock::System> = CachedTokenSource<JwtSource, C>;

/// Posts `jwt={assertion}` to
/// `{url}/authn-jwt/{service_id}/{account}[/{host_id}]/authenticate`
#[derive(Debug)]
pub struct JwtSource {
    transport: Arc<dyn HttpTransport>,
    url: Url,
    provider: Arc<dyn JwtProvider>,
}

impl JwtSource {
    /// Constructs a new JWT source
    ///
    /// Without a host ID, the authenticator derives the identity from the
    /// assertion's claims.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        url: &Url,
        service_id: &ServiceIdRef,
        account: &AccountRef,
        host_id: Option<&LoginRef>,
        provider: Arc<dyn JwtProvider>,
    ) -> Result<Self, AuthnError> {
        let segments = ["authn-jwt", service_id.as_str(), account.as_str()]
            .into_iter()
            .chain(host_id.map(LoginRef::as_str));
        let url = authenticate_url(url, segments)?;

        Ok(Self {
            transport,
            url,
            provider,
        })
    }

    /// The URL the assertion is posted to
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn request(&self, jwt: &JwtRef) -> HttpRequest {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("jwt", jwt.as_str())
            .finish();
        HttpRequest::post(self.url.clone()).with_body("application/x-www-form-urlencoded", form)
    }
}

impl Sealed for JwtSource {}

#[async_trait]
impl TokenSource for JwtSource {
    #[tracing::instrument(err, skip(self), fields(url = %self.url))]
    fn authenticate_blocking(&self) -> Result<AccessToken, AuthnError> {
        let jwt = self.provider.jwt_blocking()?;
        tracing::trace!("posting JWT assertion");
        read_token(self.transport.send_blocking(self.request(&jwt))?)
    }

    #[tracing::instrument(err, skip(self), fields(url = %self.url))]
    async fn authenticate(&self) -> Result<AccessToken, AuthnError> {
        let jwt = self.provider.jwt().await?;
        tracing::trace!("posting JWT assertion");
        read_token(self.transport.send(self.request(&jwt)).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    use reqwest::StatusCode;

    use super::*;
    use crate::{transport::mock::MockTransport, Account, CacheState, Jwt, Login, ServiceId};

    const WITH_HOST: &str = "test://example.com/authn-jwt/sid/test-account/hid/authenticate";
    const WITHOUT_HOST: &str = "test://example.com/authn-jwt/sid/test-account/authenticate";

    fn authenticator(mock: &MockTransport, host_id: Option<&str>) -> JwtAuthenticator {
        let host_id = host_id.map(Login::from);
        let source = JwtSource::new(
            Arc::new(mock.clone()),
            &"test://example.com/".parse().unwrap(),
            &ServiceId::from_static("sid"),
            &Account::from_static("test-account"),
            host_id.as_deref(),
            Arc::new(ConstantJwtProvider::new(Jwt::from_static(
                "this is a nice provider",
            ))),
        )
        .unwrap();

        CachedTokenSource::new(source, Duration::from_secs(450))
    }

    fn jwt_form(req: &HttpRequest) -> Result<(), StatusCode> {
        let well_formed = req.method() == reqwest::Method::POST
            && req.headers()[reqwest::header::CONTENT_TYPE] == "application/x-www-form-urlencoded"
            && req.body() == Some(&b"jwt=this+is+a+nice+provider"[..]);
        well_formed.then_some(()).ok_or(StatusCode::BAD_REQUEST)
    }

    fn expire(authenticator: &JwtAuthenticator) {
        authenticator.start_token_timer(Duration::from_millis(1));
        thread::sleep(Duration::from_millis(20));
    }

    #[test]
    fn url_includes_host_id_when_given() {
        let mock = MockTransport::new();
        assert_eq!(
            authenticator(&mock, Some("hid")).source().url().as_str(),
            WITH_HOST
        );
        assert_eq!(
            authenticator(&mock, None).source().url().as_str(),
            WITHOUT_HOST
        );
    }

    #[tokio::test]
    async fn without_host_id() {
        let mock = MockTransport::new();
        let authenticator = authenticator(&mock, None);

        mock.mock(WITHOUT_HOST, "token1").with_verifier(jwt_form);
        assert_eq!(authenticator.token().await.unwrap().as_str(), "token1");

        authenticator.start_token_timer(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(20)).await;

        mock.mock(WITHOUT_HOST, "token2").with_verifier(jwt_form);
        assert_eq!(authenticator.token().await.unwrap().as_str(), "token2");
    }

    #[test]
    fn token_is_cached_until_expiry() {
        let mock = MockTransport::new();
        let authenticator = authenticator(&mock, Some("hid"));

        mock.mock(WITH_HOST, "token1").with_verifier(jwt_form);
        assert_eq!(authenticator.token_blocking().unwrap().as_str(), "token1");

        mock.mock(WITH_HOST, "token2").with_verifier(jwt_form);
        assert_eq!(authenticator.token_blocking().unwrap().as_str(), "token1");

        expire(&authenticator);
        assert_eq!(authenticator.token_blocking().unwrap().as_str(), "token2");
    }

    #[test]
    fn threads_share_one_authentication() {
        let mock = MockTransport::new();
        let authenticator = Arc::new(authenticator(&mock, Some("hid")));
        let count = Arc::new(AtomicUsize::new(0));

        let counting = |count: &Arc<AtomicUsize>| {
            let count = Arc::clone(count);
            move |req: &HttpRequest| -> Result<(), StatusCode> {
                jwt_form(req)?;
                thread::sleep(Duration::from_millis(10));
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };

        mock.mock(WITH_HOST, "token1").with_verifier(counting(&count));
        assert_eq!(authenticator.token_blocking().unwrap().as_str(), "token1");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let two_threads = |expected: &'static str| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let authenticator = Arc::clone(&authenticator);
                    thread::spawn(move || authenticator.token_blocking().unwrap())
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap().as_str(), expected);
            }
        };

        mock.mock(WITH_HOST, "token1").with_verifier(counting(&count));
        two_threads("token1");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        expire(&authenticator);
        mock.mock(WITH_HOST, "token2").with_verifier(counting(&count));
        two_threads("token2");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(authenticator.state(), CacheState::Valid);
    }

    #[test]
    fn provider_failure_sends_nothing() {
        let mock = MockTransport::new();
        let source = JwtSource::new(
            Arc::new(mock.clone()),
            &"test://example.com/".parse().unwrap(),
            &ServiceId::from_static("sid"),
            &Account::from_static("test-account"),
            None,
            Arc::new(FileJwtProvider::new("/definitely/not/here.token")),
        )
        .unwrap();

        let err = source.authenticate_blocking().unwrap_err();

        assert!(matches!(err, AuthnError::JwtProvider(_)));
        assert!(mock.requests().is_empty());
    }
}
