use std::time::Duration;

use crate::{
    sources::{
        api_key::ApiKeyAuthenticator, iam::IamAuthenticator, jwt::JwtAuthenticator,
    },
    AccessToken, AuthnError, CacheState,
};

/// One of the supported ways of authenticating, with its cached token
///
/// Callers hold onto the authenticator and ask it for a token every time one
/// is needed. A token is only fetched when none is cached or the cached one
/// has expired.
#[derive(Debug)]
pub enum Authenticator {
    /// Exchanges an API key
    ApiKey(ApiKeyAuthenticator),
    /// Proves an AWS IAM identity
    Iam(IamAuthenticator),
    /// Exchanges a JWT assertion
    Jwt(JwtAuthenticator),
}

macro_rules! dispatch {
    ($self:ident, $auth:ident => $e:expr) => {
        match $self {
            Authenticator::ApiKey($auth) => $e,
            Authenticator::Iam($auth) => $e,
            Authenticator::Jwt($auth) => $e,
        }
    };
}

impl Authenticator {
    /// Gets the current token, fetching a new one if needed
    pub async fn token(&self) -> Result<AccessToken, AuthnError> {
        dispatch!(self, a => a.token().await)
    }

    /// Blocking variant of [`token()`][Self::token()]
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn token_blocking(&self) -> Result<AccessToken, AuthnError> {
        dispatch!(self, a => a.token_blocking())
    }

    /// Re-arms the expiry of the cached token to `timeout` from now
    ///
    /// A zero timeout expires the token immediately.
    pub fn start_token_timer(&self, timeout: Duration) {
        dispatch!(self, a => a.start_token_timer(timeout))
    }

    /// Forgets the cached token
    pub fn invalidate(&self) {
        dispatch!(self, a => a.invalidate())
    }

    /// The state of the token cache
    pub fn state(&self) -> CacheState {
        dispatch!(self, a => a.state())
    }

    /// A short name for the kind of authenticator, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApiKey(_) => "authn",
            Self::Iam(_) => "authn-iam",
            Self::Jwt(_) => "authn-jwt",
        }
    }
}

impl From<ApiKeyAuthenticator> for Authenticator {
    fn from(a: ApiKeyAuthenticator) -> Self {
        Self::ApiKey(a)
    }
}

impl From<IamAuthenticator> for Authenticator {
    fn from(a: IamAuthenticator) -> Self {
        Self::Iam(a)
    }
}

impl From<JwtAuthenticator> for Authenticator {
    fn from(a: JwtAuthenticator) -> Self {
        Self::Jwt(a)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::{engine::general_purpose::STANDARD, Engine};

    use super::*;
    use crate::{
        sources::{
            iam::{IamSource, SessionCredentials, StaticCredentials},
            jwt::{ConstantJwtProvider, JwtSource},
            ApiKeySource, CachedTokenSource,
        },
        transport::mock::MockTransport,
        Account, ApiKey, Jwt, Login, ServiceId,
    };

    const VALIDITY: Duration = Duration::from_secs(450);

    fn all(mock: &MockTransport) -> Vec<Authenticator> {
        let base = "test://example.com/".parse().unwrap();
        let account = Account::from_static("test-account");

        let api_key = ApiKeySource::new(
            Arc::new(mock.clone()),
            &"test://example.com/authn".parse().unwrap(),
            &account,
            &Login::from_static("username"),
            &ApiKey::from_static("api-key"),
        )
        .unwrap();

        let iam = IamSource::new(
            Arc::new(mock.clone()),
            &base,
            "authn-iam/test",
            &account,
            &Login::from_static("somehost"),
            Arc::new(StaticCredentials::new(SessionCredentials::new(
                "AKID", "secret", None,
            ))),
        )
        .unwrap();

        let jwt = JwtSource::new(
            Arc::new(mock.clone()),
            &base,
            &ServiceId::from_static("sid"),
            &account,
            None,
            Arc::new(ConstantJwtProvider::new(Jwt::from_static("jwt"))),
        )
        .unwrap();

        vec![
            CachedTokenSource::new(api_key, VALIDITY).into(),
            CachedTokenSource::new(iam, VALIDITY).into(),
            CachedTokenSource::new(jwt, VALIDITY).into(),
        ]
    }

    fn mock_all(mock: &MockTransport, token: &str) {
        mock.mock(
            "test://example.com/authn/test-account/username/authenticate",
            token.to_owned(),
        );
        mock.mock(
            "test://example.com/authn-iam/test/test-account/somehost/authenticate",
            STANDARD.encode(token),
        );
        mock.mock(
            "test://example.com/authn-jwt/sid/test-account/authenticate",
            token.to_owned(),
        );
    }

    #[test]
    fn every_kind_caches_and_refreshes() {
        let mock = MockTransport::new();
        let authenticators = all(&mock);

        mock_all(&mock, "token1");
        for a in &authenticators {
            assert_eq!(a.state(), CacheState::Empty, "{}", a.kind());
            assert_eq!(a.token_blocking().unwrap().as_str(), "token1", "{}", a.kind());
        }

        mock_all(&mock, "token2");
        for a in &authenticators {
            assert_eq!(a.token_blocking().unwrap().as_str(), "token1", "{}", a.kind());
            a.start_token_timer(Duration::ZERO);
            assert_eq!(a.token_blocking().unwrap().as_str(), "token2", "{}", a.kind());
        }

        mock_all(&mock, "token3");
        for a in &authenticators {
            a.invalidate();
            assert_eq!(a.state(), CacheState::Empty, "{}", a.kind());
            assert_eq!(a.token_blocking().unwrap().as_str(), "token3", "{}", a.kind());
        }
    }

    #[tokio::test]
    async fn async_entry_point_dispatches() {
        let mock = MockTransport::new();
        mock_all(&mock, "token1");

        for a in all(&mock) {
            assert_eq!(a.token().await.unwrap().as_str(), "token1", "{}", a.kind());
            assert_eq!(a.state(), CacheState::Valid);
        }
    }
}
