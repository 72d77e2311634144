//! A token source that exchanges an API key for an access token

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use reqwest::Url;
use zeroize::Zeroizing;

use super::{authenticate_url, private::Sealed, read_token, CachedTokenSource, TokenSource};
use crate::{
    transport::{HttpRequest, HttpTransport},
    AccessToken, AccountRef, ApiKeyRef, AuthnError, Login, LoginRef,
};

/// An API key authenticator with a cached token
pub type ApiKeyAuthenticator<C = conjur_clock::System> = CachedTokenSource<ApiKeySource, C>;

/// Posts an API key to `{authn_url}/{account}/{login}/authenticate`
pub struct ApiKeySource {
    transport: Arc<dyn HttpTransport>,
    url: Url,
    login: Login,
    api_key: Zeroizing<String>,
}

impl fmt::Debug for ApiKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeySource")
            .field("transport", &self.transport)
            .field("url", &self.url)
            .field("login", &self.login)
            .field("api_key", &"***API KEY***")
            .finish()
    }
}

impl ApiKeySource {
    /// Constructs a new API key source
    ///
    /// The login is percent-encoded as a single path segment, so host logins
    /// such as `host/jenkins` are addressed correctly.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        authn_url: &Url,
        account: &AccountRef,
        login: &LoginRef,
        api_key: &ApiKeyRef,
    ) -> Result<Self, AuthnError> {
        let url = authenticate_url(authn_url, [account.as_str(), login.as_str()])?;

        Ok(Self {
            transport,
            url,
            login: login.to_owned(),
            api_key: Zeroizing::new(api_key.as_str().to_owned()),
        })
    }

    /// The URL the API key is posted to
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The login this source authenticates as
    #[inline]
    pub fn login(&self) -> &LoginRef {
        &self.login
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::post(self.url.clone()).with_body("text/plain", self.api_key.as_bytes())
    }
}

impl Sealed for ApiKeySource {}

#[async_trait]
impl TokenSource for ApiKeySource {
    #[tracing::instrument(err, skip(self), fields(url = %self.url, login = %self.login))]
    fn authenticate_blocking(&self) -> Result<AccessToken, AuthnError> {
        tracing::trace!("posting API key");
        read_token(self.transport.send_blocking(self.request())?)
    }

    #[tracing::instrument(err, skip(self), fields(url = %self.url, login = %self.login))]
    async fn authenticate(&self) -> Result<AccessToken, AuthnError> {
        tracing::trace!("posting API key");
        read_token(self.transport.send(self.request()).await?)
    }
}
