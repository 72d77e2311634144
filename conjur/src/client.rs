use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use conjur_tokens::{
    authorization_header,
    sources::{
        iam::CredentialsProvider, jwt::JwtProvider, ApiKeySource, CachedTokenSource, IamSource,
        JwtSource,
    },
    transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport},
    Account, AccountRef, ApiKey, ApiKeyRef, Authenticator, IamAuthenticator, JwtAuthenticator,
    LoginRef, PasswordRef, ServiceIdRef,
};
use reqwest::header::{self, HeaderValue};
use serde::de::DeserializeOwned;
use url::Url;
use zeroize::Zeroizing;

use crate::{config::TELEMETRY_HEADER, ClientConfig, Error};

/// A client for a single Conjur account
///
/// Cloning a client is cheap. Clones share the HTTP transport, the
/// configuration and the authenticator, and with it the cached access token.
#[derive(Clone, Debug)]
pub struct Client {
    base: Url,
    account: Account,
    transport: Arc<dyn HttpTransport>,
    config: Arc<ClientConfig>,
    authenticator: Option<Arc<Authenticator>>,
    acting_as: Option<String>,
}

impl Client {
    /// Constructs an unauthenticated client with the default configuration
    pub fn new(base_url: &str, account: impl Into<Account>) -> Result<Self, Error> {
        Self::with_config(base_url, account, ClientConfig::default())
    }

    /// Constructs an unauthenticated client
    pub fn with_config(
        base_url: &str,
        account: impl Into<Account>,
        config: ClientConfig,
    ) -> Result<Self, Error> {
        let transport = ReqwestTransport::with_options(config.transport_options())?;
        Self::with_transport(base_url, account, config, Arc::new(transport))
    }

    /// Constructs an unauthenticated client that sends its requests through
    /// `transport`
    pub fn with_transport(
        base_url: &str,
        account: impl Into<Account>,
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, Error> {
        Ok(Self {
            base: normalize_base(base_url)?,
            account: account.into(),
            transport,
            config: Arc::new(config),
            authenticator: None,
            acting_as: None,
        })
    }

    /// The normalized base URL, which always ends in `/`
    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// The account this client works with
    #[inline]
    pub fn account(&self) -> &AccountRef {
        &self.account
    }

    /// The client configuration
    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The transport requests are sent through
    #[inline]
    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// The installed authenticator, if any
    #[inline]
    pub fn authenticator(&self) -> Option<&Arc<Authenticator>> {
        self.authenticator.as_ref()
    }

    /// The role this client impersonates, if any
    #[inline]
    pub fn acting_as_role(&self) -> Option<&str> {
        self.acting_as.as_deref()
    }

    /// Installs the authenticator used for every authenticated request
    ///
    /// Replaces any previous authenticator, and with it the cached token.
    pub fn set_authenticator(&mut self, authenticator: impl Into<Authenticator>) {
        let authenticator = authenticator.into();
        tracing::debug!(kind = authenticator.kind(), "installing authenticator");
        self.authenticator = Some(Arc::new(authenticator));
    }

    /// Installs an API key authenticator for `login`
    pub fn set_credentials(&mut self, login: &LoginRef, api_key: &ApiKeyRef) -> Result<(), Error> {
        let source = ApiKeySource::new(
            Arc::clone(&self.transport),
            &self.endpoint(["authn"]),
            &self.account,
            login,
            api_key,
        )?;
        self.set_authenticator(self.cached(source));
        Ok(())
    }

    /// Wraps a token source in a cache using the configured token validity
    pub fn cached<S>(&self, source: S) -> CachedTokenSource<S> {
        CachedTokenSource::new(source, self.config.token_refresh_timeout())
    }

    /// Constructs an AWS IAM authenticator against this client's server
    ///
    /// `authenticator` names the authenticator instance, such as
    /// `authn-iam/prod`. Use [`IamSource`] directly to sign for a region other
    /// than the default.
    pub fn iam_authenticator(
        &self,
        authenticator: &str,
        identity: &LoginRef,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Result<IamAuthenticator, Error> {
        let source = IamSource::new(
            Arc::clone(&self.transport),
            &self.base,
            authenticator,
            &self.account,
            identity,
            credentials,
        )?;
        Ok(self.cached(source))
    }

    /// Constructs a JWT authenticator against this client's server
    pub fn jwt_authenticator(
        &self,
        service_id: &ServiceIdRef,
        host_id: Option<&LoginRef>,
        provider: Arc<dyn JwtProvider>,
    ) -> Result<JwtAuthenticator, Error> {
        let source = JwtSource::new(
            Arc::clone(&self.transport),
            &self.base,
            service_id,
            &self.account,
            host_id,
            provider,
        )?;
        Ok(self.cached(source))
    }

    /// Exchanges a password for an API key and authenticates with it
    ///
    /// The returned API key is also installed through
    /// [`set_credentials()`][Self::set_credentials()].
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn log_in(&mut self, login: &LoginRef, password: &PasswordRef) -> Result<ApiKey, Error> {
        let response = self.send(self.login_request(login, password))?;
        let api_key = ApiKey::new(response.text()?);
        self.set_credentials(login, &api_key)?;
        Ok(api_key)
    }

    /// Asynchronous variant of [`log_in()`][Self::log_in()]
    pub async fn log_in_async(
        &mut self,
        login: &LoginRef,
        password: &PasswordRef,
    ) -> Result<ApiKey, Error> {
        let response = self
            .send_async(self.login_request(login, password))
            .await?;
        let api_key = ApiKey::new(response.text()?);
        self.set_credentials(login, &api_key)?;
        Ok(api_key)
    }

    fn login_request(&self, login: &LoginRef, password: &PasswordRef) -> HttpRequest {
        let credentials = Zeroizing::new(format!("{}:{}", login.as_str(), password.as_str()));
        let encoded = Zeroizing::new(format!("Basic {}", STANDARD.encode(credentials.as_bytes())));
        let mut value = HeaderValue::try_from(encoded.as_str()).expect("only valid header bytes");
        value.set_sensitive(true);

        tracing::debug!(login = %login, "logging in");
        HttpRequest::get(self.endpoint(["authn", self.account.as_str(), "login"]))
            .with_header(header::AUTHORIZATION, value)
    }

    /// A new client that performs every authenticated request as `role`
    ///
    /// The new client shares this client's authenticator and transport.
    pub fn acting_as(&self, role: impl Into<String>) -> Self {
        Self {
            acting_as: Some(role.into()),
            ..self.clone()
        }
    }

    /// Builds a URL from the base URL and `segments`
    ///
    /// Each segment is percent-encoded, so identifiers containing `/` are
    /// addressed as a single segment.
    pub fn endpoint<I>(&self, segments: I) -> Url
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut url = self.base.clone();
        url.set_query(None);
        url.path_segments_mut()
            .expect("base URL was checked on construction")
            .pop_if_empty()
            .extend(segments);
        url
    }

    /// Builds an unauthenticated `GET` request to `{base}{path}`
    ///
    /// `path` is relative to the base URL and must already be encoded. It may
    /// carry a query.
    pub fn request(&self, path: &str) -> Result<HttpRequest, Error> {
        Ok(HttpRequest::get(self.base.join(path)?))
    }

    /// Builds an authenticated `GET` request to `{base}{path}`
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn authenticated_request(&self, path: &str) -> Result<HttpRequest, Error> {
        self.authenticate(self.request(path)?)
    }

    /// Asynchronous variant of
    /// [`authenticated_request()`][Self::authenticated_request()]
    pub async fn authenticated_request_async(&self, path: &str) -> Result<HttpRequest, Error> {
        self.authenticate_async(self.request(path)?).await
    }

    /// Authorizes `request` with the current access token
    ///
    /// When impersonating, `acting_as={role}` is appended to the query. Fails
    /// with [`Error::AuthenticationRequired`] if no authenticator is installed.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn authenticate(&self, mut request: HttpRequest) -> Result<HttpRequest, Error> {
        let authenticator = self.require_authenticator()?;
        self.impersonate(&mut request);
        let token = authenticator.token_blocking()?;
        Ok(request.with_header(header::AUTHORIZATION, authorization_header(&token)))
    }

    /// Asynchronous variant of [`authenticate()`][Self::authenticate()]
    pub async fn authenticate_async(&self, mut request: HttpRequest) -> Result<HttpRequest, Error> {
        let authenticator = self.require_authenticator()?;
        self.impersonate(&mut request);
        let token = authenticator.token().await?;
        Ok(request.with_header(header::AUTHORIZATION, authorization_header(&token)))
    }

    fn require_authenticator(&self) -> Result<&Authenticator, Error> {
        self.authenticator
            .as_deref()
            .ok_or(Error::AuthenticationRequired)
    }

    fn impersonate(&self, request: &mut HttpRequest) {
        if let Some(role) = &self.acting_as {
            request
                .url_mut()
                .query_pairs_mut()
                .append_pair("acting_as", role);
        }
    }

    fn decorate(&self, request: HttpRequest) -> HttpRequest {
        tracing::debug!(method = %request.method(), url = %request.url(), "sending request");
        request.with_header(
            TELEMETRY_HEADER,
            self.config.integration().telemetry_header().clone(),
        )
    }

    /// Sends a request and returns the response, whatever its status
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        Ok(self.transport.send_blocking(self.decorate(request))?)
    }

    /// Asynchronous variant of [`exchange()`][Self::exchange()]
    pub async fn exchange_async(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        Ok(self.transport.send(self.decorate(request)).await?)
    }

    /// Sends a request, turning a non-success status into an error
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn send(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        Ok(self.exchange(request)?.error_for_status()?)
    }

    /// Asynchronous variant of [`send()`][Self::send()]
    pub async fn send_async(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        Ok(self.exchange_async(request).await?.error_for_status()?)
    }

    pub(crate) fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        let response = self.send(self.authenticate(HttpRequest::get(url))?)?;
        Ok(serde_json::from_slice(response.body())?)
    }

    pub(crate) async fn get_json_async<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        let request = self.authenticate_async(HttpRequest::get(url)).await?;
        let response = self.send_async(request).await?;
        Ok(serde_json::from_slice(response.body())?)
    }
}

/// Collapses repeated slashes in the path and ensures a trailing slash
fn normalize_base(base: &str) -> Result<Url, Error> {
    let mut url = Url::parse(base)?;
    if url.cannot_be_a_base() {
        return Err(Error::CannotBeABase { url });
    }

    let path = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(String::from("/"), |mut path, segment| {
            path.push_str(segment);
            path.push('/');
            path
        });
    url.set_path(&path);

    Ok(url)
}
