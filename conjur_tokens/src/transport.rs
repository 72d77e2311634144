//! The HTTP seam between authenticators and the network
//!
//! Authenticators never talk to `reqwest` directly. They build an
//! [`HttpRequest`] and hand it to an [`HttpTransport`], which allows a single
//! connection pool to be shared by every authenticator built from one client,
//! and allows tests to substitute an in-process transport.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode, Url,
};
use thiserror::Error;

#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod mock;

/// An outgoing HTTP request
#[derive(Clone, Debug)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Constructs a new request without headers or body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Constructs a new `GET` request
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Constructs a new `POST` request
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Replaces the request method
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets a header, replacing any existing value
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body and its content type
    pub fn with_body(mut self, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.body = Some(body.into());
        self
    }

    /// The request method
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request URL
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Mutable access to the request URL
    #[inline]
    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    /// The request headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the request headers
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The request body, if any
    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    fn into_parts(self) -> (Method, Url, HeaderMap, Option<Vec<u8>>) {
        (self.method, self.url, self.headers, self.body)
    }
}

/// A response to an [`HttpRequest`]
#[derive(Clone, Debug)]
pub struct HttpResponse {
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    /// Constructs a response
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers,
            body,
        }
    }

    /// The URL that produced this response
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The response status
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw response body
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the response, returning the body
    #[inline]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Consumes the response, returning the body as UTF-8 text
    pub fn text(self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.to_vec())
    }

    /// Turns a non-success status into an error
    ///
    /// This is the single place where the status of a remote call is
    /// inspected. Callers distinguish rejected credentials with
    /// [`StatusError::is_unauthorized()`].
    pub fn error_for_status(self) -> Result<Self, StatusError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(StatusError {
                url: self.url,
                status: self.status,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            })
        }
    }
}

/// A non-success status returned by the remote service
#[derive(Debug, Error)]
#[error("{url} responded with {status}")]
pub struct StatusError {
    url: Url,
    status: StatusCode,
    body: String,
}

impl StatusError {
    /// The URL that produced the error
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The returned status
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The body of the error response
    #[inline]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether the remote service rejected the presented credentials
    #[inline]
    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }
}

/// An error while attempting to exchange a request with the remote service
#[derive(Debug, Error)]
pub enum TransportError {
    /// Unable to construct the underlying HTTP client
    #[error("unable to construct HTTP client")]
    Client(#[source] reqwest::Error),
    /// Unable to send the request
    #[error("error sending request to {url}")]
    Send {
        /// The target of the request
        url: Url,
        /// The underlying request error
        #[source]
        source: reqwest::Error,
    },
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
}

/// Something that can exchange HTTP requests for responses
///
/// Both a blocking and an asynchronous entry point are required, since an
/// authenticator may be driven from either kind of call site.
#[async_trait]
pub trait HttpTransport: fmt::Debug + Send + Sync {
    /// Sends a request, blocking the current thread until the response arrives
    fn send_blocking(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Sends a request asynchronously
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn send_blocking(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send_blocking(request)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

const USER_AGENT: &str = concat!("conjur_tokens/", env!("CARGO_PKG_VERSION"));

/// Settings shared by the asynchronous and the blocking `reqwest` clients
///
/// Both clients of a [`ReqwestTransport`] are built from the same options, so
/// a request carries the same headers and trusts the same roots whichever
/// entry point sends it.
#[derive(Clone)]
pub struct TransportOptions {
    timeout: Duration,
    default_headers: HeaderMap,
    #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
    root_certificates: Vec<reqwest::Certificate>,
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("TransportOptions");
        s.field("timeout", &self.timeout)
            .field("default_headers", &self.default_headers);
        #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
        s.field("root_certificates", &self.root_certificates.len());
        s.finish()
    }
}

impl TransportOptions {
    /// Options whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            default_headers: HeaderMap::new(),
            #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
            root_certificates: Vec::new(),
        }
    }

    /// Adds a header sent with every request
    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Trusts `certificate` as a root in addition to the system roots
    #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "default-tls", feature = "rustls-tls"))))]
    pub fn with_root_certificate(mut self, certificate: reqwest::Certificate) -> Self {
        self.root_certificates.push(certificate);
        self
    }

    /// The request timeout
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Headers sent with every request
    #[inline]
    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// Additional trusted roots
    #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "default-tls", feature = "rustls-tls"))))]
    #[inline]
    pub fn root_certificates(&self) -> &[reqwest::Certificate] {
        &self.root_certificates
    }
}

/// Applies [`TransportOptions`] to either flavor of `reqwest` client builder
macro_rules! configure {
    ($builder:expr, $options:expr) => {{
        let options: &TransportOptions = $options;
        let builder = $builder
            .user_agent(USER_AGENT)
            .timeout(options.timeout)
            .default_headers(options.default_headers.clone());
        #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
        let builder = options
            .root_certificates
            .iter()
            .cloned()
            .fold(builder, |builder, certificate| {
                builder.add_root_certificate(certificate)
            });
        builder
    }};
}

/// A transport backed by `reqwest`
///
/// The blocking client is only constructed the first time a blocking request
/// is made. As with `reqwest::blocking`, the blocking entry point must not be
/// used from within an asynchronous execution context.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    blocking: Arc<OnceCell<reqwest::blocking::Client>>,
    options: Arc<TransportOptions>,
}

impl ReqwestTransport {
    /// Constructs a transport whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        Self::with_options(TransportOptions::new(timeout))
    }

    /// Constructs a transport whose clients are both built from `options`
    pub fn with_options(options: TransportOptions) -> Result<Self, TransportError> {
        let client = configure!(reqwest::Client::builder(), &options)
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            client,
            blocking: Arc::new(OnceCell::new()),
            options: Arc::new(options),
        })
    }

    /// The options both clients are built from
    #[inline]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, TransportError> {
        self.blocking.get_or_try_init(|| {
            configure!(reqwest::blocking::Client::builder(), &self.options)
                .build()
                .map_err(TransportError::Client)
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    fn send_blocking(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (method, url, headers, body) = request.into_parts();

        let mut builder = self
            .blocking_client()?
            .request(method, url.clone())
            .headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let resp = builder.send().map_err(|source| TransportError::Send {
            url: url.clone(),
            source,
        })?;

        tracing::trace!(
            response.status = resp.status().as_u16(),
            %url,
            "received response"
        );

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().map_err(TransportError::BodyRead)?;

        Ok(HttpResponse::new(url, status, headers, body))
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (method, url, headers, body) = request.into_parts();

        let mut builder = self.client.request(method, url.clone()).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|source| TransportError::Send {
                url: url.clone(),
                source,
            })?;

        tracing::trace!(
            response.status = resp.status().as_u16(),
            %url,
            "received response"
        );

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(TransportError::BodyRead)?;

        Ok(HttpResponse::new(url, status, headers, body))
    }
}
