//! Middleware to automatically attach Conjur access tokens to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to use the
//! current access token of an [`Authenticator`] for each outbound request.
//! The token is cached by the authenticator and only fetched again once it
//! expires.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use conjur_reqwest::AccessTokenMiddleware;
//! use conjur_tokens::{
//!     sources::{ApiKeySource, CachedTokenSource},
//!     transport::ReqwestTransport,
//!     Account, ApiKey, Authenticator, Login,
//! };
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(100))?);
//! # let source = ApiKeySource::new(
//! #     transport,
//! #     &"https://conjur.example.com/authn".parse()?,
//! #     &Account::from_static("myorg"),
//! #     &Login::from_static("host/jenkins"),
//! #     &ApiKey::from_static("api-key"),
//! # )?;
//! let authenticator = Arc::new(Authenticator::from(CachedTokenSource::new(
//!     source,
//!     Duration::from_secs(450),
//! )));
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(authenticator))
//!     .build();
//!
//! let req = client.get("https://conjur.example.com/whoami");
//! # let _ = req;
//! # Ok(())
//! # }
//! ```
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally. This can be useful in the event that you want to
//! use a single common middleware stack with multiple potential backends
//! and want to ensure that Conjur tokens are only sent to Conjur.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to attaching a token to a request.
//!
//! ```
//! use conjur_reqwest::{AccessTokenMiddleware, ApplianceOnly, HttpsOnly};
//! use predicates::prelude::PredicateBooleanExt;
//! # use std::{sync::Arc, time::Duration};
//! # use conjur_tokens::{
//! #     sources::{ApiKeySource, CachedTokenSource},
//! #     transport::ReqwestTransport,
//! #     Account, ApiKey, Authenticator, Login,
//! # };
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(100))?);
//! # let source = ApiKeySource::new(
//! #     transport,
//! #     &"https://conjur.example.com/authn".parse()?,
//! #     &Account::from_static("myorg"),
//! #     &Login::from_static("host/jenkins"),
//! #     &ApiKey::from_static("api-key"),
//! # )?;
//! # let authenticator = Arc::new(Authenticator::from(CachedTokenSource::new(source, Duration::from_secs(450))));
//!
//! AccessTokenMiddleware::new(authenticator)
//!     .with_predicate(HttpsOnly.and(ApplianceOnly::new(&"https://conjur.example.com".parse()?)));
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use conjur_tokens::{authorization_header, Authenticator};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response, Url};
use reqwest_middleware::{Middleware, Next, Result};

/// A middleware that injects a Conjur access token into outgoing requests
#[derive(Clone, Debug)]
pub struct AccessTokenMiddleware<P> {
    authenticator: Arc<Authenticator>,
    predicate: P,
}

impl AccessTokenMiddleware<HttpsOnly> {
    /// Construct a new middleware from an authenticator
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self {
            authenticator,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<P> {
        AccessTokenMiddleware {
            authenticator: self.authenticator,
            predicate,
        }
    }
}

impl<P> AccessTokenMiddleware<P> {
    async fn get_token_from_source(&self) -> Result<header::HeaderValue> {
        let token = self
            .authenticator
            .token()
            .await
            .map_err(reqwest_middleware::Error::middleware)?;

        tracing::trace!(
            authenticator = self.authenticator.kind(),
            cache.state = ?self.authenticator.state(),
            "obtained access token"
        );

        Ok(authorization_header(&token))
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            let value = self.get_token_from_source().await?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        next.run(req, extensions).await
    }
}

/// Matches requests sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("https request")
    }
}

/// Matches requests addressed to a Conjur appliance
///
/// A request matches when it shares the appliance's scheme, host and port,
/// and its path lies under the appliance's base path. Appliances served from
/// a sub-path, such as `https://example.com/conjur`, therefore do not receive
/// tokens meant for sibling services on the same host.
#[derive(Clone, Debug)]
pub struct ApplianceOnly {
    appliance: Url,
}

impl ApplianceOnly {
    /// Matches requests to the appliance at `appliance`
    pub fn new(appliance: &Url) -> Self {
        let mut appliance = appliance.clone();
        if !appliance.path().ends_with('/') {
            let path = format!("{}/", appliance.path());
            appliance.set_path(&path);
        }
        appliance.set_query(None);
        appliance.set_fragment(None);
        Self { appliance }
    }

    /// The appliance base URL, always ending in `/`
    #[inline]
    pub fn appliance(&self) -> &Url {
        &self.appliance
    }
}

impl Predicate<Request> for ApplianceOnly {
    fn eval(&self, req: &Request) -> bool {
        let url = req.url();
        url.origin() == self.appliance.origin()
            && (url.path().starts_with(self.appliance.path())
                || format!("{}/", url.path()) == self.appliance.path())
    }
}

impl reflection::PredicateReflection for ApplianceOnly {}
impl fmt::Display for ApplianceOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request to {}", self.appliance)
    }
}
