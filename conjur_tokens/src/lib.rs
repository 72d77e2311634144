//! Cached, self-refreshing access tokens for the Conjur secrets API
//!
//! Every request to Conjur carries a short-lived access token. This crate
//! obtains those tokens from one of the supported authenticators and keeps the
//! current one cached, so that callers can simply ask for a token every time
//! they need one.
//!
//! The cache is built for concurrent use. While a token is valid, asking for
//! it is a single atomic load. Once it expires, exactly one caller fetches a
//! replacement while everyone else waits for that same replacement. Blocking
//! and asynchronous callers share the same cache and never race each other
//! into a second fetch. A failed fetch is reported to the caller that
//! triggered it and leaves the cache empty, so the next caller tries again.
//!
//! # Authenticators
//!
//! * [`ApiKeySource`][sources::ApiKeySource] posts an API key to `authn`.
//! * [`IamSource`][sources::IamSource] proves an AWS IAM identity to
//!   `authn-iam` with a signed STS `GetCallerIdentity` request.
//! * [`JwtSource`][sources::JwtSource] posts a JWT assertion to `authn-jwt`.
//!
//! Each is wrapped in a [`CachedTokenSource`][sources::CachedTokenSource] and
//! the three are brought together in the [`Authenticator`] enum.
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use conjur_tokens::{
//!     sources::{ApiKeySource, CachedTokenSource},
//!     transport::ReqwestTransport,
//!     Account, ApiKey, Authenticator, Login,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(100))?);
//! let source = ApiKeySource::new(
//!     transport,
//!     &"https://conjur.example.com/authn".parse()?,
//!     &Account::from_static("myorg"),
//!     &Login::from_static("host/jenkins"),
//!     &ApiKey::from_static("3ahcddy39rcxzh3ggac4cwk3j2r8pqwdg33059y835ys2rh2kzs2a"),
//! )?;
//!
//! let authenticator =
//!     Authenticator::from(CachedTokenSource::new(source, Duration::from_secs(450)));
//! # let _ = authenticator;
//! # /* Commented out due to this trying to interact with the world.
//! let header = conjur_tokens::authorization_header(&authenticator.token_blocking()?);
//! # */
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `default-tls` (default) and `rustls-tls` select the TLS backend of
//!   `reqwest`.
//! * `test-util` exposes [`MockTransport`][transport::mock::MockTransport], an
//!   in-process transport for tests.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authenticator;
mod braids;
pub mod cache;
mod error;
pub mod sources;
mod timer;
mod tokens;
pub mod transport;

pub use authenticator::Authenticator;
pub use braids::*;
pub use cache::{CacheState, TokenCache};
pub use error::AuthnError;
pub use sources::{
    api_key::ApiKeyAuthenticator, iam::IamAuthenticator, jwt::JwtAuthenticator,
};
pub use timer::RefreshTimer;
pub use tokens::authorization_header;
