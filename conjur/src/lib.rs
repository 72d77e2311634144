//! A client for the Conjur secrets API
//!
//! A [`Client`] addresses a single account on a Conjur server. Once an
//! authenticator is installed, every authenticated request carries a cached
//! access token, which is refreshed transparently when it expires. Clones of a
//! client, including impersonating clones made with
//! [`acting_as()`][Client::acting_as()], share that token.
//!
//! ```
//! use conjur::{Client, ResourceKind};
//! use conjur_tokens::{ApiKey, Login};
//!
//! # fn main() -> Result<(), conjur::Error> {
//! let mut client = Client::new("https://conjur.example.com", "myorg")?;
//! client.set_credentials(
//!     &Login::from_static("host/jenkins"),
//!     &ApiKey::from_static("3ahcddy39rcxzh3ggac4cwk3j2r8pqwdg33059y835ys2rh2kzs2a"),
//! )?;
//!
//! let password = client.variable("db/password");
//! let admins = client.role(ResourceKind::Group, "admins");
//! # /* Commented out due to this trying to interact with the world.
//! let secret = password.value()?;
//! let is_admin = admins.exists()?;
//! # */
//! # let _ = (password, admins);
//! # Ok(())
//! # }
//! ```
//!
//! Every operation has a blocking and an asynchronous entry point. The
//! blocking entry points must not be called from within an asynchronous
//! execution context.
//!
//! # Other authenticators
//!
//! Besides API keys, a client can authenticate with an AWS IAM identity
//! ([`Client::iam_authenticator()`]) or a JWT assertion
//! ([`Client::jwt_authenticator()`]). The resulting authenticator is installed
//! with [`Client::set_authenticator()`].

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

mod client;
pub mod config;
mod error;
pub mod host;
pub mod policy;
pub mod resource;
pub mod role;
pub mod variable;

#[cfg(test)]
mod test_support;

pub use client::Client;
pub use config::{ClientConfig, IntegrationMetadata};
pub use error::Error;
pub use host::Host;
pub use policy::Policy;
pub use resource::{Resource, ResourceKind, ResourceMetadata};
pub use role::{Role, RoleMember};
pub use variable::Variable;
