//! Client configuration

use std::{env, num::ParseIntError, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use conjur_tokens::transport::TransportOptions;
use once_cell::sync::OnceCell;
#[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
use reqwest::Certificate;
use reqwest::header::{HeaderName, HeaderValue};
use thiserror::Error;

/// The header carrying integration metadata on every request
pub const TELEMETRY_HEADER: HeaderName = HeaderName::from_static("x-cybr-telemetry");

/// How long a single HTTP request may take
pub const DEFAULT_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(100);

/// How long an access token is trusted before it is fetched again
pub const DEFAULT_TOKEN_REFRESH_TIMEOUT: Duration = Duration::from_secs(7 * 60 + 30);

const HTTP_REQUEST_TIMEOUT_ENV: &str = "CONJUR_HTTP_REQUEST_TIMEOUT";
const TOKEN_REFRESH_TIMEOUT_ENV: &str = "CONJUR_TOKEN_REFRESH_TIMEOUT";

/// An error while reading configuration from the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A timeout was not a whole number of milliseconds
    #[error("`{name}` must be a whole number of milliseconds, got `{value}`")]
    InvalidTimeout {
        /// The variable that was read
        name: &'static str,
        /// The value that was found
        value: String,
        /// The parse failure
        #[source]
        source: ParseIntError,
    },
}

/// Settings shared by every request a [`Client`][crate::Client] makes
#[derive(Clone, Debug)]
pub struct ClientConfig {
    http_request_timeout: Duration,
    token_refresh_timeout: Duration,
    integration: IntegrationMetadata,
    #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
    trusted_certificates: Vec<Certificate>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_request_timeout: DEFAULT_HTTP_REQUEST_TIMEOUT,
            token_refresh_timeout: DEFAULT_TOKEN_REFRESH_TIMEOUT,
            integration: IntegrationMetadata::default(),
            #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
            trusted_certificates: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Constructs a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from the process environment
    ///
    /// * `CONJUR_HTTP_REQUEST_TIMEOUT` and `CONJUR_TOKEN_REFRESH_TIMEOUT`, in
    ///   milliseconds
    /// * `CONJUR_INTEGRATION_NAME`, `CONJUR_INTEGRATION_TYPE`,
    ///   `CONJUR_INTEGRATION_VERSION`, `CONJUR_VENDOR_NAME` and
    ///   `CONJUR_VENDOR_VERSION`
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let millis = |name: &'static str| -> Result<Option<Duration>, ConfigError> {
            lookup(name)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|source| ConfigError::InvalidTimeout {
                            name,
                            value,
                            source,
                        })
                })
                .transpose()
        };

        let mut config = Self::default();
        if let Some(timeout) = millis(HTTP_REQUEST_TIMEOUT_ENV)? {
            config.http_request_timeout = timeout;
        }
        if let Some(timeout) = millis(TOKEN_REFRESH_TIMEOUT_ENV)? {
            config.token_refresh_timeout = timeout;
        }

        let integration = &mut config.integration;
        if let Some(v) = lookup("CONJUR_INTEGRATION_NAME") {
            integration.set_integration_name(v);
        }
        if let Some(v) = lookup("CONJUR_INTEGRATION_TYPE") {
            integration.set_integration_type(v);
        }
        if let Some(v) = lookup("CONJUR_INTEGRATION_VERSION") {
            integration.set_integration_version(v);
        }
        if let Some(v) = lookup("CONJUR_VENDOR_NAME") {
            integration.set_vendor_name(v);
        }
        if let Some(v) = lookup("CONJUR_VENDOR_VERSION") {
            integration.set_vendor_version(Some(v));
        }

        Ok(config)
    }

    /// Sets how long a single HTTP request may take
    pub fn with_http_request_timeout(mut self, timeout: Duration) -> Self {
        self.http_request_timeout = timeout;
        self
    }

    /// Sets how long an access token is trusted
    ///
    /// Applies to every authenticator the client constructs.
    pub fn with_token_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.token_refresh_timeout = timeout;
        self
    }

    /// Replaces the integration metadata
    pub fn with_integration(mut self, integration: IntegrationMetadata) -> Self {
        self.integration = integration;
        self
    }

    /// Trusts `certificate` when verifying the server, alongside the system
    /// roots
    ///
    /// Used for appliances whose certificate chains to a private CA.
    #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "default-tls", feature = "rustls-tls"))))]
    pub fn with_trusted_certificate(mut self, certificate: Certificate) -> Self {
        self.trusted_certificates.push(certificate);
        self
    }

    /// Certificates trusted in addition to the system roots
    #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "default-tls", feature = "rustls-tls"))))]
    #[inline]
    pub fn trusted_certificates(&self) -> &[Certificate] {
        &self.trusted_certificates
    }

    /// The options the default transport is built from
    pub fn transport_options(&self) -> TransportOptions {
        let options = TransportOptions::new(self.http_request_timeout);
        #[cfg(any(feature = "default-tls", feature = "rustls-tls"))]
        let options = self
            .trusted_certificates
            .iter()
            .cloned()
            .fold(options, TransportOptions::with_root_certificate);
        options
    }

    /// How long a single HTTP request may take
    #[inline]
    pub fn http_request_timeout(&self) -> Duration {
        self.http_request_timeout
    }

    /// How long an access token is trusted
    #[inline]
    pub fn token_refresh_timeout(&self) -> Duration {
        self.token_refresh_timeout
    }

    /// The integration metadata
    #[inline]
    pub fn integration(&self) -> &IntegrationMetadata {
        &self.integration
    }

    /// Mutable access to the integration metadata
    #[inline]
    pub fn integration_mut(&mut self) -> &mut IntegrationMetadata {
        &mut self.integration
    }
}

/// Identifies the integration using this client to the server
///
/// The metadata is sent in the `x-cybr-telemetry` header as
/// `in={name}&it={type}&iv={version}&vn={vendor}[&vv={vendor version}]`,
/// base64url-encoded without padding. The header value is computed once and
/// recomputed after any setter is called.
#[derive(Clone, Debug)]
pub struct IntegrationMetadata {
    integration_name: String,
    integration_type: String,
    integration_version: String,
    vendor_name: String,
    vendor_version: Option<String>,
    header: OnceCell<HeaderValue>,
}

impl Default for IntegrationMetadata {
    fn default() -> Self {
        Self::new(
            "SecretsManager Rust SDK",
            "cybr-secretsmanager",
            env!("CARGO_PKG_VERSION"),
            "CyberArk",
            None,
        )
    }
}

impl IntegrationMetadata {
    /// Constructs integration metadata
    pub fn new(
        integration_name: impl Into<String>,
        integration_type: impl Into<String>,
        integration_version: impl Into<String>,
        vendor_name: impl Into<String>,
        vendor_version: Option<String>,
    ) -> Self {
        Self {
            integration_name: integration_name.into(),
            integration_type: integration_type.into(),
            integration_version: integration_version.into(),
            vendor_name: vendor_name.into(),
            vendor_version,
            header: OnceCell::new(),
        }
    }

    /// The name of the integration
    #[inline]
    pub fn integration_name(&self) -> &str {
        &self.integration_name
    }

    /// The kind of integration
    #[inline]
    pub fn integration_type(&self) -> &str {
        &self.integration_type
    }

    /// The version of the integration
    #[inline]
    pub fn integration_version(&self) -> &str {
        &self.integration_version
    }

    /// The vendor of the integration
    #[inline]
    pub fn vendor_name(&self) -> &str {
        &self.vendor_name
    }

    /// The version of the vendor's product, if any
    #[inline]
    pub fn vendor_version(&self) -> Option<&str> {
        self.vendor_version.as_deref()
    }

    /// Sets the name of the integration
    pub fn set_integration_name(&mut self, value: impl Into<String>) {
        self.integration_name = value.into();
        self.header.take();
    }

    /// Sets the kind of integration
    pub fn set_integration_type(&mut self, value: impl Into<String>) {
        self.integration_type = value.into();
        self.header.take();
    }

    /// Sets the version of the integration
    pub fn set_integration_version(&mut self, value: impl Into<String>) {
        self.integration_version = value.into();
        self.header.take();
    }

    /// Sets the vendor of the integration
    pub fn set_vendor_name(&mut self, value: impl Into<String>) {
        self.vendor_name = value.into();
        self.header.take();
    }

    /// Sets the version of the vendor's product
    pub fn set_vendor_version(&mut self, value: Option<String>) {
        self.vendor_version = value;
        self.header.take();
    }

    /// The encoded value of the `x-cybr-telemetry` header
    pub fn telemetry_header(&self) -> &HeaderValue {
        self.header.get_or_init(|| {
            let mut raw = format!(
                "in={}&it={}&iv={}&vn={}",
                self.integration_name,
                self.integration_type,
                self.integration_version,
                self.vendor_name
            );
            if let Some(vv) = self.vendor_version.as_deref().filter(|vv| !vv.is_empty()) {
                raw.push_str("&vv=");
                raw.push_str(vv);
            }

            tracing::trace!(telemetry = %raw, "encoded integration metadata");
            HeaderValue::try_from(URL_SAFE_NO_PAD.encode(raw)).expect("only valid header bytes")
        })
    }
}
