//! AWS Signature Version 4 request signing

use chrono::{DateTime, Utc};
use conjur_clock::{Clock, System};
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue},
    Method, Url,
};
use ring::{digest, hmac};
use thiserror::Error;
use zeroize::Zeroizing;

use super::SessionCredentials;
use crate::transport::HttpRequest;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub(crate) const X_AMZ_DATE: HeaderName = HeaderName::from_static("x-amz-date");
pub(crate) const X_AMZ_CONTENT_SHA256: HeaderName = HeaderName::from_static("x-amz-content-sha256");
pub(crate) const X_AMZ_SECURITY_TOKEN: HeaderName = HeaderName::from_static("x-amz-security-token");

/// An error while signing a request
#[derive(Debug, Error)]
pub enum SigningError {
    /// The request URL has no host to sign
    #[error("`{url}` has no host")]
    MissingHost {
        /// The offending URL
        url: Url,
    },
    /// A computed value cannot be placed in a header
    #[error("signed value is not a valid header value")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// Signs requests for one AWS service in one region
#[derive(Clone, Debug)]
pub struct SigV4Signer<C = System> {
    region: String,
    service: String,
    clock: C,
}

impl SigV4Signer<System> {
    /// Constructs a signer for `service` in `region`
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
            clock: System,
        }
    }
}

impl<C> SigV4Signer<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> SigV4Signer<D> {
        SigV4Signer {
            region: self.region,
            service: self.service,
            clock,
        }
    }

    /// Signs for `region` instead
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// The region requests are signed for
    #[inline]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The service requests are signed for
    #[inline]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl<C: Clock> SigV4Signer<C> {
    /// Signs `request` in place
    ///
    /// Sets the `host`, `x-amz-date`, `x-amz-content-sha256` and, when the
    /// credentials carry a session token, `x-amz-security-token` headers, then
    /// signs every header on the request and sets `authorization`.
    pub fn sign(
        &self,
        request: &mut HttpRequest,
        credentials: &SessionCredentials,
    ) -> Result<(), SigningError> {
        let now: DateTime<Utc> = self.clock.system_time().into();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = sha256_hex(request.body().unwrap_or_default());
        let host = host_header(request.url())?;

        let headers = request.headers_mut();
        headers.insert(header::HOST, HeaderValue::try_from(host)?);
        headers.insert(X_AMZ_DATE, HeaderValue::try_from(amz_date.as_str())?);
        headers.insert(
            X_AMZ_CONTENT_SHA256,
            HeaderValue::try_from(payload_hash.as_str())?,
        );
        if let Some(token) = credentials.session_token() {
            let mut token = HeaderValue::try_from(token)?;
            token.set_sensitive(true);
            headers.insert(X_AMZ_SECURITY_TOKEN, token);
        }

        let authorization = authorization(
            &Signing {
                method: request.method(),
                url: request.url(),
                headers: request.headers(),
                payload_hash: &payload_hash,
                amz_date: &amz_date,
                region: &self.region,
                service: &self.service,
            },
            credentials,
        );

        let mut authorization = HeaderValue::try_from(authorization)?;
        authorization.set_sensitive(true);
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, authorization);

        tracing::trace!(
            region = %self.region,
            service = %self.service,
            %amz_date,
            "signed request"
        );

        Ok(())
    }
}

struct Signing<'a> {
    method: &'a Method,
    url: &'a Url,
    headers: &'a HeaderMap,
    payload_hash: &'a str,
    amz_date: &'a str,
    region: &'a str,
    service: &'a str,
}

fn authorization(signing: &Signing<'_>, credentials: &SessionCredentials) -> String {
    let date = &signing.amz_date[..8];
    let scope = format!(
        "{date}/{}/{}/aws4_request",
        signing.region, signing.service
    );

    let (canonical, signed_headers) = canonical_request(signing);
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        signing.amz_date,
        sha256_hex(canonical.as_bytes())
    );

    let key = signing_key(
        credentials.secret_access_key(),
        date,
        signing.region,
        signing.service,
    );
    let signature = hex::encode(hmac_sha256(key.as_ref(), string_to_sign.as_bytes()));

    format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id()
    )
}

/// Returns the canonical request and the list of signed headers
fn canonical_request(signing: &Signing<'_>) -> (String, String) {
    let path = match signing.url.path() {
        "" => "/",
        path => path,
    };

    let mut query: Vec<(String, String)> = signing
        .url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    query.sort();
    let query = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut names: Vec<&str> = signing.headers.keys().map(HeaderName::as_str).collect();
    names.sort_unstable();

    let mut canonical_headers = String::new();
    for name in &names {
        let values = signing
            .headers
            .get_all(*name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_owned())
            .collect::<Vec<_>>()
            .join(",");
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(&values);
        canonical_headers.push('\n');
    }
    let signed_headers = names.join(";");

    let canonical = format!(
        "{}\n{path}\n{query}\n{canonical_headers}\n{signed_headers}\n{}",
        signing.method, signing.payload_hash
    );

    (canonical, signed_headers)
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> hmac::Tag {
    let secret = Zeroizing::new(format!("AWS4{secret}"));
    let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(k_date.as_ref(), region.as_bytes());
    let k_service = hmac_sha256(k_region.as_ref(), service.as_bytes());
    hmac_sha256(k_service.as_ref(), b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> hmac::Tag {
    hmac::sign(&hmac::Key::new(hmac::HMAC_SHA256, key), data)
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data))
}

fn host_header(url: &Url) -> Result<String, SigningError> {
    let host = url
        .host_str()
        .ok_or_else(|| SigningError::MissingHost { url: url.clone() })?;

    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

/// Percent-encodes everything but the unreserved characters
fn uri_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace('*', "%2A")
        .replace("%7E", "~")
}
