//! A token source that proves an AWS IAM identity
//!
//! A `GetCallerIdentity` request to STS is signed with the caller's session
//! credentials but never sent. Its signing headers are forwarded to the
//! authenticator instead, which replays the request to STS to learn who the
//! caller is. The authenticator answers with a base64-encoded token.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use conjur_clock::{Clock, System};
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Url,
};
use serde::Serialize;

use super::{authenticate_url, private::Sealed, CachedTokenSource, TokenSource};
use crate::{
    transport::{HttpRequest, HttpResponse, HttpTransport},
    AccessToken, AccountRef, AuthnError, Login, LoginRef,
};

mod credentials;
mod sigv4;

pub use credentials::{
    CredentialsError, CredentialsProvider, EnvironmentCredentials, SessionCredentials,
    StaticCredentials, StsCredentials, MIN_SESSION_DURATION_SECS,
};
pub use sigv4::{SigV4Signer, SigningError};

/// The region assumed when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

const CALLER_IDENTITY_URL: &str =
    "https://sts.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15";

/// An AWS IAM authenticator with a cached token
pub type IamAuthenticator<C = System> = CachedTokenSource<IamSource<C>, C>;

/// The signing headers of a `GetCallerIdentity` request
#[derive(Serialize)]
struct IamPayload {
    #[serde(rename = "Authorization")]
    authorization: String,
    #[serde(rename = "x-amz-date")]
    date: String,
    #[serde(rename = "x-amz-content-sha256")]
    content_sha256: String,
    #[serde(rename = "x-amz-security-token")]
    security_token: String,
    host: String,
}

impl IamPayload {
    fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: HeaderName| {
            headers
                .get(name)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .unwrap_or_default()
        };

        Self {
            authorization: get(header::AUTHORIZATION),
            date: get(sigv4::X_AMZ_DATE),
            content_sha256: get(sigv4::X_AMZ_CONTENT_SHA256),
            security_token: get(sigv4::X_AMZ_SECURITY_TOKEN),
            host: get(header::HOST),
        }
    }
}

/// Posts a signed STS identity proof to
/// `{url}/{authenticator}/{account}/{identity}/authenticate`
pub struct IamSource<C = System> {
    transport: Arc<dyn HttpTransport>,
    url: Url,
    identity: Login,
    credentials: Arc<dyn CredentialsProvider>,
    signer: SigV4Signer<C>,
}

impl<C: fmt::Debug> fmt::Debug for IamSource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamSource")
            .field("url", &self.url)
            .field("identity", &self.identity)
            .field("credentials", &self.credentials)
            .field("signer", &self.signer)
            .finish()
    }
}

impl IamSource<System> {
    /// Constructs a new IAM source
    ///
    /// `authenticator` names the authenticator instance, such as
    /// `authn-iam/prod`. Each of its `/`-separated parts becomes a path
    /// segment, while `identity` is encoded as a single segment.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        url: &Url,
        authenticator: &str,
        account: &AccountRef,
        identity: &LoginRef,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Result<Self, AuthnError> {
        let segments = authenticator
            .split('/')
            .filter(|s| !s.is_empty())
            .chain([account.as_str(), identity.as_str()]);
        let url = authenticate_url(url, segments)?;

        Ok(Self {
            transport,
            url,
            identity: identity.to_owned(),
            credentials,
            signer: SigV4Signer::new(DEFAULT_REGION, "sts"),
        })
    }
}

impl<C> IamSource<C> {
    /// Signs the identity proof for `region`
    ///
    /// This should be the region in which the authenticator expects callers.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.signer = self.signer.with_region(region);
        self
    }

    /// Sets a custom clock to be used when signing
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> IamSource<D> {
        IamSource {
            transport: self.transport,
            url: self.url,
            identity: self.identity,
            credentials: self.credentials,
            signer: self.signer.with_clock(clock),
        }
    }

    /// The URL the identity proof is posted to
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl<C: Clock> IamSource<C> {
    fn request(&self, credentials: &SessionCredentials) -> Result<HttpRequest, AuthnError> {
        let mut identity = HttpRequest::get(
            Url::parse(CALLER_IDENTITY_URL).expect("valid caller identity URL"),
        );
        self.signer.sign(&mut identity, credentials)?;

        let payload = serde_json::to_vec(&IamPayload::from_headers(identity.headers()))?;

        Ok(HttpRequest::post(self.url.clone())
            .with_header(
                header::ACCEPT_ENCODING,
                HeaderValue::from_static("base64"),
            )
            .with_body("application/json", payload))
    }
}

fn decode_token(response: HttpResponse) -> Result<AccessToken, AuthnError> {
    let response = response.error_for_status()?;
    let encoded = String::from_utf8_lossy(response.body());
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(AuthnError::TokenNotBase64)?;
    let token = String::from_utf8(decoded).map_err(AuthnError::TokenNotUtf8)?;
    Ok(AccessToken::new(token))
}

impl<C> Sealed for IamSource<C> {}

#[async_trait]
impl<C: Clock + fmt::Debug + Send + Sync> TokenSource for IamSource<C> {
    #[tracing::instrument(err, skip(self), fields(url = %self.url, identity = %self.identity))]
    fn authenticate_blocking(&self) -> Result<AccessToken, AuthnError> {
        let credentials = self.credentials.credentials_blocking()?;
        tracing::trace!("posting signed identity proof");
        decode_token(self.transport.send_blocking(self.request(&credentials)?)?)
    }

    #[tracing::instrument(err, skip(self), fields(url = %self.url, identity = %self.identity))]
    async fn authenticate(&self) -> Result<AccessToken, AuthnError> {
        let credentials = self.credentials.credentials().await?;
        let request = self.request(&credentials)?;
        tracing::trace!("posting signed identity proof");
        decode_token(self.transport.send(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use conjur_clock::TestClock;
    use reqwest::StatusCode;

    use super::*;
    use crate::{transport::mock::MockTransport, Account};

    const AUTHN_URL: &str = "test://example.com/authn-iam/test/test-account/somehost/authenticate";

    fn source(mock: &MockTransport) -> IamSource<TestClock> {
        let credentials = StaticCredentials::new(SessionCredentials::new(
            "ASIAEXAMPLE",
            "secret",
            Some("session-token".to_owned()),
        ));

        IamSource::new(
            Arc::new(mock.clone()),
            &"test://example.com/".parse().unwrap(),
            "authn-iam/test",
            &Account::from_static("test-account"),
            &Login::from_static("somehost"),
            Arc::new(credentials),
        )
        .unwrap()
        .with_clock(TestClock::new(UNIX_EPOCH + Duration::from_secs(1_440_938_160)))
    }

    #[test]
    fn authenticator_name_spans_segments() {
        let source = source(&MockTransport::new());
        assert_eq!(source.url().as_str(), AUTHN_URL);
    }

    #[test]
    fn base64_response_is_decoded() {
        let mock = MockTransport::new();
        let handle = mock
            .mock(AUTHN_URL, STANDARD.encode("iam_token"))
            .with_verifier(|req| {
                let json: serde_json::Value =
                    serde_json::from_slice(req.body().unwrap_or_default())
                        .map_err(|_| StatusCode::BAD_REQUEST)?;
                let object = json.as_object().ok_or(StatusCode::BAD_REQUEST)?;

                let expected = [
                    "Authorization",
                    "x-amz-date",
                    "x-amz-content-sha256",
                    "x-amz-security-token",
                    "host",
                ];
                let well_formed = req.method() == reqwest::Method::POST
                    && req.headers()[header::CONTENT_TYPE] == "application/json"
                    && req.headers()[header::ACCEPT_ENCODING] == "base64"
                    && object.len() == expected.len()
                    && expected.iter().all(|k| object.contains_key(*k));

                well_formed.then_some(()).ok_or(StatusCode::BAD_REQUEST)
            });

        let authenticator = CachedTokenSource::new(source(&mock), Duration::from_secs(450));
        let token = authenticator.token_blocking().unwrap();

        assert_eq!(token.as_str(), "iam_token");
        assert_eq!(handle.hits(), 1);
    }

    #[test]
    fn payload_carries_signed_headers() {
        let mock = MockTransport::new();
        mock.mock(AUTHN_URL, STANDARD.encode("iam_token"));

        source(&mock).authenticate_blocking().unwrap();

        let request = &mock.requests()[0];
        let json: serde_json::Value = serde_json::from_slice(request.body().unwrap()).unwrap();
        assert_eq!(json["host"], "sts.amazonaws.com");
        assert_eq!(json["x-amz-date"], "20150830T123600Z");
        assert_eq!(json["x-amz-security-token"], "session-token");
        assert_eq!(
            json["x-amz-content-sha256"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(json["Authorization"]
            .as_str()
            .unwrap()
            .starts_with("AWS4-HMAC-SHA256 Credential=ASIAEXAMPLE/20150830/us-east-1/sts/aws4_request"));
    }

    #[tokio::test]
    async fn async_path_decodes_too() {
        let mock = MockTransport::new();
        mock.mock(AUTHN_URL, STANDARD.encode("iam_token"));

        let token = source(&mock).authenticate().await.unwrap();

        assert_eq!(token.as_str(), "iam_token");
    }

    #[test]
    fn response_that_is_not_base64_is_rejected() {
        let mock = MockTransport::new();
        mock.mock(AUTHN_URL, "not base64!");

        let err = source(&mock).authenticate_blocking().unwrap_err();

        assert!(matches!(err, AuthnError::TokenNotBase64(_)));
    }

    #[test]
    fn rejected_identity_is_unauthorized() {
        let mock = MockTransport::new();
        mock.mock_status(AUTHN_URL, StatusCode::UNAUTHORIZED, "");

        let err = source(&mock).authenticate_blocking().unwrap_err();

        assert!(err.is_unauthorized());
    }

    #[test]
    fn missing_credentials_are_reported() {
        #[derive(Debug)]
        struct NoCredentials;

        #[async_trait]
        impl CredentialsProvider for NoCredentials {
            fn credentials_blocking(&self) -> Result<SessionCredentials, CredentialsError> {
                Err(CredentialsError::MissingEnv {
                    name: "AWS_ACCESS_KEY_ID",
                })
            }

            async fn credentials(&self) -> Result<SessionCredentials, CredentialsError> {
                self.credentials_blocking()
            }
        }

        let mock = MockTransport::new();
        let source = IamSource::new(
            Arc::new(mock.clone()),
            &"test://example.com/".parse().unwrap(),
            "authn-iam/test",
            &Account::from_static("test-account"),
            &Login::from_static("somehost"),
            Arc::new(NoCredentials),
        )
        .unwrap();

        let err = source.authenticate_blocking().unwrap_err();

        assert!(matches!(err, AuthnError::Credentials(_)));
        assert!(mock.requests().is_empty());
    }
}
