//! Sources of AWS session credentials

use std::{env, fmt, sync::Arc};

use async_trait::async_trait;
use conjur_clock::{Clock, System};
use reqwest::{
    header::{self, HeaderValue},
    Url,
};
use thiserror::Error;
use zeroize::Zeroizing;

use super::{SigV4Signer, SigningError};
use crate::transport::{HttpRequest, HttpTransport, StatusError, TransportError};

/// The shortest session STS will issue, in seconds
pub const MIN_SESSION_DURATION_SECS: u32 = 900;

const STS_VERSION: &str = "2011-06-15";
const ROLE_SESSION_NAME: &str = "Session1";

/// Short-lived AWS credentials
#[derive(Clone)]
pub struct SessionCredentials {
    access_key_id: String,
    secret_access_key: Zeroizing<String>,
    session_token: Option<Zeroizing<String>>,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***SECRET ACCESS KEY***")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "***SESSION TOKEN***"),
            )
            .finish()
    }
}

impl SessionCredentials {
    /// Constructs a new set of credentials
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Zeroizing::new(secret_access_key.into()),
            session_token: session_token.map(Zeroizing::new),
        }
    }

    /// The access key ID
    #[inline]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// The secret access key
    #[inline]
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// The session token, if these credentials belong to a session
    #[inline]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref().map(String::as_str)
    }
}

/// An error while obtaining AWS session credentials
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// A required environment variable is not set
    #[error("environment variable `{name}` is not set")]
    MissingEnv {
        /// The name of the variable
        name: &'static str,
    },
    /// Unable to exchange a request with STS
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// STS returned an error status
    #[error("STS returned an error")]
    Status(#[from] StatusError),
    /// Unable to sign the STS request
    #[error("unable to sign STS request")]
    Signing(#[from] SigningError),
    /// The STS response could not be understood
    #[error("unable to deserialize STS response")]
    Body(#[from] serde_json::Error),
}

/// Something that can produce AWS session credentials
#[async_trait]
pub trait CredentialsProvider: fmt::Debug + Send + Sync {
    /// Obtains credentials, blocking the current thread
    fn credentials_blocking(&self) -> Result<SessionCredentials, CredentialsError>;

    /// Obtains credentials asynchronously
    async fn credentials(&self) -> Result<SessionCredentials, CredentialsError>;
}

#[async_trait]
impl<T: CredentialsProvider + ?Sized> CredentialsProvider for Arc<T> {
    fn credentials_blocking(&self) -> Result<SessionCredentials, CredentialsError> {
        (**self).credentials_blocking()
    }

    async fn credentials(&self) -> Result<SessionCredentials, CredentialsError> {
        (**self).credentials().await
    }
}

/// Always hands out the same credentials
#[derive(Clone, Debug)]
pub struct StaticCredentials(SessionCredentials);

impl StaticCredentials {
    /// Constructs a provider for fixed credentials
    pub fn new(credentials: SessionCredentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    fn credentials_blocking(&self) -> Result<SessionCredentials, CredentialsError> {
        Ok(self.0.clone())
    }

    async fn credentials(&self) -> Result<SessionCredentials, CredentialsError> {
        Ok(self.0.clone())
    }
}

/// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvironmentCredentials;

impl EnvironmentCredentials {
    fn read() -> Result<SessionCredentials, CredentialsError> {
        fn required(name: &'static str) -> Result<String, CredentialsError> {
            env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or(CredentialsError::MissingEnv { name })
        }

        Ok(SessionCredentials::new(
            required("AWS_ACCESS_KEY_ID")?,
            required("AWS_SECRET_ACCESS_KEY")?,
            env::var("AWS_SESSION_TOKEN").ok().filter(|v| !v.is_empty()),
        ))
    }
}

#[async_trait]
impl CredentialsProvider for EnvironmentCredentials {
    fn credentials_blocking(&self) -> Result<SessionCredentials, CredentialsError> {
        Self::read()
    }

    async fn credentials(&self) -> Result<SessionCredentials, CredentialsError> {
        Self::read()
    }
}

/// Exchanges long-lived credentials for a short STS session
///
/// With a role ARN this performs `AssumeRole`, otherwise `GetSessionToken`.
/// Sessions are requested for the minimum duration STS allows.
#[derive(Debug)]
pub struct StsCredentials<C = System> {
    transport: Arc<dyn HttpTransport>,
    base: Arc<dyn CredentialsProvider>,
    endpoint: Url,
    role_arn: Option<String>,
    signer: SigV4Signer<C>,
}

impl StsCredentials<System> {
    /// Constructs a provider that signs STS calls with the credentials from `base`
    ///
    /// Calls go to the global STS endpoint, signed for `us-east-1`.
    pub fn new(transport: Arc<dyn HttpTransport>, base: Arc<dyn CredentialsProvider>) -> Self {
        Self {
            transport,
            base,
            endpoint: Url::parse("https://sts.amazonaws.com/").expect("valid STS endpoint"),
            role_arn: None,
            signer: SigV4Signer::new(super::DEFAULT_REGION, "sts"),
        }
    }
}

impl<C> StsCredentials<C> {
    /// Assumes `role_arn` instead of requesting a plain session token
    ///
    /// An empty ARN is ignored.
    pub fn assume_role(mut self, role_arn: impl Into<String>) -> Self {
        let role_arn: String = role_arn.into();
        self.role_arn = (!role_arn.is_empty()).then_some(role_arn);
        self
    }

    /// Uses a regional STS endpoint
    pub fn with_endpoint(mut self, endpoint: Url, region: impl Into<String>) -> Self {
        self.endpoint = endpoint;
        self.signer = self.signer.with_region(region);
        self
    }

    /// Sets a custom clock to be used when signing
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> StsCredentials<D> {
        StsCredentials {
            transport: self.transport,
            base: self.base,
            endpoint: self.endpoint,
            role_arn: self.role_arn,
            signer: self.signer.with_clock(clock),
        }
    }

    fn form(&self) -> String {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        match &self.role_arn {
            Some(role_arn) => {
                form.append_pair("Action", "AssumeRole")
                    .append_pair("Version", STS_VERSION)
                    .append_pair("RoleArn", role_arn)
                    .append_pair("RoleSessionName", ROLE_SESSION_NAME);
            }
            None => {
                form.append_pair("Action", "GetSessionToken")
                    .append_pair("Version", STS_VERSION);
            }
        }
        form.append_pair("DurationSeconds", &MIN_SESSION_DURATION_SECS.to_string())
            .finish()
    }
}

impl<C: Clock> StsCredentials<C> {
    fn request(&self, base: &SessionCredentials) -> Result<HttpRequest, CredentialsError> {
        let mut request = HttpRequest::post(self.endpoint.clone())
            .with_header(header::ACCEPT, HeaderValue::from_static("application/json"))
            .with_body("application/x-www-form-urlencoded", self.form());
        self.signer.sign(&mut request, base)?;
        Ok(request)
    }
}

fn parse_session(body: &[u8]) -> Result<SessionCredentials, CredentialsError> {
    let envelope: dto::Envelope = serde_json::from_slice(body)?;
    let creds = envelope.response.result.credentials;
    Ok(SessionCredentials::new(
        creds.access_key_id,
        creds.secret_access_key,
        Some(creds.session_token),
    ))
}

#[async_trait]
impl<C: Clock + fmt::Debug + Send + Sync> CredentialsProvider for StsCredentials<C> {
    #[tracing::instrument(err, skip(self), fields(endpoint = %self.endpoint, assume_role = self.role_arn.is_some()))]
    fn credentials_blocking(&self) -> Result<SessionCredentials, CredentialsError> {
        let base = self.base.credentials_blocking()?;
        let response = self
            .transport
            .send_blocking(self.request(&base)?)?
            .error_for_status()?;
        tracing::debug!("received STS session credentials");
        parse_session(response.body())
    }

    #[tracing::instrument(err, skip(self), fields(endpoint = %self.endpoint, assume_role = self.role_arn.is_some()))]
    async fn credentials(&self) -> Result<SessionCredentials, CredentialsError> {
        let base = self.base.credentials().await?;
        let request = self.request(&base)?;
        let response = self.transport.send(request).await?.error_for_status()?;
        tracing::debug!("received STS session credentials");
        parse_session(response.body())
    }
}

mod dto {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub(super) struct Envelope {
        #[serde(alias = "AssumeRoleResponse", alias = "GetSessionTokenResponse")]
        pub response: Response,
    }

    #[derive(Deserialize)]
    pub(super) struct Response {
        #[serde(alias = "AssumeRoleResult", alias = "GetSessionTokenResult")]
        pub result: SessionResult,
    }

    #[derive(Deserialize)]
    pub(super) struct SessionResult {
        #[serde(rename = "Credentials")]
        pub credentials: Credentials,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub(super) struct Credentials {
        pub access_key_id: String,
        pub secret_access_key: String,
        pub session_token: String,
    }
}
