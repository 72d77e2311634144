use reqwest::Url;
use thiserror::Error;

use crate::{
    sources::{iam::CredentialsError, iam::SigningError, jwt::JwtProviderError},
    transport::{StatusError, TransportError},
};

/// An error while attempting to obtain an access token
#[derive(Debug, Error)]
pub enum AuthnError {
    /// The authentication endpoint rejected the presented credentials
    #[error("authentication rejected by {}", .0.url())]
    Unauthorized(#[source] StatusError),
    /// The authentication endpoint returned some other error status
    #[error("authentication endpoint returned an error")]
    Status(#[source] StatusError),
    /// The request could not be exchanged with the authentication endpoint
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The configured URL cannot have path segments appended to it
    #[error("`{url}` cannot be used as a base for authentication URLs")]
    CannotBeABase {
        /// The offending URL
        url: Url,
    },
    /// The token returned by the authentication endpoint is not valid UTF-8
    #[error("access token is not valid UTF-8")]
    TokenNotUtf8(#[source] std::string::FromUtf8Error),
    /// The token returned by the authentication endpoint is not valid base64
    #[error("access token is not valid base64")]
    TokenNotBase64(#[source] base64::DecodeError),
    /// Unable to obtain cloud session credentials
    #[error("unable to obtain AWS session credentials")]
    Credentials(#[from] CredentialsError),
    /// Unable to sign the cloud identity request
    #[error("unable to sign AWS identity request")]
    Signing(#[from] SigningError),
    /// Unable to obtain a JWT assertion
    #[error("unable to obtain JWT assertion")]
    JwtProvider(#[from] JwtProviderError),
    /// Unable to serialize the authentication payload
    #[error("unable to serialize authentication payload")]
    Payload(#[from] serde_json::Error),
}

impl From<StatusError> for AuthnError {
    fn from(error: StatusError) -> Self {
        if error.is_unauthorized() {
            Self::Unauthorized(error)
        } else {
            Self::Status(error)
        }
    }
}

impl AuthnError {
    /// Whether the authentication endpoint rejected the presented credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}
