use conjur_tokens::{
    transport::{StatusError, TransportError},
    AuthnError,
};
use thiserror::Error;

/// An error while talking to the Conjur API
#[derive(Debug, Error)]
pub enum Error {
    /// The client has no authenticator, so it cannot make authenticated requests
    #[error("authentication required; configure an authenticator or log in first")]
    AuthenticationRequired,
    /// The server rejected the presented credentials
    #[error("request to {} was not authorized", .0.url())]
    Unauthorized(#[source] StatusError),
    /// The server returned some other error status
    #[error("Conjur returned an error")]
    Status(#[source] StatusError),
    /// Unable to obtain an access token
    #[error(transparent)]
    Authn(#[from] AuthnError),
    /// The request could not be exchanged with the server
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The response body was not in the expected shape
    #[error("unable to deserialize response")]
    Deserialize(#[from] serde_json::Error),
    /// The response body was expected to be text
    #[error("response body is not valid UTF-8")]
    NotUtf8(#[from] std::string::FromUtf8Error),
    /// The URL could not be constructed
    #[error("invalid URL")]
    InvalidUrl(#[from] url::ParseError),
    /// The base URL cannot have path segments appended to it
    #[error("`{url}` cannot be used as a base URL")]
    CannotBeABase {
        /// The offending URL
        url: url::Url,
    },
    /// The host was created without an API key
    #[error("host `{id}` was created without an API key")]
    UnknownApiKey {
        /// The host that was created
        id: String,
    },
}

impl From<StatusError> for Error {
    fn from(error: StatusError) -> Self {
        if error.is_unauthorized() {
            Self::Unauthorized(error)
        } else {
            Self::Status(error)
        }
    }
}

impl Error {
    /// Whether the server rejected the presented credentials
    ///
    /// This includes credentials rejected while obtaining an access token.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Authn(e) => e.is_unauthorized(),
            _ => false,
        }
    }
}
