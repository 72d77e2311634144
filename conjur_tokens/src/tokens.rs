use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::HeaderValue;

use crate::AccessTokenRef;

/// Builds the `Authorization` header value for an access token
///
/// The verbatim token is base64-encoded and wrapped as `Token token="…"`.
/// The resulting header value is marked as sensitive.
pub fn authorization_header(token: &AccessTokenRef) -> HeaderValue {
    let value = format!("Token token=\"{}\"", STANDARD.encode(token.as_str()));
    let mut value = HeaderValue::try_from(value).expect("only valid header bytes");
    value.set_sensitive(true);
    value
}
