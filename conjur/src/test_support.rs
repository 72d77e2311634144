use std::sync::Arc;

use conjur_tokens::{
    transport::{mock::MockTransport, HttpRequest},
    ApiKey, Login,
};
use reqwest::{header, StatusCode};

use crate::{Client, ClientConfig};

pub(crate) const BASE: &str = "test://example.com/";
pub(crate) const ACCOUNT: &str = "test-account";
pub(crate) const AUTHN: &str = "test://example.com/authn/test-account/admin/authenticate";

/// The header produced for the token `token`
pub(crate) const AUTHORIZATION: &str = "Token token=\"dG9rZW4=\"";

pub(crate) fn client(mock: &MockTransport) -> Client {
    Client::with_transport(BASE, ACCOUNT, ClientConfig::default(), Arc::new(mock.clone())).unwrap()
}

pub(crate) fn logged_in(mock: &MockTransport) -> Client {
    let mut client = client(mock);
    mock.mock(AUTHN, "token");
    client
        .set_credentials(&Login::from_static("admin"), &ApiKey::from_static("api-key"))
        .unwrap();
    client
}

/// A verifier rejecting requests without the access token
pub(crate) fn authorized(req: &HttpRequest) -> Result<(), StatusCode> {
    let ok = req
        .headers()
        .get(header::AUTHORIZATION)
        .map_or(false, |v| v == AUTHORIZATION);
    ok.then_some(()).ok_or(StatusCode::UNAUTHORIZED)
}
