//! Host provisioning through a host factory

use conjur_tokens::{transport::HttpRequest, ApiKey, ApiKeyRef, HostFactoryTokenRef, Login};
use reqwest::header::{self, HeaderValue};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::{Client, Error};

/// A host created by a host factory
#[derive(Clone, Debug, Deserialize)]
pub struct Host {
    id: String,
    #[serde(default)]
    api_key: Option<ApiKey>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default, rename = "ownerid")]
    owner: Option<String>,
}

impl Host {
    /// The host name
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The API key of the new host, if the server returned one
    #[inline]
    pub fn api_key(&self) -> Option<&ApiKeyRef> {
        self.api_key.as_deref()
    }

    /// When the host was created
    #[inline]
    pub fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    /// The role owning the host
    #[inline]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// The login and API key the host authenticates with
    pub fn credentials(&self) -> Result<(Login, ApiKey), Error> {
        let api_key = self.api_key.clone().ok_or_else(|| Error::UnknownApiKey {
            id: self.id.clone(),
        })?;
        Ok((Login::new(format!("host/{}", self.id)), api_key))
    }
}

impl Client {
    fn create_host_request(&self, name: &str, token: &HostFactoryTokenRef) -> HttpRequest {
        let mut url = self.endpoint(["host_factories", "hosts"]);
        url.query_pairs_mut().append_pair("id", name);

        let authorization = Zeroizing::new(format!("Token token=\"{}\"", token.as_str()));
        let mut value =
            HeaderValue::try_from(authorization.as_str()).expect("only valid header bytes");
        value.set_sensitive(true);

        HttpRequest::post(url).with_header(header::AUTHORIZATION, value)
    }

    /// Creates a host named `name` using a host factory token
    ///
    /// The host factory token takes the place of an access token, so no
    /// authenticator is needed.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn create_host(&self, name: &str, token: &HostFactoryTokenRef) -> Result<Host, Error> {
        let response = self.send(self.create_host_request(name, token))?;
        let host: Host = serde_json::from_slice(response.body())?;
        tracing::info!(host = %host.id, "created host");
        Ok(host)
    }

    /// Asynchronous variant of [`create_host()`][Self::create_host()]
    pub async fn create_host_async(
        &self,
        name: &str,
        token: &HostFactoryTokenRef,
    ) -> Result<Host, Error> {
        let response = self
            .send_async(self.create_host_request(name, token))
            .await?;
        let host: Host = serde_json::from_slice(response.body())?;
        tracing::info!(host = %host.id, "created host");
        Ok(host)
    }
}
