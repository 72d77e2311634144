//! Roles and role graphs

use conjur_tokens::transport::{HttpRequest, HttpResponse};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{resource::ResourceKind, Client, Error};

/// A membership grant between two roles
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMember {
    /// The role that was granted
    pub role: String,
    /// The role holding the grant
    pub member: String,
    /// Whether the member may grant the role to others
    #[serde(default)]
    pub admin_option: bool,
    /// Whether the member owns the role
    #[serde(default)]
    pub ownership: bool,
    /// The policy that made the grant
    #[serde(default)]
    pub policy: Option<String>,
}

/// A role, such as a user, host, group or layer
#[derive(Clone, Debug)]
pub struct Role {
    client: Client,
    kind: ResourceKind,
    name: String,
}

impl Role {
    /// The kind of role
    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The name of the role within its kind
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fully qualified identifier, `{account}:{kind}:{name}`
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.client.account(), self.kind, self.name)
    }

    fn url(&self, query: Option<&str>) -> Url {
        let mut url = self.client.endpoint([
            "roles",
            self.client.account().as_str(),
            self.kind.as_str(),
            self.name.as_str(),
        ]);
        url.set_query(query);
        url
    }

    /// Whether the role exists
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn exists(&self) -> Result<bool, Error> {
        let request = self
            .client
            .authenticate(HttpRequest::new(Method::HEAD, self.url(None)))?;
        found(self.client.exchange(request)?)
    }

    /// Asynchronous variant of [`exists()`][Self::exists()]
    pub async fn exists_async(&self) -> Result<bool, Error> {
        let request = self
            .client
            .authenticate_async(HttpRequest::new(Method::HEAD, self.url(None)))
            .await?;
        found(self.client.exchange_async(request).await?)
    }

    /// The direct members of this role
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn members(&self) -> Result<Vec<RoleMember>, Error> {
        self.client.get_json(self.url(Some("members")))
    }

    /// Asynchronous variant of [`members()`][Self::members()]
    pub async fn members_async(&self) -> Result<Vec<RoleMember>, Error> {
        self.client.get_json_async(self.url(Some("members"))).await
    }

    /// Every role this role is a member of, directly or transitively
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn memberships(&self) -> Result<Vec<String>, Error> {
        self.client.get_json(self.url(Some("all")))
    }

    /// Asynchronous variant of [`memberships()`][Self::memberships()]
    pub async fn memberships_async(&self) -> Result<Vec<String>, Error> {
        self.client.get_json_async(self.url(Some("all"))).await
    }
}

fn found(response: HttpResponse) -> Result<bool, Error> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(false);
    }
    response.error_for_status()?;
    Ok(true)
}

impl Client {
    /// A role of `kind` named `name`
    pub fn role(&self, kind: ResourceKind, name: impl Into<String>) -> Role {
        Role {
            client: self.clone(),
            kind,
            name: name.into(),
        }
    }
}
