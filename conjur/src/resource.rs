//! Resources and resource listings

use std::fmt;

use conjur_tokens::{
    transport::{HttpRequest, HttpResponse},
    AccountRef,
};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Client, Error};

/// The page size to pass to the listing calls when there is no better choice
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// The kinds of resource known to Conjur
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A human user
    User,
    /// A machine identity
    Host,
    /// A collection of hosts
    Layer,
    /// A collection of users
    Group,
    /// A policy branch
    Policy,
    /// A secret
    Variable,
    /// A protected web service
    Webservice,
}

impl ResourceKind {
    /// The kind as it appears in identifiers and URLs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Host => "host",
            Self::Layer => "layer",
            Self::Group => "group",
            Self::Policy => "policy",
            Self::Variable => "variable",
            Self::Webservice => "webservice",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A permission granted on a resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// The granted privilege, such as `execute`
    pub privilege: String,
    /// The role holding the privilege
    pub role: String,
    /// The policy that granted the privilege
    #[serde(default)]
    pub policy: Option<String>,
}

/// An annotation on a resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// The annotation name
    pub name: String,
    /// The annotation value
    pub value: String,
    /// The policy that set the annotation
    #[serde(default)]
    pub policy: Option<String>,
}

/// A resource as returned by a listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// The fully qualified identifier, `{account}:{kind}:{name}`
    pub id: String,
    /// The owning role
    #[serde(default)]
    pub owner: Option<String>,
    /// The policy that defined the resource
    #[serde(default)]
    pub policy: Option<String>,
    /// When the resource was created
    #[serde(default)]
    pub created_at: Option<String>,
    /// Permissions granted on the resource
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Annotations on the resource
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// A resource of some kind, addressed by name
#[derive(Clone, Debug)]
pub struct Resource {
    client: Client,
    kind: ResourceKind,
    name: String,
}

impl Resource {
    pub(crate) fn new(client: Client, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            client,
            kind,
            name: name.into(),
        }
    }

    /// The kind of resource
    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The name of the resource within its kind
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The client used to query this resource
    #[inline]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The fully qualified identifier, `{account}:{kind}:{name}`
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.client.account(), self.kind, self.name)
    }

    /// Strips the `{account}:{kind}:` prefix from a fully qualified identifier
    ///
    /// Identifiers with a different prefix are returned unchanged.
    pub fn id_to_name<'a>(id: &'a str, account: &AccountRef, kind: ResourceKind) -> &'a str {
        id.strip_prefix(account.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .and_then(|rest| rest.strip_prefix(kind.as_str()))
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(id)
    }

    pub(crate) fn url(&self) -> Url {
        self.client.endpoint([
            "resources",
            self.client.account().as_str(),
            self.kind.as_str(),
            self.name.as_str(),
        ])
    }

    fn check_url(&self, privilege: &str) -> Url {
        let mut url = self.url();
        url.query_pairs_mut()
            .append_pair("check", "true")
            .append_pair("privilege", privilege);
        url
    }

    /// Whether the current role holds `privilege` on this resource
    ///
    /// Sent as a `HEAD` request; a `403 Forbidden` answer means the privilege
    /// is not held.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn check(&self, privilege: &str) -> Result<bool, Error> {
        let request = self
            .client
            .authenticate(HttpRequest::new(Method::HEAD, self.check_url(privilege)))?;
        permitted(self.client.exchange(request)?)
    }

    /// Asynchronous variant of [`check()`][Self::check()]
    pub async fn check_async(&self, privilege: &str) -> Result<bool, Error> {
        let request = self
            .client
            .authenticate_async(HttpRequest::new(Method::HEAD, self.check_url(privilege)))
            .await?;
        permitted(self.client.exchange_async(request).await?)
    }
}

fn permitted(response: HttpResponse) -> Result<bool, Error> {
    if response.status() == StatusCode::FORBIDDEN {
        return Ok(false);
    }
    response.error_for_status()?;
    Ok(true)
}

#[derive(Deserialize)]
struct Count {
    count: u64,
}

impl Client {
    /// A resource of `kind` named `name`
    pub fn resource(&self, kind: ResourceKind, name: impl Into<String>) -> Resource {
        Resource::new(self.clone(), kind, name)
    }

    /// A user named `name`
    pub fn user(&self, name: impl Into<String>) -> Resource {
        self.resource(ResourceKind::User, name)
    }

    fn listing_url(&self, kind: ResourceKind) -> Url {
        self.endpoint(["resources", self.account().as_str(), kind.as_str()])
    }

    fn page_url(&self, kind: ResourceKind, search: Option<&str>, limit: usize, offset: usize) -> Url {
        let mut url = self.listing_url(kind);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("offset", &offset.to_string())
                .append_pair("limit", &limit.to_string());
            if let Some(search) = search {
                query.append_pair("search", search);
            }
        }
        url
    }

    fn count_url(&self, kind: ResourceKind, search: Option<&str>) -> Url {
        let mut url = self.listing_url(kind);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("count", "true");
            if let Some(search) = search {
                query.append_pair("search", search);
            }
        }
        url
    }

    /// Lists resources of `kind`, starting at `offset`
    ///
    /// Pages of `limit` resources are requested until the server answers with
    /// an empty page. A `limit` of zero is treated as one.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn list_resources(
        &self,
        kind: ResourceKind,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ResourceMetadata>, Error> {
        let limit = limit.max(1);
        let mut resources = Vec::new();
        loop {
            let page: Vec<ResourceMetadata> =
                self.get_json(self.page_url(kind, search, limit, offset + resources.len()))?;
            if page.is_empty() {
                break;
            }
            tracing::trace!(%kind, page.len = page.len(), "received page of resources");
            resources.extend(page);
        }
        Ok(resources)
    }

    /// Asynchronous variant of [`list_resources()`][Self::list_resources()]
    pub async fn list_resources_async(
        &self,
        kind: ResourceKind,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ResourceMetadata>, Error> {
        let limit = limit.max(1);
        let mut resources = Vec::new();
        loop {
            let page: Vec<ResourceMetadata> = self
                .get_json_async(self.page_url(kind, search, limit, offset + resources.len()))
                .await?;
            if page.is_empty() {
                break;
            }
            tracing::trace!(%kind, page.len = page.len(), "received page of resources");
            resources.extend(page);
        }
        Ok(resources)
    }

    /// Counts resources of `kind`, optionally matching `search`
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn count_resources(&self, kind: ResourceKind, search: Option<&str>) -> Result<u64, Error> {
        let count: Count = self.get_json(self.count_url(kind, search))?;
        Ok(count.count)
    }

    /// Asynchronous variant of [`count_resources()`][Self::count_resources()]
    pub async fn count_resources_async(
        &self,
        kind: ResourceKind,
        search: Option<&str>,
    ) -> Result<u64, Error> {
        let count: Count = self.get_json_async(self.count_url(kind, search)).await?;
        Ok(count.count)
    }

    /// Lists users, optionally matching `search`, paging as
    /// [`list_resources()`][Self::list_resources()] does
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn list_users(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Resource>, Error> {
        let listed = self.list_resources(ResourceKind::User, search, limit, offset)?;
        Ok(self.named(ResourceKind::User, listed).collect())
    }

    /// Asynchronous variant of [`list_users()`][Self::list_users()]
    pub async fn list_users_async(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Resource>, Error> {
        let listed = self
            .list_resources_async(ResourceKind::User, search, limit, offset)
            .await?;
        Ok(self.named(ResourceKind::User, listed).collect())
    }

    pub(crate) fn named(
        &self,
        kind: ResourceKind,
        listed: Vec<ResourceMetadata>,
    ) -> impl Iterator<Item = Resource> + '_ {
        listed.into_iter().map(move |r| {
            let name = Resource::id_to_name(&r.id, self.account(), kind);
            self.resource(kind, name)
        })
    }
}

#[cfg(test)]
mod tests {
    use conjur_tokens::{transport::mock::MockTransport, Account};

    use super::*;
    use crate::test_support::{self, authorized};

    const VARIABLES: &str = "test://example.com/resources/test-account/variable";

    fn page(from: usize, to: usize) -> String {
        let ids: Vec<_> = (from..to)
            .map(|i| format!(r#"{{"id":"test-account:variable:id{i}"}}"#))
            .collect();
        format!("[{}]", ids.join(","))
    }

    #[test]
    fn id_is_fully_qualified() {
        let client = test_support::client(&MockTransport::new());
        let resource = client.resource(ResourceKind::Layer, "dev/apps");

        assert_eq!(resource.id(), "test-account:layer:dev/apps");
    }

    #[test]
    fn id_to_name_strips_account_and_kind() {
        let account = Account::from_static("test-account");

        assert_eq!(
            Resource::id_to_name("test-account:variable:db/password", &account, ResourceKind::Variable),
            "db/password"
        );
        assert_eq!(
            Resource::id_to_name("other:variable:db/password", &account, ResourceKind::Variable),
            "other:variable:db/password"
        );
        assert_eq!(
            Resource::id_to_name("test-account:host:db", &account, ResourceKind::Variable),
            "test-account:host:db"
        );
    }

    mod when_checking_privileges {
        use super::*;

        const CHECK: &str =
            "test://example.com/resources/test-account/variable/db%2Fpassword?check=true&privilege=fry";

        fn authorized_head(req: &HttpRequest) -> Result<(), StatusCode> {
            authorized(req)?;
            (req.method() == Method::HEAD)
                .then_some(())
                .ok_or(StatusCode::METHOD_NOT_ALLOWED)
        }

        #[test]
        fn forbidden_means_not_permitted() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock);
            let resource = client.resource(ResourceKind::Variable, "db/password");

            mock.mock(CHECK, "").with_verifier(authorized_head);
            assert!(resource.check("fry").unwrap());

            mock.mock_status(CHECK, StatusCode::FORBIDDEN, "");
            assert!(!resource.check("fry").unwrap());
        }

        #[tokio::test]
        async fn async_check_agrees() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock);
            let resource = client.resource(ResourceKind::Variable, "db/password");

            mock.mock(CHECK, "").with_verifier(authorized_head);
            assert!(resource.check_async("fry").await.unwrap());

            mock.mock_status(CHECK, StatusCode::FORBIDDEN, "");
            assert!(!resource.check_async("fry").await.unwrap());
        }

        #[test]
        fn other_errors_are_reported() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock);
            mock.mock_status(CHECK, StatusCode::NOT_FOUND, "no such resource");

            let err = client
                .resource(ResourceKind::Variable, "db/password")
                .check("fry")
                .unwrap_err();

            assert!(matches!(err, Error::Status(ref e) if e.body() == "no such resource"));
        }
    }

    mod when_listing {
        use super::*;

        #[test]
        fn pages_until_empty() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock);
            let first = mock
                .mock(&format!("{VARIABLES}?offset=0&limit=1000"), page(0, 1000))
                .with_verifier(authorized);
            let second = mock
                .mock(&format!("{VARIABLES}?offset=1000&limit=1000"), page(1000, 1500))
                .with_verifier(authorized);
            let last = mock.mock(&format!("{VARIABLES}?offset=1500&limit=1000"), "[]");

            let listed = client
                .list_resources(ResourceKind::Variable, None, 1000, 0)
                .unwrap();

            assert_eq!(listed.len(), 1500);
            assert_eq!(listed[1499].id, "test-account:variable:id1499");
            assert_eq!((first.hits(), second.hits(), last.hits()), (1, 1, 1));
        }

        #[tokio::test]
        async fn search_and_offset_are_forwarded() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock);
            mock.mock(
                &format!("{VARIABLES}?offset=10&limit=5&search=db+pass"),
                page(10, 12),
            );
            mock.mock(&format!("{VARIABLES}?offset=12&limit=5&search=db+pass"), "[]");

            let listed = client
                .list_resources_async(ResourceKind::Variable, Some("db pass"), 5, 10)
                .await
                .unwrap();

            assert_eq!(listed.len(), 2);
            assert_eq!(listed[0].id, "test-account:variable:id10");
        }

        #[test]
        fn acting_as_follows_the_paging_parameters() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock).acting_as("test-account:user:alice");
            mock.mock(
                &format!("{VARIABLES}?offset=0&limit=10000&acting_as=test-account%3Auser%3Aalice"),
                "[]",
            );

            let listed = client
                .list_resources(ResourceKind::Variable, None, DEFAULT_PAGE_SIZE, 0)
                .unwrap();

            assert!(listed.is_empty());
        }

        #[test]
        fn invalid_json_is_a_deserialization_error() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock);
            mock.mock(&format!("{VARIABLES}?offset=0&limit=1000"), "[{\"id\":");

            let err = client
                .list_resources(ResourceKind::Variable, None, 1000, 0)
                .unwrap_err();

            assert!(matches!(err, Error::Deserialize(_)));
        }

        #[test]
        fn users_are_named_without_prefix() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock);
            mock.mock(
                "test://example.com/resources/test-account/user?offset=5&limit=2",
                r#"[{"id":"test-account:user:alice"},{"id":"test-account:user:bob"}]"#,
            );
            mock.mock(
                "test://example.com/resources/test-account/user?offset=7&limit=2",
                "[]",
            );

            let users = client.list_users(None, 2, 5).unwrap();

            let names: Vec<_> = users.iter().map(Resource::name).collect();
            assert_eq!(names, ["alice", "bob"]);
            assert!(users.iter().all(|u| u.kind() == ResourceKind::User));
        }
    }

    mod when_counting {
        use super::*;

        #[test]
        fn count_is_parsed() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock);
            mock.mock(
                &format!("{VARIABLES}?count=true&search=dummy"),
                r#"{"count":10}"#,
            )
            .with_verifier(authorized);

            assert_eq!(
                client
                    .count_resources(ResourceKind::Variable, Some("dummy"))
                    .unwrap(),
                10
            );
        }

        #[tokio::test]
        async fn async_count_without_search() {
            let mock = MockTransport::new();
            let client = test_support::logged_in(&mock);
            mock.mock(&format!("{VARIABLES}?count=true"), r#"{"count":3}"#);

            assert_eq!(
                client
                    .count_resources_async(ResourceKind::Variable, None)
                    .await
                    .unwrap(),
                3
            );
        }
    }
}
