//! Secrets stored in variables

use conjur_tokens::transport::HttpRequest;
use url::Url;
use zeroize::Zeroizing;

use crate::{
    resource::{Resource, ResourceKind},
    Client, Error,
};

/// A variable holding a secret value
#[derive(Clone, Debug)]
pub struct Variable {
    resource: Resource,
}

impl Variable {
    /// The underlying resource
    #[inline]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// The name of the variable
    #[inline]
    pub fn name(&self) -> &str {
        self.resource.name()
    }

    /// The fully qualified identifier of the variable
    pub fn id(&self) -> String {
        self.resource.id()
    }

    fn url(&self) -> Url {
        let client = self.resource.client();
        client.endpoint([
            "secrets",
            client.account().as_str(),
            ResourceKind::Variable.as_str(),
            self.name(),
        ])
    }

    /// Fetches the current secret value
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn value(&self) -> Result<Zeroizing<Vec<u8>>, Error> {
        let client = self.resource.client();
        let request = client.authenticate(HttpRequest::get(self.url()))?;
        let response = client.send(request)?;
        Ok(Zeroizing::new(response.into_body().to_vec()))
    }

    /// Asynchronous variant of [`value()`][Self::value()]
    pub async fn value_async(&self) -> Result<Zeroizing<Vec<u8>>, Error> {
        let client = self.resource.client();
        let request = client
            .authenticate_async(HttpRequest::get(self.url()))
            .await?;
        let response = client.send_async(request).await?;
        Ok(Zeroizing::new(response.into_body().to_vec()))
    }

    fn add_secret_request(&self, value: &[u8]) -> HttpRequest {
        HttpRequest::post(self.url()).with_body("text/plain", value)
    }

    /// Stores a new secret value
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn add_secret(&self, value: &[u8]) -> Result<(), Error> {
        let client = self.resource.client();
        let request = client.authenticate(self.add_secret_request(value))?;
        client.send(request)?;
        tracing::debug!(variable = self.name(), "stored new secret value");
        Ok(())
    }

    /// Asynchronous variant of [`add_secret()`][Self::add_secret()]
    pub async fn add_secret_async(&self, value: &[u8]) -> Result<(), Error> {
        let client = self.resource.client();
        let request = client
            .authenticate_async(self.add_secret_request(value))
            .await?;
        client.send_async(request).await?;
        tracing::debug!(variable = self.name(), "stored new secret value");
        Ok(())
    }
}

impl Client {
    /// A variable named `name`
    pub fn variable(&self, name: impl Into<String>) -> Variable {
        Variable {
            resource: self.resource(ResourceKind::Variable, name),
        }
    }

    /// Lists variables, optionally matching `search`
    ///
    /// Pages of `limit` variables are requested from `offset` on, as with
    /// [`list_resources()`][Self::list_resources()].
    /// [`DEFAULT_PAGE_SIZE`][crate::resource::DEFAULT_PAGE_SIZE] and an
    /// offset of zero list every variable.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn list_variables(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Variable>, Error> {
        let listed = self.list_resources(ResourceKind::Variable, search, limit, offset)?;
        Ok(self.variables(listed))
    }

    /// Asynchronous variant of [`list_variables()`][Self::list_variables()]
    pub async fn list_variables_async(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Variable>, Error> {
        let listed = self
            .list_resources_async(ResourceKind::Variable, search, limit, offset)
            .await?;
        Ok(self.variables(listed))
    }

    /// Counts variables, optionally matching `search`
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn count_variables(&self, search: Option<&str>) -> Result<u64, Error> {
        self.count_resources(ResourceKind::Variable, search)
    }

    /// Asynchronous variant of [`count_variables()`][Self::count_variables()]
    pub async fn count_variables_async(&self, search: Option<&str>) -> Result<u64, Error> {
        self.count_resources_async(ResourceKind::Variable, search)
            .await
    }

    fn variables(&self, listed: Vec<crate::resource::ResourceMetadata>) -> Vec<Variable> {
        self.named(ResourceKind::Variable, listed)
            .map(|resource| Variable { resource })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use conjur_tokens::transport::mock::MockTransport;
    use reqwest::{header, StatusCode};

    use super::*;
    use crate::{
        resource::DEFAULT_PAGE_SIZE,
        test_support::{self, authorized},
    };

    const SECRET: &str = "test://example.com/secrets/test-account/variable/foo%2Fbar";

    #[test]
    fn value_is_fetched_with_encoded_name() {
        let mock = MockTransport::new();
        let client = test_support::logged_in(&mock);
        mock.mock(SECRET, "testvalue").with_verifier(authorized);

        let value = client.variable("foo/bar").value().unwrap();

        assert_eq!(value.as_slice(), b"testvalue");
    }

    #[tokio::test]
    async fn spaces_are_percent_encoded() {
        let mock = MockTransport::new();
        let client = test_support::logged_in(&mock);
        mock.mock(
            "test://example.com/secrets/test-account/variable/foo%20bar",
            "testvalue",
        )
        .with_verifier(authorized);

        let value = client.variable("foo bar").value_async().await.unwrap();

        assert_eq!(value.as_slice(), b"testvalue");
    }

    #[test]
    fn add_secret_posts_plain_text() {
        let mock = MockTransport::new();
        let client = test_support::logged_in(&mock);
        let handle = mock.mock(SECRET, "").with_verifier(|req| {
            authorized(req)?;
            let ok = req.method() == reqwest::Method::POST
                && req.headers()[header::CONTENT_TYPE] == "text/plain"
                && req.body() == Some(&b"new value"[..]);
            ok.then_some(()).ok_or(StatusCode::BAD_REQUEST)
        });

        client.variable("foo/bar").add_secret(b"new value").unwrap();

        assert_eq!(handle.hits(), 1);
    }

    #[tokio::test]
    async fn async_add_secret_reports_errors() {
        let mock = MockTransport::new();
        let client = test_support::logged_in(&mock);
        mock.mock_status(SECRET, StatusCode::UNPROCESSABLE_ENTITY, "bad value");

        let err = client
            .variable("foo/bar")
            .add_secret_async(b"new value")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Status(ref e) if e.status() == StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[test]
    fn missing_variable_is_an_error() {
        let mock = MockTransport::new();
        let client = test_support::logged_in(&mock);
        mock.mock_status(SECRET, StatusCode::NOT_FOUND, "");

        let err = client.variable("foo/bar").value().unwrap_err();

        assert!(matches!(err, Error::Status(_)));
    }

    #[test]
    fn listed_variables_are_addressable() {
        let mock = MockTransport::new();
        let client = test_support::logged_in(&mock);
        mock.mock(
            "test://example.com/resources/test-account/variable?offset=0&limit=10000",
            r#"[{"id":"test-account:variable:foo/bar"}]"#,
        );
        mock.mock(
            "test://example.com/resources/test-account/variable?offset=1&limit=10000",
            "[]",
        );
        mock.mock(SECRET, "testvalue");

        let variables = client.list_variables(None, DEFAULT_PAGE_SIZE, 0).unwrap();

        assert_eq!(variables.len(), 1);
        assert_eq!(variables[0].id(), "test-account:variable:foo/bar");
        assert_eq!(variables[0].value().unwrap().as_slice(), b"testvalue");
    }

    #[test]
    fn count_variables_forwards_search() {
        let mock = MockTransport::new();
        let client = test_support::logged_in(&mock);
        mock.mock(
            "test://example.com/resources/test-account/variable?count=true&search=dummy",
            r#"{"count":10}"#,
        );

        assert_eq!(client.count_variables(Some("dummy")).unwrap(), 10);
    }
}
