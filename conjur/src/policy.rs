use conjur_tokens::transport::HttpRequest;
use url::Url;

use crate::{Client, Error};

/// A policy branch that policy documents can be loaded into
#[derive(Clone, Debug)]
pub struct Policy {
    client: Client,
    name: String,
}

impl Policy {
    /// The name of the policy branch
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> Url {
        self.client.endpoint([
            "policies",
            self.client.account().as_str(),
            "policy",
            self.name.as_str(),
        ])
    }

    fn load_request(&self, policy: Vec<u8>) -> HttpRequest {
        HttpRequest::post(self.url()).with_body("application/x-yaml", policy)
    }

    /// Loads a policy document into this branch
    ///
    /// Returns the server's report, which includes the API keys of any roles
    /// the document created.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn load(&self, policy: impl Into<Vec<u8>>) -> Result<String, Error> {
        let request = self.client.authenticate(self.load_request(policy.into()))?;
        let report = self.client.send(request)?.text()?;
        tracing::info!(policy = %self.name, "loaded policy");
        Ok(report)
    }

    /// Asynchronous variant of [`load()`][Self::load()]
    pub async fn load_async(&self, policy: impl Into<Vec<u8>>) -> Result<String, Error> {
        let request = self
            .client
            .authenticate_async(self.load_request(policy.into()))
            .await?;
        let report = self.client.send_async(request).await?.text()?;
        tracing::info!(policy = %self.name, "loaded policy");
        Ok(report)
    }
}

impl Client {
    /// The policy branch named `name`, such as `root`
    pub fn policy(&self, name: impl Into<String>) -> Policy {
        Policy {
            client: self.clone(),
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use conjur_tokens::transport::mock::MockTransport;
    use reqwest::{header, StatusCode};

    use super::*;
    use crate::test_support::{self, authorized};

    const DOCUMENT: &str = "- !variable db/password\n";
    const REPORT: &str = r#"{"created_roles":{},"version":1}"#;

    #[test]
    fn document_is_posted_and_report_returned() {
        let mock = MockTransport::new();
        let client = test_support::logged_in(&mock);
        let handle = mock
            .mock(
                "test://example.com/policies/test-account/policy/apps%2Fdev",
                REPORT,
            )
            .with_verifier(|req| {
                authorized(req)?;
                let ok = req.method() == reqwest::Method::POST
                    && req.headers()[header::CONTENT_TYPE] == "application/x-yaml"
                    && req.body() == Some(DOCUMENT.as_bytes());
                ok.then_some(()).ok_or(StatusCode::BAD_REQUEST)
            });

        let report = client.policy("apps/dev").load(DOCUMENT).unwrap();

        assert_eq!(report, REPORT);
        assert_eq!(handle.hits(), 1);
    }

    #[tokio::test]
    async fn rejected_document_is_reported() {
        let mock = MockTransport::new();
        let client = test_support::logged_in(&mock);
        mock.mock_status(
            "test://example.com/policies/test-account/policy/root",
            StatusCode::UNPROCESSABLE_ENTITY,
            "syntax error",
        );

        let err = client.policy("root").load_async(DOCUMENT).await.unwrap_err();

        assert!(matches!(err, Error::Status(ref e) if e.body() == "syntax error"));
    }
}
