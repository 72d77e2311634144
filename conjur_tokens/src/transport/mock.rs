//! An in-process transport for tests
//!
//! Responses are registered per URL. Every mocked route keeps a hit counter,
//! can delay its response to widen race windows, and can run a verifier
//! against the incoming request. A verifier that returns an error status
//! turns the response into that status.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::HeaderMap, StatusCode};

use super::{HttpRequest, HttpResponse, HttpTransport, TransportError};

type Verifier = Arc<dyn Fn(&HttpRequest) -> Result<(), StatusCode> + Send + Sync>;

#[derive(Clone)]
struct Route {
    status: StatusCode,
    body: Bytes,
    delay: Duration,
    verifier: Option<Verifier>,
    hits: Arc<AtomicUsize>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("status", &self.status)
            .field("body", &self.body)
            .field("delay", &self.delay)
            .field("has_verifier", &self.verifier.is_some())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .finish()
    }
}

/// A transport that answers from a table of mocked responses
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockTransport {
    /// Constructs an empty mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Responds to requests for `url` with a `200 OK` and `body`
    pub fn mock(&self, url: &str, body: impl Into<Bytes>) -> MockHandle {
        self.mock_status(url, StatusCode::OK, body)
    }

    /// Responds to requests for `url` with `status` and `body`
    ///
    /// Replaces any existing route for the same URL.
    pub fn mock_status(&self, url: &str, status: StatusCode, body: impl Into<Bytes>) -> MockHandle {
        let hits = Arc::new(AtomicUsize::new(0));
        let route = Route {
            status,
            body: body.into(),
            delay: Duration::ZERO,
            verifier: None,
            hits: Arc::clone(&hits),
        };

        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_owned(), route);

        MockHandle {
            transport: self.clone(),
            url: url.to_owned(),
            hits,
        }
    }

    /// Removes all routes and forgets all recorded requests
    pub fn clear(&self) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// All requests received so far, in arrival order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn accept(&self, request: &HttpRequest) -> Option<Route> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request.url().as_str())
            .cloned()
    }

    fn respond(route: Option<Route>, request: &HttpRequest) -> HttpResponse {
        let url = request.url().clone();
        let Some(route) = route else {
            return HttpResponse::new(
                url.clone(),
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                Bytes::from(format!("no mock registered for {url}")),
            );
        };

        let verified = route
            .verifier
            .as_ref()
            .map_or(Ok(()), |verify| verify(request));

        route.hits.fetch_add(1, Ordering::AcqRel);

        match verified {
            Ok(()) => HttpResponse::new(url, route.status, HeaderMap::new(), route.body),
            Err(status) => HttpResponse::new(url, status, HeaderMap::new(), Bytes::new()),
        }
    }

    fn update(&self, url: &str, f: impl FnOnce(&mut Route)) {
        if let Some(route) = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(url)
        {
            f(route);
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    fn send_blocking(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let route = self.accept(&request);
        if let Some(delay) = route.as_ref().map(|r| r.delay).filter(|d| !d.is_zero()) {
            std::thread::sleep(delay);
        }
        Ok(Self::respond(route, &request))
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let route = self.accept(&request);
        if let Some(delay) = route.as_ref().map(|r| r.delay).filter(|d| !d.is_zero()) {
            tokio::time::sleep(delay).await;
        }
        Ok(Self::respond(route, &request))
    }
}

/// A handle to a mocked route
#[derive(Debug)]
pub struct MockHandle {
    transport: MockTransport,
    url: String,
    hits: Arc<AtomicUsize>,
}

impl MockHandle {
    /// Delays every response on this route by `delay`
    pub fn with_delay(self, delay: Duration) -> Self {
        self.transport.update(&self.url, |r| r.delay = delay);
        self
    }

    /// Runs `verifier` against every request on this route
    ///
    /// If the verifier returns an error status, the response carries that
    /// status and an empty body.
    pub fn with_verifier<F>(self, verifier: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<(), StatusCode> + Send + Sync + 'static,
    {
        self.transport
            .update(&self.url, |r| r.verifier = Some(Arc::new(verifier)));
        self
    }

    /// The number of requests this route has answered
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Acquire)
    }
}
