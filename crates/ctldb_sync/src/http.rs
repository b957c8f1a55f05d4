//! HTTP transport implementation.
//!
//! This module provides an HTTP-based [`RemoteStore`]. The actual HTTP client
//! is abstracted via a trait so tests can route requests in-process.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{record_values, MakeRecordRequest, QueryRequest, MAKE_RECORD_PATH, QUERY_PATH};
use crate::transport::{MockRemote, RemoteStore};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Status code the remote store returns on success.
pub const HTTP_OK: u16 = 200;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (connection refused,
/// timeout, ...). Any response, whatever its status, is `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body.
    fn post_json(&self, url: &str, body: String) -> Result<HttpResponse, String>;
}

/// Blocking HTTP client backed by a `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    /// Creates a client whose requests time out after `timeout` overall.
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl HttpClient for UreqClient {
    fn post_json(&self, url: &str, body: String) -> Result<HttpResponse, String> {
        let result = self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(&body);
        match result {
            Ok(resp) => {
                let status = resp.status();
                let body = resp
                    .into_string()
                    .map_err(|e| format!("failed to read response body: {e}"))?;
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Status(status, resp)) => Ok(HttpResponse {
                status,
                body: resp.into_string().unwrap_or_default(),
            }),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// HTTP-based remote store.
///
/// Uses JSON request and response bodies.
pub struct HttpRemote<C: HttpClient> {
    /// Base URL of the remote store (e.g., "http://127.0.0.1:9980").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Last transport or status error.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates a new HTTP remote.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn post<Req: Serialize>(&self, endpoint: &str, request: &Req) -> SyncResult<String> {
        let body = serde_json::to_string(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.client.post_json(&url, body).map_err(|e| {
            self.set_error(&e);
            SyncError::transport_retryable(e)
        })?;

        if response.status != HTTP_OK {
            self.set_error(&format!("{} from {endpoint}", response.status));
            return Err(SyncError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        *self.last_error.write() = None;
        Ok(response.body)
    }
}

impl<C: HttpClient> RemoteStore for HttpRemote<C> {
    fn make_record(&self, request: &MakeRecordRequest) -> SyncResult<String> {
        self.post(MAKE_RECORD_PATH, request)
    }

    fn query(&self, request: &QueryRequest) -> SyncResult<Vec<String>> {
        let body = self.post(QUERY_PATH, request)?;
        match serde_json::from_str::<Value>(&body) {
            Ok(results) => Ok(record_values(&results)),
            Err(e) => {
                debug!("unparseable query response ({e}), treating as empty");
                Ok(Vec::new())
            }
        }
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request. `Err` simulates a transport failure.
    fn handle_post(&self, path: &str, body: &str) -> Result<HttpResponse, String>;
}

/// A loopback HTTP client that routes requests directly to a server object.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post_json(&self, url: &str, body: String) -> Result<HttpResponse, String> {
        // Strip scheme and authority
        let path = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url);
        let path = path.find('/').map(|i| &path[i..]).unwrap_or("/");

        self.server.handle_post(path, &body)
    }
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for std::sync::Arc<S> {
    fn handle_post(&self, path: &str, body: &str) -> Result<HttpResponse, String> {
        (**self).handle_post(path, body)
    }
}

fn error_response(err: SyncError) -> Result<HttpResponse, String> {
    match err {
        SyncError::Rejected { status, body } => Ok(HttpResponse::new(status, body)),
        SyncError::Transport { message, .. } => Err(message),
        other => Ok(HttpResponse::new(500, other.to_string())),
    }
}

/// Serves the mock store over the loopback HTTP path, answering queries in
/// the remote store's nested result-set format.
impl LoopbackServer for MockRemote {
    fn handle_post(&self, path: &str, body: &str) -> Result<HttpResponse, String> {
        match path {
            MAKE_RECORD_PATH => {
                let request: MakeRecordRequest = match serde_json::from_str(body) {
                    Ok(request) => request,
                    Err(e) => return Ok(HttpResponse::new(400, e.to_string())),
                };
                match self.make_record(&request) {
                    Ok(confirmation) => Ok(HttpResponse::new(HTTP_OK, confirmation)),
                    Err(e) => error_response(e),
                }
            }
            QUERY_PATH => {
                let request: QueryRequest = match serde_json::from_str(body) {
                    Ok(request) => request,
                    Err(e) => return Ok(HttpResponse::new(400, e.to_string())),
                };
                let records = match self.query_records(&request) {
                    Ok(records) => records,
                    Err(e) => return error_response(e),
                };
                if let Some(raw) = self.raw_query_response() {
                    return Ok(HttpResponse::new(HTTP_OK, raw));
                }
                let sets: Vec<Value> = records
                    .into_iter()
                    .map(|record| {
                        json!([{
                            "Record": {
                                "Selectors": record.selectors,
                                "Timestamp": record.timestamp,
                            },
                            "Value": record.value,
                        }])
                    })
                    .collect();
                Ok(HttpResponse::new(HTTP_OK, Value::Array(sets).to_string()))
            }
            _ => Ok(HttpResponse::new(404, format!("no route for {path}"))),
        }
    }
}
