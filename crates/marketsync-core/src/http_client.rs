//! Minimal HTTP transport seam for the bridge adapter.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};

const USER_AGENT: &str = concat!("marketsync/", env!("CARGO_PKG_VERSION"));
const JSON: &str = "application/json";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One bridge call. Bodies are always JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub json_body: Option<String>,
    /// Sent as `Authorization: Bearer <token>`.
    pub bearer: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            json_body: None,
            bearer: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            json_body: Some(body.into()),
            ..Self::get(url)
        }
    }

    /// Blank tokens are dropped.
    pub fn with_bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_owned);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, 200..=299)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    /// Nothing is listening at the target address.
    Connect,
    Timeout,
    Body,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: HttpErrorKind,
    message: String,
}

impl HttpError {
    pub fn new(kind: HttpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(HttpErrorKind::Connect, message)
    }

    pub const fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_connect(&self) -> bool {
        matches!(self.kind, HttpErrorKind::Connect)
    }

    fn from_reqwest(error: &reqwest::Error) -> Self {
        let kind = if error.is_connect() {
            HttpErrorKind::Connect
        } else if error.is_timeout() {
            HttpErrorKind::Timeout
        } else if error.is_body() || error.is_decode() {
            HttpErrorKind::Body
        } else {
            HttpErrorKind::Other
        };
        Self::new(kind, error.to_string())
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HttpError {}

/// Boxed future returned by [`HttpClient::execute`].
pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// Transport used by the bridge adapter; tests swap in a recording fake.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// reqwest-backed transport with a shared connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client)
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let HttpRequest {
                method,
                url,
                json_body,
                bearer,
                timeout,
            } = request;

            let mut builder = match method {
                HttpMethod::Get => self.client.get(url),
                HttpMethod::Post => self.client.post(url),
            }
            .header(ACCEPT, JSON)
            .timeout(timeout);
            if let Some(token) = bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(body) = json_body {
                builder = builder.header(CONTENT_TYPE, JSON).body(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|error| HttpError::from_reqwest(&error))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|error| HttpError::from_reqwest(&error))?;
            Ok(HttpResponse::new(status, body))
        })
    }
}
