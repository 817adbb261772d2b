//! HTTP transport seam
//!
//! The coordination layer only needs host, port, path, method, body and
//! headers. `Transport` abstracts the actual call so tests can count and
//! script network round-trips.

use crate::endpoint::{Credentials, Endpoint};
use crate::error::{RestError, RestResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// HTTP verbs used by the REST interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(RestError::Argument(format!("unsupported HTTP method: {}", other))),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One physical HTTP call
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub endpoint: Endpoint,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub auth: Option<Credentials>,
}

impl HttpRequest {
    /// Build a request; `Content-Type` is only set when there is a body
    pub fn new(method: Method, endpoint: Endpoint, body: Option<String>) -> Self {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        Self {
            method,
            endpoint,
            headers,
            body,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<Credentials>) -> Self {
        self.auth = auth;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response: status code and body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Performs physical HTTP calls
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one call. Only failures to complete the call are errors;
    /// any status code is a successful response at this level.
    async fn execute(&self, request: HttpRequest) -> RestResult<HttpResponse>;
}

/// `Transport` backed by reqwest
///
/// Redirects are never followed: a 3xx reply is handed back as is, so it
/// surfaces as an API error like any other status above 204.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> RestResult<Self> {
        Self::build(Client::builder())
    }

    /// Transport with a custom user agent
    pub fn with_user_agent(user_agent: &str) -> RestResult<Self> {
        Self::build(Client::builder().user_agent(user_agent))
    }

    fn build(builder: reqwest::ClientBuilder) -> RestResult<Self> {
        let client = builder
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RestError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> RestResult<HttpResponse> {
        let mut builder = self.client.request(request.method.into(), request.endpoint.href());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = &request.auth {
            builder = builder.basic_auth(&auth.username, auth.password.as_ref());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}
