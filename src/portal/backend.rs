//! Portal backend seam: the web application's HTTP routes.

use super::error::PortalError;
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A request against a path relative to the backend root.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub method: Method,
    pub path: String,
    pub body: Body,
}

impl BackendRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::Get,
            path: path.to_string(),
            body: Body::Empty,
        }
    }

    pub fn post_json(path: &str, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            path: path.to_string(),
            body: Body::Json(body),
        }
    }

    pub fn post_form(path: &str, fields: &[(&str, &str)]) -> Self {
        Self {
            method: Method::Post,
            path: path.to_string(),
            body: Body::Form(form(fields)),
        }
    }

    pub fn delete_form(path: &str, fields: &[(&str, &str)]) -> Self {
        Self {
            method: Method::Delete,
            path: path.to_string(),
            body: Body::Form(form(fields)),
        }
    }

    /// Value of a form field, if this is a form request.
    pub fn field(&self, name: &str) -> Option<&str> {
        match &self.body {
            Body::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

fn form(fields: &[(&str, &str)]) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub status: u16,
    /// Final path after redirects
    pub path: String,
    pub body: String,
}

impl BackendResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, PortalError> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Fail with [`PortalError::Status`] unless the status is 2xx.
    pub fn ensure_ok(self) -> Result<Self, PortalError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(PortalError::Status { status: self.status })
        }
    }
}

/// JSON envelope of the delivery routes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    /// A sentence, or a list of discrepancies
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub retry_items: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn message_text(&self) -> Option<String> {
        match self.message.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            other => Some(other.to_string()),
        }
    }

    /// Items the backend could not record and wants retried.
    pub fn pending_retry(&self) -> Option<&serde_json::Value> {
        match &self.retry_items {
            Some(serde_json::Value::Array(items)) if !items.is_empty() => self.retry_items.as_ref(),
            Some(serde_json::Value::Object(items)) if !items.is_empty() => self.retry_items.as_ref(),
            _ => None,
        }
    }
}

/// Identity pool coordinates served by `GET /config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortalConfig {
    pub user_pool_id: String,
    pub client_id: String,
    pub region: String,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, PortalError>;
}

/// Backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base: &str) -> Result<Self, PortalError> {
        let base = Url::parse(base).map_err(|e| PortalError::Url(format!("{}: {}", base, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    pub fn url(&self, path: &str) -> Result<Url, PortalError> {
        self.base
            .join(path)
            .map_err(|e| PortalError::Url(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, PortalError> {
        let url = self.url(&request.path)?;
        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };
        let builder = match &request.body {
            Body::Empty => builder,
            Body::Json(v) => builder.json(v),
            Body::Form(fields) => builder.form(fields),
        };
        tracing::debug!(path = %request.path, method = ?request.method, "backend request");
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let path = response.url().path().to_string();
        let body = response.text().await?;
        Ok(BackendResponse { status, path, body })
    }
}
