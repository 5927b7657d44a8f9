//! REST client for the punchlist backend.
//!
//! Every response is wrapped in the backend's `{success, data, error,
//! message}` envelope.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::connectivity::ConnectivityProbe;
use super::remote::{RemoteApi, RemoteError};
use crate::models::{EntityType, Photo, Project, PunchlistItem, User};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    message: Option<String>,
}

impl<T> ApiResponse<T> {
    fn failure_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "request failed".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        Self::with_options(base_url, None, DEFAULT_TIMEOUT)
    }

    pub fn with_options(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn collection_url(&self, entity_type: EntityType) -> String {
        self.url(entity_type.api_path())
    }

    fn entity_url(&self, entity_type: EntityType, id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(entity_type),
            urlencoding::encode(id)
        )
    }

    fn items_url(&self, project_id: &str) -> String {
        format!(
            "{}?projectId={}",
            self.collection_url(EntityType::PunchlistItem),
            urlencoding::encode(project_id)
        )
    }

    fn photos_url(&self, item_id: &str) -> String {
        self.url(&format!("photos/task/{}", urlencoding::encode(item_id)))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Option<T>, RemoteError> {
        tracing::debug!(%method, url, "Remote request");
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_transport_error)?;

        if bytes.is_empty() {
            return if status.is_success() {
                Ok(None)
            } else {
                Err(rejected(status, status.to_string()))
            };
        }

        let envelope: ApiResponse<T> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(rejected(status, String::from_utf8_lossy(&bytes).into_owned()))
            }
            Err(e) => return Err(RemoteError::InvalidResponse(e.to_string())),
        };

        if !status.is_success() || !envelope.success {
            let status = if status.is_success() {
                StatusCode::UNPROCESSABLE_ENTITY
            } else {
                status
            };
            return Err(rejected(status, envelope.failure_message()));
        }
        Ok(envelope.data)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, RemoteError> {
        self.send(Method::GET, url, None)
            .await?
            .ok_or_else(|| RemoteError::InvalidResponse(format!("no data in response from {}", url)))
    }
}

fn rejected(status: StatusCode, message: String) -> RemoteError {
    RemoteError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn map_transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::InvalidResponse(e.to_string())
    } else {
        RemoteError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn fetch_project(&self, id: &str) -> Result<Project, RemoteError> {
        self.get(&self.entity_url(EntityType::Project, id)).await
    }

    async fn fetch_items(&self, project_id: &str) -> Result<Vec<PunchlistItem>, RemoteError> {
        self.get(&self.items_url(project_id)).await
    }

    async fn fetch_photos(&self, item_id: &str) -> Result<Vec<Photo>, RemoteError> {
        self.get(&self.photos_url(item_id)).await
    }

    async fn fetch_users(&self) -> Result<Vec<User>, RemoteError> {
        self.get(&self.collection_url(EntityType::User)).await
    }

    async fn create(
        &self,
        entity_type: EntityType,
        payload: &Value,
    ) -> Result<Option<Value>, RemoteError> {
        self.send(Method::POST, &self.collection_url(entity_type), Some(payload))
            .await
    }

    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &Value,
    ) -> Result<Option<Value>, RemoteError> {
        self.send(Method::PUT, &self.entity_url(entity_type, id), Some(payload))
            .await
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError> {
        self.send::<Value>(Method::DELETE, &self.entity_url(entity_type, id), None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ConnectivityProbe for HttpRemote {
    async fn probe(&self) -> bool {
        check_server(&self.base_url).await
    }
}

/// Returns true if the server answers `GET /health` with a success status.
pub async fn check_server(base_url: &str) -> bool {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let client = match reqwest::Client::builder().timeout(HEALTH_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(url, error = %e, "Health check failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> HttpRemote {
        HttpRemote::new("http://localhost:3001/").unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(remote().base_url(), "http://localhost:3001");
    }

    #[test]
    fn test_entity_urls() {
        let r = remote();
        assert_eq!(
            r.collection_url(EntityType::PunchlistItem),
            "http://localhost:3001/api/punchlist"
        );
        assert_eq!(
            r.entity_url(EntityType::Project, "p1"),
            "http://localhost:3001/api/projects/p1"
        );
        assert_eq!(
            r.url("/photos/task/i1"),
            "http://localhost:3001/api/photos/task/i1"
        );
    }

    #[test]
    fn test_ids_are_encoded_in_urls() {
        let r = remote();
        assert_eq!(
            r.items_url("site 4&status=closed"),
            "http://localhost:3001/api/punchlist?projectId=site%204%26status%3Dclosed"
        );
        assert_eq!(
            r.entity_url(EntityType::Photo, "a/b"),
            "http://localhost:3001/api/photos/a%2Fb"
        );
        assert_eq!(
            r.photos_url("i 1"),
            "http://localhost:3001/api/photos/task/i%201"
        );
    }

    #[test]
    fn test_envelope_parsing() {
        let ok: ApiResponse<Vec<Value>> =
            serde_json::from_str(r#"{"success": true, "data": [{"id": "x"}]}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.data.unwrap().len(), 1);

        let failed: ApiResponse<Value> =
            serde_json::from_str(r#"{"success": false, "error": "Item not found"}"#).unwrap();
        assert_eq!(failed.failure_message(), "Item not found");

        let stub: ApiResponse<Value> =
            serde_json::from_str(r#"{"success": true, "message": "coming soon"}"#).unwrap();
        assert!(stub.data.is_none());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(rejected(StatusCode::NOT_FOUND, "gone".into()).is_not_found());
        assert!(!rejected(StatusCode::BAD_REQUEST, "bad".into()).is_not_found());
    }

    #[tokio::test]
    async fn test_check_server_unreachable() {
        // Port 9 (discard) is not expected to run an HTTP server.
        assert!(!check_server("http://127.0.0.1:9").await);
    }
}
