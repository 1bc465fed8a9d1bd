use super::{auth::AuthManager, error::*, types::*};
use crate::config::Environment;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

const LOGON_TOKEN_HEADER: &str = "X-SAP-LogonToken";

/// Authenticated JSON/binary requests against one environment.
pub struct CrudOperations {
    client: reqwest::Client,
    environment: Environment,
    auth_manager: Arc<AuthManager>,
}

impl CrudOperations {
    pub fn new(
        client: reqwest::Client,
        environment: Environment,
        auth_manager: Arc<AuthManager>,
    ) -> Self {
        Self {
            client,
            environment,
            auth_manager,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    fn url(&self, path: &str, params: Option<&ListParams>) -> String {
        let mut url = format!("{}{}", self.environment.url.trim_end_matches('/'), path);
        if let Some(params) = params {
            let query = params.to_query();
            if !query.is_empty() {
                url.push('?');
                url.push_str(&query);
            }
        }
        url
    }

    /// Sends the request built by `build` with the cached session token.
    /// A rejected session is dropped and the request is sent once more
    /// after a fresh logon.
    async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.auth_manager.get_valid_token(&self.environment).await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Session rejected by {}, logging on again", self.environment.url);
        self.auth_manager.invalidate(&self.environment).await;
        let token = self.auth_manager.get_valid_token(&self.environment).await?;
        Ok(build(&token).send().await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: Option<&ListParams>) -> Result<T> {
        debug!("GET {}", path);
        let url = self.url(path, params);
        let response = self
            .send(|token| self.client.get(&url).header(LOGON_TOKEN_HEADER, token))
            .await?;
        self.handle_response(response).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        debug!("POST {}", path);
        let url = self.url(path, None);
        let response = self
            .send(|token| {
                self.client
                    .post(&url)
                    .header(LOGON_TOKEN_HEADER, token)
                    .json(body)
            })
            .await?;
        self.handle_response(response).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        debug!("PUT {}", path);
        let url = self.url(path, None);
        let response = self
            .send(|token| {
                self.client
                    .put(&url)
                    .header(LOGON_TOKEN_HEADER, token)
                    .json(body)
            })
            .await?;
        self.handle_response(response).await
    }

    /// Downloads a binary payload.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        debug!("GET (binary) {}", path);
        let url = self.url(path, None);
        let response = self
            .send(|token| {
                self.client
                    .get(&url)
                    .header(LOGON_TOKEN_HEADER, token)
                    .header(reqwest::header::ACCEPT, "application/octet-stream")
            })
            .await?;

        if response.status().is_success() {
            Ok(response.bytes().await?.to_vec())
        } else {
            Err(self.parse_error_response(response).await)
        }
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        if response.status().is_success() {
            let content: T = response.json().await?;
            Ok(content)
        } else {
            Err(self.parse_error_response(response).await)
        }
    }

    async fn parse_error_response(&self, response: reqwest::Response) -> DirectoryError {
        let status = response.status();

        match status {
            StatusCode::UNAUTHORIZED => {
                warn!("Session rejected again by {}, dropping cached token", self.environment.url);
                self.auth_manager.invalidate(&self.environment).await;
                DirectoryError::Authentication("Unauthorized".to_string())
            }
            StatusCode::FORBIDDEN => DirectoryError::Authorization("Forbidden".to_string()),
            StatusCode::NOT_FOUND => DirectoryError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());

                DirectoryError::RateLimit { retry_after }
            }
            status if status.is_client_error() => {
                let error_text = response.text().await.unwrap_or_default();

                match serde_json::from_str::<ErrorResponse>(&error_text) {
                    Ok(error_response) if !error_response.message.is_empty() => {
                        DirectoryError::Validation(error_response.message)
                    }
                    _ => DirectoryError::Server {
                        status: status.as_u16(),
                        message: error_text,
                    },
                }
            }
            status if status.is_server_error() => {
                let error_text = response.text().await.unwrap_or_default();
                DirectoryError::Server {
                    status: status.as_u16(),
                    message: error_text,
                }
            }
            _ => {
                let error_text = response.text().await.unwrap_or_default();
                DirectoryError::Unknown(error_text)
            }
        }
    }
}
