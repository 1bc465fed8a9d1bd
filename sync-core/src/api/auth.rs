use super::{error::DirectoryError, error::Result, types::*};
use crate::config::Environment;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct AuthState {
    pub token: String,
    pub obtained_at: DateTime<Utc>,
}

/// Logon token cache shared by every client built from the same factory.
///
/// Tokens are keyed by `url:username`, so two handles bound to the same
/// environment reuse a single session.
pub struct AuthManager {
    client: reqwest::Client,
    tokens: Arc<RwLock<HashMap<String, AuthState>>>,
}

impl AuthManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn cache_key(environment: &Environment) -> String {
        format!("{}:{}", environment.url, environment.username)
    }

    pub async fn get_valid_token(&self, environment: &Environment) -> Result<String> {
        let key = Self::cache_key(environment);
        {
            let tokens = self.tokens.read().await;
            if let Some(state) = tokens.get(&key) {
                return Ok(state.token.clone());
            }
        }

        let token = self.logon(environment).await?;
        let mut tokens = self.tokens.write().await;
        tokens.insert(
            key,
            AuthState {
                token: token.clone(),
                obtained_at: Utc::now(),
            },
        );
        Ok(token)
    }

    async fn logon(&self, environment: &Environment) -> Result<String> {
        info!("Authenticating to {}", environment.url);

        let request = LogonRequest {
            user_name: environment.username.clone(),
            password: environment.password.clone(),
            auth: environment.auth_type.clone(),
        };

        let response = self
            .client
            .post(format!("{}/logon/long", environment.url.trim_end_matches('/')))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Authentication(error_text));
        }

        let logon: LogonResponse = response.json().await?;
        if logon.logon_token.is_empty() {
            return Err(DirectoryError::Authentication(
                "Failed to obtain authentication token".to_string(),
            ));
        }

        debug!("Logon to {} successful", environment.url);
        Ok(logon.logon_token)
    }

    /// Drops the cached session so the next call logs on again.
    pub async fn invalidate(&self, environment: &Environment) {
        let key = Self::cache_key(environment);
        if self.tokens.write().await.remove(&key).is_some() {
            debug!("Dropped cached logon token for {}", environment.url);
        }
    }

    pub async fn is_authenticated(&self, environment: &Environment) -> bool {
        self.tokens
            .read()
            .await
            .contains_key(&Self::cache_key(environment))
    }
}
