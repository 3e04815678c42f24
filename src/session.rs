//! API session for the hosted contract service.
//!
//! Only used for login and for enriching identity displays with the user's
//! name. The form works the same when the session never connects.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::FormConfig;
use crate::error::{FormError, FormResult};

const TOKEN_HEADER: &str = "OPENLAW_JWT";
const SEARCH_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connected { email: String },
}

/// One hit from the user search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserSummary {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<UserSummary>,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    token: Option<String>,
}

pub struct ApiSession {
    http: Client,
    base_url: String,
    state: RwLock<SessionState>,
}

impl ApiSession {
    pub fn new(base_url: impl Into<String>) -> FormResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: RwLock::new(SessionState {
                status: SessionStatus::Disconnected,
                token: None,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.status.clone()
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.state.read().await.status, SessionStatus::Connected { .. })
    }

    /// Log in. Any previous session is replaced.
    pub async fn connect(&self, email: &str, password: &str) -> FormResult<()> {
        let url = format!("{}/app/login", self.base_url);

        let response = self
            .http
            .post(&url)
            .form(&[("userId", email), ("password", password)])
            .send()
            .await
            .map_err(|e| FormError::Auth {
                status: None,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FormError::Auth {
                status: Some(status.as_u16()),
                reason: body.chars().take(200).collect(),
            });
        }

        let token = response
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut state = self.state.write().await;
        state.status = SessionStatus::Connected {
            email: email.to_string(),
        };
        state.token = token;
        tracing::info!(email, "Connected to API session");
        Ok(())
    }

    /// Log out. Failures to reach the service still drop the local session.
    pub async fn disconnect(&self) {
        let token = {
            let mut state = self.state.write().await;
            if state.status == SessionStatus::Disconnected {
                return;
            }
            state.status = SessionStatus::Disconnected;
            state.token.take()
        };

        let mut request = self.http.get(format!("{}/app/logout", self.base_url));
        if let Some(token) = &token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Err(e) = request.send().await {
            tracing::debug!(error = %e, "Logout request failed");
        }
        tracing::info!("Disconnected from API session");
    }

    /// Search users by keyword (email or name).
    pub async fn search_users(&self, keyword: &str) -> FormResult<Vec<UserSummary>> {
        let token = {
            let state = self.state.read().await;
            if state.status == SessionStatus::Disconnected {
                return Err(FormError::Auth {
                    status: None,
                    reason: "session is not connected".into(),
                });
            }
            state.token.clone()
        };

        let page_size = SEARCH_PAGE_SIZE.to_string();
        let mut request = self
            .http
            .get(format!("{}/users/search", self.base_url))
            .query(&[("keyword", keyword), ("page", "1"), ("pageSize", page_size.as_str())]);
        if let Some(token) = &token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FormError::Http {
                reason: format!("user search returned {status}"),
            });
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.data)
    }
}

/// Build the session and log in with configured credentials.
///
/// Never fails on login problems: without a session the form still renders,
/// identity fields just show bare emails.
pub async fn connect_from_config(config: &FormConfig) -> FormResult<ApiSession> {
    let session = ApiSession::new(&config.api_url)?;

    let Some(credentials) = &config.credentials else {
        tracing::warn!("No credentials configured. Please authenticate to enable user lookups");
        return Ok(session);
    };

    if let Err(e) = session
        .connect(&credentials.email, &credentials.password)
        .await
    {
        if e.is_authorization_failure() {
            tracing::warn!(error = %e, "Please authenticate to enable user lookups");
        } else {
            tracing::error!(error = %e, "Login failed");
        }
    }

    Ok(session)
}
