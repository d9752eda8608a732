//! Hub scanning backend.
//!
//! The Hub authenticates with a form login that sets a session cookie, so
//! every [`HubSession`] owns its own `reqwest` client and cookie store.
//! Sessions are short-lived: open, log in, query, log out.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::HubConfig;
use crate::error::{ArbiterError, Result};

/// Source of backend sessions.
#[cfg_attr(test, automock)]
pub trait ScanBackend: Send + Sync {
    /// Open a new, not yet authenticated session.
    fn session(&self) -> Box<dyn BackendSession>;
}

/// One authenticated conversation with the scanning backend.
///
/// Every method degrades to a boolean or a log line; none of them fail.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackendSession: Send {
    /// Authenticate; returns whether the login succeeded.
    async fn login(&mut self) -> bool;

    /// Release the session. Safe to call after a failed login.
    async fn logout(&mut self);

    /// Ask whether the Hub has scan results for `digest`.
    async fn check_notification(&mut self, digest: &str) -> bool;
}

/// Code location search response, trimmed to the fields we read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeLocationPage {
    #[serde(default)]
    total_count: u64,
}

/// Hub connection factory built from [`HubConfig`].
#[derive(Clone)]
pub struct HubBackend {
    config: HubConfig,
    user_agent: String,
}

impl HubBackend {
    /// Create a backend for the Hub described by `config`.
    pub fn new(config: HubConfig, scanner_version: &str) -> Self {
        Self {
            config,
            user_agent: format!("arbiter/{scanner_version}"),
        }
    }

    /// Open a session, surfacing client construction errors.
    pub fn connect(&self) -> Result<HubSession> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(self.config.timeout())
            .user_agent(self.user_agent.clone())
            .build()?;

        Ok(HubSession {
            client: Some(client),
            base_url: self.config.base_url(),
            user: self.config.user.clone(),
            password: self.config.password.clone(),
            logged_in: false,
        })
    }
}

impl ScanBackend for HubBackend {
    fn session(&self) -> Box<dyn BackendSession> {
        match self.connect() {
            Ok(session) => Box::new(session),
            Err(e) => {
                warn!(error = %e, "Failed to create Hub HTTP client");
                Box::new(HubSession::unavailable(self.config.base_url()))
            }
        }
    }
}

/// A cookie-backed Hub session.
pub struct HubSession {
    client: Option<Client>,
    base_url: String,
    user: String,
    password: String,
    logged_in: bool,
}

impl HubSession {
    fn unavailable(base_url: String) -> Self {
        Self {
            client: None,
            base_url,
            user: String::new(),
            password: String::new(),
            logged_in: false,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| ArbiterError::Config("Hub HTTP client unavailable".to_string()))
    }

    /// Whether the last login succeeded and no logout happened since.
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    async fn try_login(&self) -> Result<()> {
        let url = format!("{}/j_spring_security_check", self.base_url);
        debug!(url = %url, "POST login");

        let response = self
            .client()?
            .post(&url)
            .form(&[("j_username", &self.user), ("j_password", &self.password)])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ArbiterError::HubApi {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    async fn try_check(&self, digest: &str) -> Result<bool> {
        let url = format!("{}/api/codelocations", self.base_url);
        debug!(url = %url, digest = %digest, "GET code locations");

        let response = self
            .client()?
            .get(&url)
            .query(&[("q", format!("name:{digest}"))])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ArbiterError::HubApi {
                status: status.as_u16(),
                message: text,
            });
        }

        let page: CodeLocationPage = response.json().await?;
        Ok(page.total_count > 0)
    }
}

#[async_trait]
impl BackendSession for HubSession {
    async fn login(&mut self) -> bool {
        match self.try_login().await {
            Ok(()) => {
                info!(hub = %self.base_url, user = %self.user, "Logged in to Hub");
                self.logged_in = true;
            }
            Err(e) => {
                warn!(hub = %self.base_url, error = %e, "Hub login failed");
                self.logged_in = false;
            }
        }
        self.logged_in
    }

    async fn logout(&mut self) {
        if !self.logged_in {
            return;
        }
        self.logged_in = false;

        let url = format!("{}/j_spring_security_logout", self.base_url);
        let result = match self.client() {
            Ok(client) => client.get(&url).send().await.map_err(ArbiterError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => debug!(hub = %self.base_url, "Logged out of Hub"),
            Err(e) => warn!(hub = %self.base_url, error = %e, "Hub logout failed"),
        }
    }

    async fn check_notification(&mut self, digest: &str) -> bool {
        if !self.logged_in {
            warn!(digest = %digest, "Notification check attempted without a Hub login");
            return false;
        }

        match self.try_check(digest).await {
            Ok(found) => {
                debug!(digest = %digest, scanned = found, "Hub notification status");
                found
            }
            Err(e) => {
                warn!(digest = %digest, error = %e, "Hub notification check failed");
                false
            }
        }
    }
}
