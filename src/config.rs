use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Connection settings for the remote Backend-as-a-Service.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://xyz.example.co`
    pub base_url: String,
    /// Public API key sent with every request
    pub api_key: String,
    /// Signed-in user's access token. Falls back to the API key when absent.
    pub access_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:54321".to_string(),
            api_key: String::new(),
            access_token: None,
            request_timeout_ms: 15_000,
        }
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }
}

/// How expired-credential answers are treated.
///
/// `reconnect_grace` reproduces the old "connected less than ten minutes ago,
/// so it cannot really be expired" rule. It is a heuristic, not something the
/// remote side guarantees, so it is off unless explicitly set.
#[derive(Debug, Clone, Default)]
pub struct AuthPolicy {
    pub reconnect_grace: Option<Duration>,
    /// When the remote credential was last connected, if known at startup
    pub connected_at: Option<DateTime<Utc>>,
}

impl AuthPolicy {
    pub fn legacy_grace() -> Self {
        Self {
            reconnect_grace: Some(Duration::from_secs(10 * 60)),
            connected_at: None,
        }
    }

    pub fn with_connected_at(mut self, at: DateTime<Utc>) -> Self {
        self.connected_at = Some(at);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Refetch the whole board after any failed mutation
    pub refetch_on_failure: bool,
    pub auth: AuthPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            refetch_on_failure: true,
            auth: AuthPolicy::default(),
        }
    }
}

/// Where the message queue keeps its cursor.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub cursor_key: String,
    /// Directory for the file-backed cursor store
    pub state_dir: PathBuf,
    /// Name substituted for `{{business_name}}` in templates
    pub business_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            cursor_key: "message-queue-cursor".to_string(),
            state_dir: PathBuf::from(".crewline"),
            business_name: String::new(),
        }
    }
}

impl QueueConfig {
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_business_name(mut self, name: impl Into<String>) -> Self {
        self.business_name = name.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub coordinator: CoordinatorConfig,
    pub queue: QueueConfig,
}
