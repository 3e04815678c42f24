//! Form configuration loaded from the environment.
//!
//! | Variable                        | Default                            |
//! |---------------------------------|------------------------------------|
//! | `LAWFORM_TEMPLATE`              | `templates/sample_agreement.txt`   |
//! | `OPENLAW_API_URL`               | `https://app.openlaw.io`           |
//! | `OPENLAW_EMAIL`                 | (none, login skipped)              |
//! | `OPENLAW_PASSWORD`              | (none, login skipped)              |
//! | `LAWFORM_RECOMPUTE_DEBOUNCE_MS` | `0` (recompute on every change)    |
//! | `LAWFORM_INPUT_CLASS`           | empty                              |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_TEMPLATE_PATH: &str = "templates/sample_agreement.txt";
pub const DEFAULT_API_URL: &str = "https://app.openlaw.io";

/// Login credentials for the API session
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FormConfig {
    pub template_path: PathBuf,
    pub api_url: String,
    pub credentials: Option<Credentials>,
    /// Wait this long after a change before recomputing; zero recomputes
    /// immediately.
    pub recompute_debounce: Duration,
    /// Class applied to text-like inputs by hosts that render HTML
    pub text_like_input_class: String,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            api_url: DEFAULT_API_URL.to_string(),
            credentials: None,
            recompute_debounce: Duration::ZERO,
            text_like_input_class: String::new(),
        }
    }
}

impl FormConfig {
    /// Load from process environment (call `dotenvy::dotenv()` first to pick
    /// up a `.env` file).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("LAWFORM_TEMPLATE") {
            config.template_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("OPENLAW_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ms) = lookup("LAWFORM_RECOMPUTE_DEBOUNCE_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("LAWFORM_RECOMPUTE_DEBOUNCE_MS is not a number: {ms}"))?;
            config.recompute_debounce = Duration::from_millis(ms);
        }
        if let Some(class) = lookup("LAWFORM_INPUT_CLASS") {
            config.text_like_input_class = class;
        }

        let email = lookup("OPENLAW_EMAIL").unwrap_or_default();
        let password = lookup("OPENLAW_PASSWORD").unwrap_or_default();
        if !email.is_empty() && !password.is_empty() {
            config.credentials = Some(Credentials { email, password });
        }

        Ok(config)
    }

    /// Read the configured template source
    pub fn load_template(&self) -> Result<String> {
        std::fs::read_to_string(&self.template_path)
            .with_context(|| format!("Failed to read template {}", self.template_path.display()))
    }
}
