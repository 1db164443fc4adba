use anyhow::Result;

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";

/// Configuration loaded from environment variables at the binary edge.
/// The API key is optional: without it the engine produces labeled
/// low-confidence stand-in verdicts, so the pipeline stays exercisable
/// in development and tests.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: Option<String>,
    pub claude_model: String,
    pub fetch_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            claude_model: std::env::var("CLAUDE_MODEL")
                .unwrap_or_else(|_| DEFAULT_CLAUDE_MODEL.to_string()),
            fetch_timeout_secs: std::env::var("FETCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
        };

        Ok(config)
    }

    /// Log key presence, never values.
    pub fn log_redacted(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => {
                    let n = v.len().min(5);
                    format!("{}...({} chars)", &v[..n], v.len())
                }
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview_opt(&self.anthropic_api_key));
        tracing::info!("  CLAUDE_MODEL: {}", self.claude_model);
        tracing::info!("  FETCH_TIMEOUT_SECS: {}", self.fetch_timeout_secs);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            claude_model: DEFAULT_CLAUDE_MODEL.to_string(),
            fetch_timeout_secs: 15,
        }
    }
}
