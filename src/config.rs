use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub models: Vec<String>,
    pub backup_url: Option<String>,
    pub backup_api_key: Option<String>,
    pub backup_model: String,
    pub attempt_timeout: Duration,
    pub backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub url: String,
    pub anon_key: String,
    pub bootstrap_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub public_url: String,
    pub max_upload_mb: u64,
    pub print_dpi: u32,
    pub session_ttl_minutes: i64,
    pub background_removal_url: String,
    pub chat: ChatConfig,
    pub auth: AuthConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let port: u16 = env::var("PORTRA_PORT")
            .unwrap_or_else(|_| "18480".to_string())
            .parse()?;

        Ok(Config {
            port,
            host: env::var("PORTRA_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            public_url: env::var("PORTRA_PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            max_upload_mb: env::var("PORTRA_MAX_UPLOAD_MB")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            print_dpi: env::var("PORTRA_PRINT_DPI")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            session_ttl_minutes: env::var("PORTRA_SESSION_TTL_MINUTES")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            background_removal_url: env::var("PORTRA_BG_REMOVAL_URL")
                .unwrap_or_else(|_| "http://localhost:7860/remove-bg".to_string()),
            chat: ChatConfig {
                gemini_api_key: non_empty_var("PORTRA_GEMINI_API_KEY"),
                gemini_base_url: env::var("PORTRA_GEMINI_BASE_URL").unwrap_or_else(|_| {
                    "https://generativelanguage.googleapis.com".to_string()
                }),
                models: env::var("PORTRA_CHAT_MODELS")
                    .unwrap_or_else(|_| {
                        "gemini-2.0-flash,gemini-2.5-flash,gemini-1.5-flash".to_string()
                    })
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                backup_url: non_empty_var("PORTRA_BACKUP_CHAT_URL"),
                backup_api_key: non_empty_var("PORTRA_BACKUP_CHAT_API_KEY"),
                backup_model: env::var("PORTRA_BACKUP_CHAT_MODEL")
                    .unwrap_or_else(|_| "llama-3.1-8b-instant".to_string()),
                attempt_timeout: Duration::from_millis(
                    env::var("PORTRA_CHAT_TIMEOUT_MS")
                        .unwrap_or_else(|_| "10000".to_string())
                        .parse()?,
                ),
                backoff: Duration::from_millis(
                    env::var("PORTRA_CHAT_BACKOFF_MS")
                        .unwrap_or_else(|_| "1000".to_string())
                        .parse()?,
                ),
            },
            auth: AuthConfig {
                url: env::var("PORTRA_AUTH_URL")
                    .map_err(|_| "PORTRA_AUTH_URL must point at the auth backend")?,
                anon_key: env::var("PORTRA_AUTH_ANON_KEY")
                    .map_err(|_| "PORTRA_AUTH_ANON_KEY is required")?,
                bootstrap_timeout: Duration::from_millis(
                    env::var("PORTRA_AUTH_BOOTSTRAP_TIMEOUT_MS")
                        .unwrap_or_else(|_| "2000".to_string())
                        .parse()?,
                ),
            },
        })
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
