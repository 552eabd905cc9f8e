use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Client configuration, loaded from environment variables
// ---------------------------------------------------------------------------

/// Call-client configuration.
///
/// Every field can be set via an environment variable prefixed with
/// `HAOS_`. Defaults point at a local LiveKit development stack.
#[derive(Debug, Clone)]
pub struct Config {
    // ── LiveKit ─────────────────────────────────────────────────────────
    /// WebSocket URL of the LiveKit server.
    pub livekit_url: String,
    /// Base URL of the JWT service that exchanges Matrix tokens for
    /// LiveKit tokens.
    pub jwt_service_url: String,
    /// API key for signing tokens locally (development only).
    pub livekit_api_key: Option<String>,
    /// API secret paired with `livekit_api_key`.
    pub livekit_api_secret: Option<String>,
    /// Lifetime of locally signed tokens.
    pub token_ttl_secs: u64,

    // ── HTTP ────────────────────────────────────────────────────────────
    pub http_timeout_secs: u64,

    // ── Limits ──────────────────────────────────────────────────────────
    /// Participant count at which a call is considered full.
    pub max_participants: usize,

    // ── Logging ─────────────────────────────────────────────────────────
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            livekit_url: "ws://localhost:7880".into(),
            jwt_service_url: "http://localhost:8080/_livekit".into(),
            livekit_api_key: None,
            livekit_api_secret: None,
            token_ttl_secs: 6 * 60 * 60,
            http_timeout_secs: 10,
            max_participants: 12,
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Automatically loads a `.env` file if present (via `dotenvy`).
    pub fn from_env() -> Self {
        // Best-effort .env loading.
        let _ = dotenvy::dotenv();

        let defaults = Config::default();

        let livekit_url = env_or("HAOS_LIVEKIT_URL", &defaults.livekit_url);
        let jwt_service_url = env_or("HAOS_LIVEKIT_JWT_SERVICE_URL", &defaults.jwt_service_url);

        let livekit_api_key = env_opt("HAOS_LIVEKIT_API_KEY");
        let livekit_api_secret = env_opt("HAOS_LIVEKIT_API_SECRET");
        if livekit_api_key.is_some() != livekit_api_secret.is_some() {
            warn!(
                "Only one of HAOS_LIVEKIT_API_KEY / HAOS_LIVEKIT_API_SECRET is set, falling back to the JWT service"
            );
        }

        let token_ttl_secs = env_parse("HAOS_TOKEN_TTL_SECS", defaults.token_ttl_secs);
        let http_timeout_secs = env_parse("HAOS_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs);
        let max_participants = env_parse("HAOS_MAX_PARTICIPANTS", defaults.max_participants);
        let log_level = env_or("HAOS_LOG_LEVEL", &defaults.log_level);

        let config = Config {
            livekit_url,
            jwt_service_url,
            livekit_api_key,
            livekit_api_secret,
            token_ttl_secs,
            http_timeout_secs,
            max_participants,
            log_level,
        };

        config.log_summary();
        config
    }

    /// Whether tokens are minted locally instead of fetched.
    pub fn signs_locally(&self) -> bool {
        self.livekit_api_key.is_some() && self.livekit_api_secret.is_some()
    }

    fn log_summary(&self) {
        info!("──── Call client configuration ────");
        info!("  livekit_url        : {}", self.livekit_url);
        info!("  jwt_service_url    : {}", self.jwt_service_url);
        info!(
            "  token_source       : {}",
            if self.signs_locally() {
                "local signer"
            } else {
                "jwt service"
            }
        );
        info!("  token_ttl_secs     : {}", self.token_ttl_secs);
        info!("  http_timeout_secs  : {}", self.http_timeout_secs);
        info!("  max_participants   : {}", self.max_participants);
        info!("  log_level          : {}", self.log_level);
        info!("───────────────────────────────────");
    }
}

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{key}={v} is not valid, using default");
            default
        }),
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_jwt_service() {
        let config = Config::default();
        assert!(!config.signs_locally());
        assert_eq!(config.max_participants, 12);
        assert_eq!(config.token_ttl_secs, 21600);
    }

    #[test]
    fn key_pair_enables_local_signing() {
        let config = Config {
            livekit_api_key: Some("devkey".into()),
            livekit_api_secret: Some("secret".into()),
            ..Config::default()
        };
        assert!(config.signs_locally());

        let half = Config {
            livekit_api_key: Some("devkey".into()),
            ..Config::default()
        };
        assert!(!half.signs_locally());
    }

    #[test]
    fn from_env_reads_haos_variables() {
        let vars = [
            ("HAOS_LIVEKIT_URL", "wss://livekit.example.org"),
            ("HAOS_LIVEKIT_JWT_SERVICE_URL", "https://example.org/_livekit"),
            ("HAOS_LIVEKIT_API_KEY", "devkey"),
            ("HAOS_LIVEKIT_API_SECRET", ""),
            ("HAOS_TOKEN_TTL_SECS", "600"),
            ("HAOS_HTTP_TIMEOUT_SECS", "not-a-number"),
            ("HAOS_MAX_PARTICIPANTS", "4"),
            ("HAOS_LOG_LEVEL", "debug"),
        ];
        for (key, value) in vars {
            std::env::set_var(key, value);
        }

        let config = Config::from_env();

        for (key, _) in vars {
            std::env::remove_var(key);
        }

        assert_eq!(config.livekit_url, "wss://livekit.example.org");
        assert_eq!(config.jwt_service_url, "https://example.org/_livekit");
        assert_eq!(config.livekit_api_key.as_deref(), Some("devkey"));
        assert_eq!(config.livekit_api_secret, None);
        assert!(!config.signs_locally());
        assert_eq!(config.token_ttl_secs, 600);
        assert_eq!(config.http_timeout_secs, 10);
        assert_eq!(config.max_participants, 4);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("HAOS_TEST_PARSE_GARBAGE", "twelve");
        assert_eq!(env_parse("HAOS_TEST_PARSE_GARBAGE", 12usize), 12);
        std::env::set_var("HAOS_TEST_PARSE_OK", " 30 ");
        assert_eq!(env_parse("HAOS_TEST_PARSE_OK", 12usize), 30);
        assert_eq!(env_parse("HAOS_TEST_PARSE_UNSET", 7u64), 7);
    }

    #[test]
    fn empty_optional_is_unset() {
        std::env::set_var("HAOS_TEST_EMPTY_OPT", "");
        assert_eq!(env_opt("HAOS_TEST_EMPTY_OPT"), None);
    }
}
