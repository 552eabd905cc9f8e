use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` wins over `cfg.log_level`. Returns `false` when a subscriber
/// was already installed, which is not an error: embedding applications and
/// tests may set up their own.
pub fn init_tracing(cfg: &Config) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let cfg = Config {
            log_level: "debug".into(),
            ..Config::default()
        };
        init_tracing(&cfg);
        assert!(!init_tracing(&cfg));
    }
}
