//! Telemetry initialization: stdout tracing subscriber filtered by `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "index_keeper_backend=debug,tower_http=debug,sqlx::query=info";

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `log_level` applies to dependencies
/// while this crate logs at debug.
pub fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(log_level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_directives(log_level: &str) -> String {
    let level = log_level.trim();
    if level.is_empty() || level.eq_ignore_ascii_case("info") {
        DEFAULT_FILTER.to_string()
    } else {
        format!("{level},{DEFAULT_FILTER}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_info() {
        assert_eq!(default_directives("info"), DEFAULT_FILTER);
        assert_eq!(default_directives(""), DEFAULT_FILTER);
    }

    #[test]
    fn test_default_directives_custom_level() {
        let directives = default_directives("warn");
        assert!(directives.starts_with("warn,"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
