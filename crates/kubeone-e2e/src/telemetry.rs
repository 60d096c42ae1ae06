//! Tracing setup for the `k1e2e` driver.
//!
//! Harness crates log at the level picked on the command line while the
//! Kubernetes and HTTP client stacks stay at `warn`, so a `--verbose` run
//! shows poll and retry decisions without kube/hyper wire chatter. Logs go
//! to stderr; stdout carries command output such as the presubmit JSON.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level.
const HARNESS_TARGETS: &[&str] = &["kubeone_e2e", "kubeone_e2e_ci", "k1e2e"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(HARNESS_TARGETS.iter().map(|t| format!("{}={}", t, level)));
    directives.join(",")
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber; later calls are no-ops.
///
/// `RUST_LOG` replaces the default directives when set. With `json`, lines
/// are newline-delimited JSON for the CI log collector.
pub fn init_tracing(json: bool, level: Level) {
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let installed = if json {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(layer.json().with_current_span(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(layer)
            .try_init()
    };

    if installed.is_ok() {
        tracing::debug!(json = json, level = %level, "Tracing initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_harness() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,kubeone_e2e=debug,kubeone_e2e_ci=debug,k1e2e=debug"
        );
        assert!(default_directives(Level::INFO).starts_with("warn,"));
        assert!(!default_directives(Level::TRACE).contains("kube="));
    }

    #[test]
    fn test_default_directives_parse() {
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            assert!(EnvFilter::try_new(default_directives(level)).is_ok());
        }
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
        tracing::info!("still logging");
    }
}
