//! Process bootstrap helpers for the `mov` binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the MOV_LOG environment variable.
///
/// Defaults to "info" level if MOV_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Config file given on the command line as `--config <path>` or
/// `--config=<path>`.
pub fn parse_config_path() -> Option<String> {
    config_path_from(std::env::args().skip(1))
}

fn config_path_from(args: impl IntoIterator<Item = String>) -> Option<String> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_forms() {
        assert_eq!(
            config_path_from(args(&["--config", "mov.yaml"])),
            Some("mov.yaml".into())
        );
        assert_eq!(
            config_path_from(args(&["--config=/etc/mov.yaml"])),
            Some("/etc/mov.yaml".into())
        );
        assert_eq!(config_path_from(args(&["-c", "a.yaml"])), Some("a.yaml".into()));
        assert_eq!(config_path_from(args(&["--verbose"])), None);
        assert_eq!(config_path_from(args(&["--config"])), None);
    }
}
