use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV_VAR: &str = "POST_DOCUMENT_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

fn resolve_filter(directive: Option<&str>) -> EnvFilter {
    match directive.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => EnvFilter::new(value),
        None => EnvFilter::try_from_env(LOG_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
    }
}

/// Installs the global subscriber. Returns false when one is already installed.
pub fn init(directive: Option<&str>) -> bool {
    let subscriber = tracing_subscriber::registry()
        .with(resolve_filter(directive))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr));

    subscriber.try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_directive_wins() {
        assert_eq!(resolve_filter(Some("debug")).to_string(), "debug");
        assert_eq!(resolve_filter(Some("  ")).to_string(), resolve_filter(None).to_string());
    }

    #[test]
    fn second_init_is_refused() {
        let _ = init(Some("off"));
        assert!(!init(Some("off")));
    }
}
