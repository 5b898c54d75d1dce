use crate::config::TelemetryConfig;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Directives appended to every filter so lock and retry chatter from the
/// issuer stays out of `info` logs unless asked for explicitly.
const QUIET_DIRECTIVES: &[&str] = &["admissions::admissions::sequence=warn"];

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{value}'")]
    Filter {
        value: String,
        #[source]
        source: ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Build the filter used by [`init`]. `RUST_LOG` wins over the configured level.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let mut filter =
        EnvFilter::try_new(&config.log_level).map_err(|source| TelemetryError::Filter {
            value: config.log_level.clone(),
            source,
        })?;
    if !config.log_level.contains("sequence") {
        for directive in QUIET_DIRECTIVES {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(source) => {
                    return Err(TelemetryError::Filter {
                        value: (*directive).to_string(),
                        source,
                    })
                }
            }
        }
    }
    Ok(filter)
}

/// Install the global subscriber.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(config)?)
        .with_target(true)
        .compact()
        .with_ansi(config.ansi)
        .try_init()
        .map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(level: &str) -> TelemetryConfig {
        TelemetryConfig {
            log_level: level.to_string(),
            ansi: false,
        }
    }

    #[test]
    fn rejects_malformed_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let err =
            build_filter(&config("admissions=loudest")).expect_err("filter should not parse");
        assert!(matches!(err, TelemetryError::Filter { .. }));
    }

    #[test]
    fn quiets_issuer_unless_configured() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = build_filter(&config("debug")).expect("filter");
        assert!(filter.to_string().contains("sequence=warn"));

        let filter = build_filter(&config("admissions::admissions::sequence=trace"))
            .expect("filter");
        assert!(!filter.to_string().contains("sequence=warn"));
    }
}
