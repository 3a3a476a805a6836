//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: `level` for the client crates,
/// warnings only for everything else.
fn default_directives(level: &str) -> String {
    format!("warn,apnwire={level},apnwire_cli={level}")
}

/// Install the global subscriber: compact lines on stderr so stdout stays
/// free for command output. `RUST_LOG` wins over `level` when set.
pub fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_scoped_to_client_crates() {
        assert_eq!(default_directives("debug"), "warn,apnwire=debug,apnwire_cli=debug");
    }

    #[test]
    fn directives_parse() {
        assert!(EnvFilter::try_new(default_directives("info")).is_ok());
    }
}
