use tracing_subscriber::EnvFilter;

/// Filter for the subscriber: `RUST_LOG` when set, `--log-level` otherwise.
fn level_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Install the stderr subscriber. Worker lines carry the copy's thread name
/// (`rowflow-<step>.<copy>`) next to the `step` span.
pub fn init(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(level_filter(log_level))
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_log_level_flag_is_the_fallback() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(level_filter("debug").max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(level_filter("warn").max_level_hint(), Some(LevelFilter::WARN));
    }
}
