use std::backtrace::Backtrace;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,cdc_cache_invalidator=debug,rdkafka=warn";

/// Install the global subscriber. `RUST_LOG` overrides the default filter and
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json_requested(std::env::var("LOG_FORMAT").ok().as_deref()) {
        fmt().with_env_filter(env_filter).json().init();
    } else {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }
}

fn json_requested(format: Option<&str>) -> bool {
    matches!(format, Some(f) if f.eq_ignore_ascii_case("json"))
}

/// Route panics through tracing with a captured backtrace.
///
/// Runs before unwinding, so panics later recovered by the supervisor are
/// still logged with their stack.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        error!(
            location = %location,
            backtrace = %Backtrace::force_capture(),
            "Panic: {}",
            message
        );
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_format_selection() {
        assert!(json_requested(Some("json")));
        assert!(json_requested(Some("JSON")));
        assert!(!json_requested(Some("pretty")));
        assert!(!json_requested(None));
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
