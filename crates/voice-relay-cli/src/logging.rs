//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use voice_relay_core::config::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` overrides everything else.
pub fn init(config: Option<&LoggingConfig>, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(config, verbose)));

    let json = config.is_some_and(|c| c.format.eq_ignore_ascii_case("json"));
    let stdout = config.is_some_and(|c| c.output.eq_ignore_ascii_case("stdout"));

    let fmt_layer = match (json, stdout) {
        (true, true) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .boxed(),
        (true, false) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        (false, true) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .boxed(),
        (false, false) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Base level followed by per-crate overrides.
fn directives(config: Option<&LoggingConfig>, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config
            .and_then(|c| c.level.as_deref())
            .unwrap_or("info")
    };
    let mut out = level.to_string();
    for filter in config.map(|c| c.filters.as_slice()).unwrap_or_default() {
        out.push(',');
        out.push_str(filter);
    }
    out
}
