use env_logger::DEFAULT_FILTER_ENV;
use log::LevelFilter;
use std::io::Write;

/// Installs the logger used by fleet services.
///
/// Non-verbose output keeps allocation decisions (retirements, provisioning, lock
/// escalation warnings) and hides the per-candidate debug trail of the engine.
/// `RUST_LOG` overrides both. Does nothing if a logger has already been installed.
pub fn setup_logging(verbose: bool) {
    let mut builder = env_logger::Builder::default();
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder
            .filter_level(LevelFilter::Info)
            .filter_module("provisioning::internal::allocation", LevelFilter::Warn);
    }

    let has_debug = std::env::var(DEFAULT_FILTER_ENV)
        .map(|v| v.contains("debug"))
        .unwrap_or(false);

    if verbose || has_debug {
        builder.format_timestamp_millis().format_target(true);
    } else {
        // <time> <level> [<crate>] <message>
        builder.format(|buf, record| {
            let level_style = buf.default_level_style(record.level()).bold();
            let origin = record
                .target()
                .split("::")
                .next()
                .unwrap_or_default();
            writeln!(
                buf,
                "{} {level_style}{}{level_style:#} [{origin}] {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        });
    }

    builder.parse_default_env();
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
