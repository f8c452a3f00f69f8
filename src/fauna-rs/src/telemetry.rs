//! Diagnostic logging setup
//!
//! Request diagnostics are emitted as `tracing` events. Applications that
//! already install a subscriber get them for free; others can call
//! [`init_diagnostics`] to print them to stderr, the way `FAUNA_DEBUG`
//! expects.

use anyhow::Result;
use fauna_core::Diagnostics;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for [`init_diagnostics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install a stderr subscriber for client diagnostics.
///
/// `RUST_LOG` wins when set; otherwise the level follows
/// `FAUNA_DEBUG` / `FAUNA_DEBUG_RESPONSE`.
pub fn init_diagnostics(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(Diagnostics::from_env())));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()?,
    }

    tracing::debug!("Fauna diagnostics initialized ({:?})", format);
    Ok(())
}

fn default_directives(diagnostics: Diagnostics) -> &'static str {
    if diagnostics.enabled() {
        "fauna_rs=debug,fauna_core=debug"
    } else {
        "fauna_rs=warn,fauna_core=warn"
    }
}
