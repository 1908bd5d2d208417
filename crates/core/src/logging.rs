//! Tracing subscriber setup shared by frontends.
//!
//! Log lines go to stderr so stdout stays free for reports.

use std::sync::Once;

use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "emuexec=debug"
    } else {
        "emuexec=info"
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `verbose`. Subsequent calls are ignored.
pub fn init_tracing(verbose: bool) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbose)
            .with_thread_names(verbose);

        // A subscriber installed elsewhere (tests, embedding apps) wins.
        let _ = tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init();

        debug!("emuexec tracing initialized");
    });
}
