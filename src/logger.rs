// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Result;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use std::env;

fn default_directives() -> &'static str {
    if cfg!(debug_assertions) {
        "warn,kms_sink=debug,kms_sink_config=debug"
    } else {
        "warn,kms_sink=info,kms_sink_config=info"
    }
}

pub fn init_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives()))?;
    let fmt_layer = fmt::layer().compact().with_writer(std::io::stderr);

    // only bother with the journal when systemd hooked up our output
    let journald = env::var_os("JOURNAL_STREAM").map(|_| tracing_journald::layer());
    match journald {
        Some(Ok(journald_layer)) => tracing_subscriber::registry()
            .with(fmt_layer)
            .with(journald_layer)
            .with(filter)
            .try_init()?,
        Some(Err(err)) => {
            tracing_subscriber::registry()
                .with(fmt_layer)
                .with(filter)
                .try_init()?;
            warn!(?err, "Failed to init journald logging.");
        }
        None => tracing_subscriber::registry()
            .with(fmt_layer)
            .with(filter)
            .try_init()?,
    }
    log_panics::init();

    info!("Version: {}", std::env!("CARGO_PKG_VERSION"));
    debug!(
        "Build ({})",
        std::option_env!("GIT_HASH").unwrap_or("Unknown")
    );
    Ok(())
}
