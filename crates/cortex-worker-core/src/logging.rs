//! Logging configuration and initialization

use crate::error::{Result, WorkerError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// Honors `RUST_LOG`; defaults to `info`. Safe to call more than once.
pub fn init_logging() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) => {
            // A second init attempt is fine; anything else is an error
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(WorkerError::Logging {
                    message: format!("failed to initialize logging: {}", e),
                })
            }
        }
    }
}
