//! # Cortex Worker Core
//!
//! Queue-driven execution pipeline for cortical model runs: resolves run
//! resources, invokes the predictive model engine, packages the results
//! archive, renders cortical visualization images, and publishes the
//! outputs as run attachments with exactly one terminal state per run.

pub mod config;
pub mod consumer;
pub mod cortical;
pub mod engine;
pub mod error;
pub mod executor;
pub mod invoker;
pub mod logging;
pub mod models;
pub mod packager;
pub mod registry;
pub mod resolver;
pub mod store;

// Re-export commonly used types
pub use config::*;
pub use error::*;
pub use logging::*;
pub use models::*;

/// Initialize the worker core library
pub fn init() -> Result<()> {
    logging::init_logging()?;
    tracing::info!("Cortex Worker Core initialized successfully");
    Ok(())
}

/// Get the version of the worker core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        let result = init();
        assert!(result.is_ok());
    }

    #[test]
    fn test_version() {
        let version = version();
        assert!(!version.is_empty());
    }
}
