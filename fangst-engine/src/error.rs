//! Engine-level error types.

use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("component '{0}' registered twice")]
    DuplicateComponent(String),

    #[error("component '{name}' failed to start: {source}")]
    ComponentStart {
        name: String,
        #[source]
        source: BoxedError,
    },

    #[error("runtime initialization failed: {0}")]
    Init(#[source] BoxedError),

    #[error("configuration error: {0}")]
    Config(#[from] fangst_config::ConfigError),
}
