//! # fangst-engine
//!
//! Startup orchestration and runtime wiring: components register with the
//! orchestrator in dependency order, start sequentially with rollback on
//! failure, and stop in reverse.

#![warn(unsafe_code)]

mod error;
mod orchestrator;
mod runtime;

pub use error::EngineError;
pub use orchestrator::{Component, ComponentResult, StartupOrchestrator};
pub use runtime::CaptureRuntime;
