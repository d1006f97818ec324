//! Model runtime layer
//!
//! The inference runtime itself is an external collaborator, reached only
//! through [`InferenceRuntime`]. This module defines that contract, the
//! prompts the vision model is driven with, and the lifecycle manager that
//! owns loaded runtimes.
//!
//! Architecture:
//! - One handle per [`ModelKind`] (vision, audio encoder, audio decoder)
//! - Runtimes are created by a [`RuntimeFactory`] on every (re)load
//! - Vision handles are warmed up with a fixed preamble before they are `ready`
pub mod runtime_trait;
pub mod prompt_format;
pub mod lifecycle_manager;
pub mod scripted_runtime;
pub use runtime_trait::{
    ImageFrame, InferenceRuntime, ModelKind, ModelPaths, RuntimeConfig, RuntimeFactory, RuntimeStop, StatusCode,
    STATUS_OK,
};
pub use lifecycle_manager::{LoadStatus, ModelLifecycleManager, ModelState, RuntimeLease};
pub use scripted_runtime::{Script, ScriptedRuntime, ScriptedRuntimeFactory};
