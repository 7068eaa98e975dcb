//! Core bridge runtime for tether.
//!
//! This crate connects a script engine to native service modules: a module
//! registry that assigns numeric module/method IDs, the executor contract the
//! engine is driven through, batch decoding and dispatch, an event dispatcher
//! for native-originated events, and the lifecycle state machine that ties
//! them together on a single owner thread.

pub mod args;
pub mod bridge;
pub mod dispatch;
pub mod dispatcher;
pub mod event;
pub mod executor;
pub mod handle;
pub mod logging;
pub mod module;
pub mod provider;
pub mod registry;
pub mod source;
pub mod state;
pub mod surface;

pub use args::{Args, CallbackId};
pub use bridge::Bridge;
pub use dispatcher::EventDispatcher;
pub use executor::{CallReply, Executor, ExecutorLink, ExecutorRegistry};
pub use handle::{BridgeHandle, ControlHandle, Generation};
pub use module::{MethodKind, MethodSpec, NativeModule};
pub use provider::{FnProvider, ModuleProvider, ProviderContext};
pub use registry::ModuleRegistry;
pub use source::{FileSourceProvider, SourceLink, SourceProvider};
pub use state::BridgeState;
pub use surface::{ErrorSurface, LogErrorSurface};
