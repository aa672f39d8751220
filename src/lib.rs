//! scripthost - host-side runtime for embedded Lua modules
//!
//! Builds script modules under named descriptors, dispatches native hooks to
//! script handlers, and steps per-module schedulers on an explicit tick.

pub mod config;
pub mod error;
pub mod hook;
pub mod host;
pub mod logging;
pub mod module;
pub mod scheduler;
pub mod script;

pub use config::Config;
pub use error::{Result, ScriptHostError};
pub use hook::{Hook, HookOutcome, HookRegistry, HookReturn, HookState, StopMode};
pub use host::ScriptHost;
pub use module::{
    AccessMask, Module, ModuleBuilder, ModuleDescriptor, ModuleId, ModuleManager,
    ModulePriority, ScriptFileBuilder, Section, SectionBuilder,
};
pub use scheduler::{Repeat, Scheduler, SchedulerHandle, ThinkReport, TimerId};
pub use script::{
    call, call_args, vcall, ArgType, ArgValue, CallArgs, CallError, CallFlags, CallResult,
    RefCounted, RefPtr, ScriptEngine, ScriptFunction, Signature,
};
