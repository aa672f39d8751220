//! Hooks: named broadcast points that scripts subscribe to.
//!
//! Native code fires a [`Hook`]; functions that modules registered with
//! `HookFunction` handle it. The [`HookRegistry`] owns the hooks and exposes
//! them to scripts once at startup.

pub mod dispatch;
pub mod registry;
pub mod types;

pub use dispatch::Hook;
pub use registry::HookRegistry;
pub use types::{HookOutcome, HookReturn, HookState, StopMode};
