//! Script engine access for the host.
//!
//! Wraps the embedded Lua engine and provides the pieces the module, hook
//! and scheduler layers are built from: the owning [`RefPtr`] handle over
//! engine-counted objects, [`ScriptFunction`] objects with optional declared
//! signatures, and the call invocation layer.

pub mod call;
pub mod engine;
pub mod function;
pub mod refptr;

pub use call::{call, call_args, vcall, ArgValue, CallArgs, CallError, CallFlags, CallResult};
pub use engine::{ResourceLimits, ScriptEngine};
pub use function::{ArgType, ObjectId, ScriptFunction, Signature};
pub use refptr::{RefCounted, RefPtr};
