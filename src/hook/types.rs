//! Hook types.

use mlua::{FromLua, Lua, Value};

/// Whether a dispatch stops once a handler reports it handled the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Every handler is called.
    #[default]
    None,
    /// Stop after the first handler returning [`HookReturn::Handled`].
    OnHandled,
}

/// Typed result of a single hook handler.
///
/// Scripts return `HOOK_CONTINUE` or `HOOK_HANDLED`; returning nothing is
/// the same as `HOOK_CONTINUE`. Any other value fails that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookReturn {
    Continue,
    Handled,
}

impl HookReturn {
    /// Value of `HOOK_CONTINUE` in scripts.
    pub const CONTINUE_CODE: i64 = 0;
    /// Value of `HOOK_HANDLED` in scripts.
    pub const HANDLED_CODE: i64 = 1;

    pub fn code(self) -> i64 {
        match self {
            Self::Continue => Self::CONTINUE_CODE,
            Self::Handled => Self::HANDLED_CODE,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            Self::CONTINUE_CODE => Some(Self::Continue),
            Self::HANDLED_CODE => Some(Self::Handled),
            _ => None,
        }
    }
}

impl FromLua for HookReturn {
    fn from_lua(value: Value, _lua: &Lua) -> mlua::Result<Self> {
        let code = match &value {
            Value::Nil => return Ok(Self::Continue),
            Value::Integer(i) => Some(*i),
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        };
        code.and_then(Self::from_code).ok_or_else(|| {
            mlua::Error::RuntimeError(format!(
                "hook handler must return HOOK_CONTINUE or HOOK_HANDLED, got {}",
                value.type_name()
            ))
        })
    }
}

/// Summary of one hook dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookOutcome {
    /// Some handler returned [`HookReturn::Handled`].
    pub handled: bool,
    /// Handlers that were called.
    pub invoked: usize,
    /// Called handlers that failed.
    pub failed: usize,
    /// Stale handlers that were skipped.
    pub skipped: usize,
}

/// Hook state: no handlers, or at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Idle,
    Active,
}
