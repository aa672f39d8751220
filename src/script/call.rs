//! Call invocation layer.
//!
//! Three entry points reach a script function:
//!
//! - [`call`]: fixed positional arguments known at the call site,
//! - [`call_args`]: a [`CallArgs`] list assembled at runtime,
//! - [`vcall`]: an already-packed engine argument pack, forwarded unchanged.
//!
//! All of them funnel into the same validate/invoke/decode path, so equivalent
//! arguments give the same return value and the same [`CallError`].

use bitflags::bitflags;
use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, MultiValue, Value};
use thiserror::Error;

use super::engine::ScriptEngine;
use super::function::{ArgType, ScriptFunction, Signature};
use super::refptr::RefPtr;

bitflags! {
    /// Execution flags for a single call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallFlags: u32 {
        const NONE = 0;
        /// Run without the engine's instruction limit.
        const UNLIMITED = 1 << 0;
        /// Don't log failures; the caller reports them.
        const NO_LOG = 1 << 1;
    }
}

/// Why a call did not produce a result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// Null handle, removed object, removed module or shut down engine.
    #[error("function handle is invalid")]
    InvalidFunction,

    #[error("expected {expected} argument(s), got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("argument {index}: expected {expected}, got {got}")]
    ArgumentType {
        index: usize,
        expected: ArgType,
        got: String,
    },

    /// A host value could not be converted to an engine value.
    #[error("argument conversion failed: {0}")]
    ArgumentConversion(String),

    /// The script raised an error or hit an engine limit.
    #[error("script exception: {0}")]
    Exception(String),

    /// The callee returned something the caller can't decode.
    #[error("unexpected return value: {0}")]
    ReturnType(String),
}

pub type CallResult<T> = std::result::Result<T, CallError>;

/// A single argument value.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Nil,
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Function(RefPtr<ScriptFunction>),
    /// Any engine value passed through as-is (tables, userdata, ...).
    Script(Value),
}

impl ArgValue {
    /// Engine type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Script(value) => value.type_name(),
        }
    }

    /// Capture an engine value, keeping scalars as typed host values.
    pub fn from_lua_value(value: Value) -> Self {
        match value {
            Value::Nil => Self::Nil,
            Value::Boolean(b) => Self::Bool(b),
            Value::Integer(i) => Self::Integer(i),
            Value::Number(n) => Self::Number(n),
            other => Self::Script(other),
        }
    }

    fn to_lua(&self, lua: &Lua, index: usize) -> CallResult<Value> {
        let value = match self {
            Self::Nil => Value::Nil,
            Self::Bool(b) => Value::Boolean(*b),
            Self::Integer(i) => Value::Integer(*i),
            Self::Number(n) => Value::Number(*n),
            Self::String(s) => Value::String(
                lua.create_string(s)
                    .map_err(|e| CallError::ArgumentConversion(e.to_string()))?,
            ),
            Self::Function(function) => {
                match function.get().filter(|f| f.is_live()).and_then(|f| f.lua_function()) {
                    Some(f) => Value::Function(f),
                    None => {
                        return Err(CallError::ArgumentType {
                            index,
                            expected: ArgType::Function,
                            got: "invalid function".to_string(),
                        })
                    }
                }
            }
            Self::Script(value) => value.clone(),
        };
        Ok(value)
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ArgValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for ArgValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for ArgValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<RefPtr<ScriptFunction>> for ArgValue {
    fn from(function: RefPtr<ScriptFunction>) -> Self {
        Self::Function(function)
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        Self::from_lua_value(value)
    }
}

/// Ordered, typed argument list read positionally at call time.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    values: Vec<ArgValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with(mut self, value: impl Into<ArgValue>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn push(&mut self, value: impl Into<ArgValue>) {
        self.values.push(value.into());
    }

    pub fn push_nil(&mut self) {
        self.values.push(ArgValue::Nil);
    }

    pub fn push_bool(&mut self, value: bool) {
        self.values.push(ArgValue::Bool(value));
    }

    pub fn push_integer(&mut self, value: i64) {
        self.values.push(ArgValue::Integer(value));
    }

    pub fn push_number(&mut self, value: f64) {
        self.values.push(ArgValue::Number(value));
    }

    pub fn push_str(&mut self, value: &str) {
        self.values.push(ArgValue::String(value.to_string()));
    }

    pub fn push_function(&mut self, value: RefPtr<ScriptFunction>) {
        self.values.push(ArgValue::Function(value));
    }

    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArgValue> {
        self.values.iter()
    }

    /// Convert to an engine argument pack.
    pub fn to_lua_multi(&self, lua: &Lua) -> CallResult<MultiValue> {
        let mut values = Vec::with_capacity(self.values.len());
        for (index, arg) in self.values.iter().enumerate() {
            values.push(arg.to_lua(lua, index)?);
        }
        Ok(MultiValue::from_vec(values))
    }
}

impl FromIterator<ArgValue> for CallArgs {
    fn from_iter<I: IntoIterator<Item = ArgValue>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Call with fixed positional arguments.
pub fn call<R: FromLuaMulti>(
    flags: CallFlags,
    function: &ScriptFunction,
    args: impl IntoLuaMulti,
) -> CallResult<R> {
    let target = Target::resolve(function)?;
    let values = args
        .into_lua_multi(target.engine.lua())
        .map_err(|e| CallError::ArgumentConversion(e.to_string()))?;
    target.invoke(flags, values)
}

/// Call with a runtime-assembled argument list.
pub fn call_args<R: FromLuaMulti>(
    flags: CallFlags,
    function: &ScriptFunction,
    args: &CallArgs,
) -> CallResult<R> {
    let target = Target::resolve(function)?;
    let values = args.to_lua_multi(target.engine.lua())?;
    target.invoke(flags, values)
}

/// Forward an engine argument pack unchanged.
pub fn vcall<R: FromLuaMulti>(
    flags: CallFlags,
    function: &ScriptFunction,
    args: MultiValue,
) -> CallResult<R> {
    Target::resolve(function)?.invoke(flags, args)
}

struct Target {
    engine: ScriptEngine,
    function: Function,
    signature: Option<Signature>,
}

impl Target {
    fn resolve(function: &ScriptFunction) -> CallResult<Self> {
        if !function.is_live() {
            return Err(CallError::InvalidFunction);
        }
        let engine = function.engine().ok_or(CallError::InvalidFunction)?;
        let lua_function = function.lua_function().ok_or(CallError::InvalidFunction)?;
        Ok(Self {
            engine,
            function: lua_function,
            signature: function.signature(),
        })
    }

    fn invoke<R: FromLuaMulti>(self, flags: CallFlags, values: MultiValue) -> CallResult<R> {
        if let Some(signature) = &self.signature {
            signature.check_values(&values)?;
        }
        let returned = self.engine.invoke(&self.function, flags, values)?;
        R::from_lua_multi(returned, self.engine.lua())
            .map_err(|e| CallError::ReturnType(e.to_string()))
    }
}
