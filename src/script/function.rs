//! Engine function objects and declared call signatures.

use std::fmt;
use std::rc::Rc;

use mlua::{Function, MultiValue, Value};

use super::call::{ArgValue, CallArgs, CallError, CallResult};
use super::engine::{ScriptEngine, WeakEngine};
use super::refptr::RefCounted;
use crate::module::ModuleInfo;

/// Identifier of a function object in the engine's object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u64);

/// Parameter type in a declared signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    /// Any value, including nil.
    Any,
    Bool,
    Integer,
    /// Integers are accepted here as well.
    Number,
    String,
    Table,
    Function,
}

impl ArgType {
    /// Name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Bool => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Table => "table",
            Self::Function => "function",
        }
    }

    /// Whether an engine value satisfies this parameter type.
    pub fn accepts_value(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Bool => matches!(value, Value::Boolean(_)),
            Self::Integer => matches!(value, Value::Integer(_)),
            Self::Number => matches!(value, Value::Integer(_) | Value::Number(_)),
            Self::String => matches!(value, Value::String(_)),
            Self::Table => matches!(value, Value::Table(_)),
            Self::Function => matches!(value, Value::Function(_)),
        }
    }

    /// Whether a host-side argument satisfies this parameter type.
    pub fn accepts_arg(self, arg: &ArgValue) -> bool {
        match (self, arg) {
            (Self::Any, _) => true,
            (Self::Bool, ArgValue::Bool(_)) => true,
            (Self::Integer, ArgValue::Integer(_)) => true,
            (Self::Number, ArgValue::Integer(_) | ArgValue::Number(_)) => true,
            (Self::String, ArgValue::String(_)) => true,
            (Self::Function, ArgValue::Function(_)) => true,
            (_, ArgValue::Script(value)) => self.accepts_value(value),
            _ => false,
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered parameter list a function or hook is declared with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<ArgType>,
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = ArgType>) -> Self {
        Self {
            params: params.into_iter().collect(),
        }
    }

    /// A signature taking no arguments.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn params(&self) -> &[ArgType] {
        &self.params
    }

    /// Check engine values against this signature.
    pub fn check_values(&self, values: &MultiValue) -> CallResult<()> {
        self.check_count(values.len())?;
        for (index, (param, value)) in self.params.iter().zip(values.iter()).enumerate() {
            if !param.accepts_value(value) {
                return Err(CallError::ArgumentType {
                    index,
                    expected: *param,
                    got: value.type_name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check a host-side argument list against this signature.
    pub fn check_args(&self, args: &CallArgs) -> CallResult<()> {
        self.check_count(args.len())?;
        for (index, (param, arg)) in self.params.iter().zip(args.iter()).enumerate() {
            if !param.accepts_arg(arg) {
                return Err(CallError::ArgumentType {
                    index,
                    expected: *param,
                    got: arg.type_name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_count(&self, got: usize) -> CallResult<()> {
        if got != self.params.len() {
            return Err(CallError::ArgumentCount {
                expected: self.params.len(),
                got,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.params.iter().map(|p| p.name()).collect();
        write!(f, "({})", names.join(", "))
    }
}

/// Raw handle to a script function object.
///
/// Copying this handle does not take a reference; wrap it in a
/// [`RefPtr`](super::RefPtr) to own one. A handle whose object is gone, whose
/// engine shut down, or whose module was removed is no longer live and every
/// call through it fails with [`CallError::InvalidFunction`].
#[derive(Clone)]
pub struct ScriptFunction {
    id: ObjectId,
    engine: WeakEngine,
}

impl ScriptFunction {
    pub(crate) fn new(id: ObjectId, engine: WeakEngine) -> Self {
        Self { id, engine }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Whether the object still exists and its owning module is still built.
    pub fn is_live(&self) -> bool {
        self.owner().is_some_and(|owner| owner.is_live())
    }

    /// The module this function was exported from.
    pub fn owner(&self) -> Option<Rc<ModuleInfo>> {
        self.engine.upgrade()?.object_owner(self.id)
    }

    pub fn module_name(&self) -> Option<String> {
        self.owner().map(|owner| owner.name().to_string())
    }

    /// Signature the host declared for this function, if any.
    pub fn signature(&self) -> Option<Signature> {
        self.engine.upgrade()?.object_signature(self.id)
    }

    /// Current engine-side reference count (0 once the object is gone).
    pub fn ref_count(&self) -> u32 {
        self.engine
            .upgrade()
            .map(|engine| engine.object_ref_count(self.id))
            .unwrap_or(0)
    }

    pub(crate) fn engine(&self) -> Option<ScriptEngine> {
        self.engine.upgrade()
    }

    pub(crate) fn lua_function(&self) -> Option<Function> {
        self.engine.upgrade()?.object_function(self.id)
    }
}

impl RefCounted for ScriptFunction {
    fn add_ref(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.add_object_ref(self.id);
        }
    }

    fn release(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.release_object(self.id);
        }
    }
}

impl PartialEq for ScriptFunction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.engine.ptr_eq(&other.engine)
    }
}

impl Eq for ScriptFunction {}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("id", &self.id.0)
            .field("module", &self.module_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_accepts_integer() {
        assert!(ArgType::Number.accepts_value(&Value::Integer(3)));
        assert!(ArgType::Number.accepts_value(&Value::Number(3.5)));
        assert!(!ArgType::Integer.accepts_value(&Value::Number(3.0)));
    }

    #[test]
    fn test_any_accepts_nil() {
        assert!(ArgType::Any.accepts_value(&Value::Nil));
        assert!(ArgType::Any.accepts_arg(&ArgValue::Nil));
        assert!(!ArgType::String.accepts_arg(&ArgValue::Nil));
    }

    #[test]
    fn test_check_args_count_mismatch() {
        let sig = Signature::new([ArgType::String]);
        let err = sig.check_args(&CallArgs::new()).unwrap_err();
        assert_eq!(
            err,
            CallError::ArgumentCount {
                expected: 1,
                got: 0
            }
        );
    }

    #[test]
    fn test_check_args_type_mismatch() {
        let sig = Signature::new([ArgType::String, ArgType::Integer]);
        let args = CallArgs::new().with("name").with(1.5);
        let err = sig.check_args(&args).unwrap_err();
        assert_eq!(
            err,
            CallError::ArgumentType {
                index: 1,
                expected: ArgType::Integer,
                got: "number".to_string()
            }
        );
    }

    #[test]
    fn test_check_values_matches_check_args() {
        let sig = Signature::new([ArgType::Bool]);
        let values = MultiValue::from_vec(vec![Value::Integer(1)]);
        let args = CallArgs::new().with(1i64);
        assert_eq!(sig.check_values(&values), sig.check_args(&args));
    }

    #[test]
    fn test_signature_display() {
        let sig = Signature::new([ArgType::String, ArgType::Number]);
        assert_eq!(sig.to_string(), "(string, number)");
        assert_eq!(Signature::empty().to_string(), "()");
    }
}
