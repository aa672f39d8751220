//! Lua script engine with sandboxing.
//!
//! This is the engine collaborator the rest of the crate builds on: it
//! compiles source sections into per-module environments, looks up and
//! invokes functions, reads and writes globals, and keeps the reference
//! count of every function object handed out to the host.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mlua::{
    AnyUserData, Function, HookTriggers, Lua, MultiValue, Result as LuaResult, Table, UserData,
    Value, VmState,
};
use tracing::{debug, trace};

use super::call::{CallError, CallFlags, CallResult};
use super::function::{ObjectId, ScriptFunction, Signature};
use super::refptr::RefPtr;
use crate::config::EngineConfig;
use crate::module::{ModuleId, ModuleInfo, Section};
use crate::{Result, ScriptHostError};

/// Resource limits for script execution.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum number of instructions per top-level call (0 = unlimited).
    pub max_instructions: u64,
    /// Maximum memory in bytes (0 = unlimited).
    pub max_memory: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_instructions: 1_000_000,
            max_memory: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl From<&EngineConfig> for ResourceLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_instructions: config.max_instructions,
            max_memory: config.max_memory_mb.saturating_mul(1024 * 1024),
        }
    }
}

/// Metatable key tagging a module environment with its module.
const ENV_OWNER_KEY: &str = "__owner";

struct EnvOwner(Rc<ModuleInfo>);

impl UserData for EnvOwner {}

/// A function object exported to the host.
struct FunctionObject {
    function: Function,
    owner: Rc<ModuleInfo>,
    signature: Option<Signature>,
    refs: u32,
    pointer: usize,
}

#[derive(Default)]
struct ObjectTable {
    entries: HashMap<ObjectId, FunctionObject>,
    by_pointer: HashMap<usize, ObjectId>,
    next_id: u64,
}

impl ObjectTable {
    /// Find or create the entry for `function` and take one reference to it.
    fn acquire(&mut self, owner: &Rc<ModuleInfo>, function: Function) -> ObjectId {
        let pointer = function.to_pointer() as usize;
        if let Some(id) = self.by_pointer.get(&pointer).copied() {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.refs += 1;
                return id;
            }
        }

        self.next_id += 1;
        let id = ObjectId(self.next_id);
        self.entries.insert(
            id,
            FunctionObject {
                function,
                owner: Rc::clone(owner),
                signature: None,
                refs: 1,
                pointer,
            },
        );
        self.by_pointer.insert(pointer, id);
        id
    }

    fn add_ref(&mut self, id: ObjectId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.refs += 1;
        }
    }

    /// Drop one reference; returns the object if that was the last one.
    fn release(&mut self, id: ObjectId) -> Option<FunctionObject> {
        let entry = self.entries.get_mut(&id)?;
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return None;
        }
        let entry = self.entries.remove(&id)?;
        self.by_pointer.remove(&entry.pointer);
        Some(entry)
    }
}

pub(crate) struct EngineInner {
    // Dropped before `lua`: it holds engine references.
    objects: RefCell<ObjectTable>,
    lua: Lua,
    limits: ResourceLimits,
    instruction_count: Arc<AtomicU64>,
    call_depth: Cell<u32>,
    module_ids: Cell<u64>,
}

/// Lua script execution engine with sandboxing.
///
/// Cloning gives another handle to the same engine.
#[derive(Clone)]
pub struct ScriptEngine {
    inner: Rc<EngineInner>,
}

/// Non-owning engine handle held by function objects and schedulers.
#[derive(Clone)]
pub(crate) struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    pub(crate) fn upgrade(&self) -> Option<ScriptEngine> {
        self.inner.upgrade().map(|inner| ScriptEngine { inner })
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

/// Installs the instruction limit for the outermost call and removes it again.
struct CallGuard<'a> {
    engine: &'a EngineInner,
    limited: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.engine
            .call_depth
            .set(self.engine.call_depth.get().saturating_sub(1));
        if self.limited {
            let _ = self.engine.lua.remove_hook();
        }
    }
}

impl ScriptEngine {
    /// Create a new ScriptEngine with default resource limits.
    pub fn new() -> Result<Self> {
        Self::with_limits(ResourceLimits::default())
    }

    /// Create a new ScriptEngine with custom resource limits.
    pub fn with_limits(limits: ResourceLimits) -> Result<Self> {
        // Create Lua with safe standard libraries
        let lua = Lua::new();

        // Apply sandbox restrictions
        Self::apply_sandbox(&lua)?;

        // Set memory limit if specified
        if limits.max_memory > 0 {
            lua.set_memory_limit(limits.max_memory).map_err(|e| {
                ScriptHostError::Engine(format!("Failed to set memory limit: {}", e))
            })?;
        }

        debug!(
            max_instructions = limits.max_instructions,
            max_memory = limits.max_memory,
            "script engine created"
        );

        Ok(Self {
            inner: Rc::new(EngineInner {
                lua,
                limits,
                instruction_count: Arc::new(AtomicU64::new(0)),
                call_depth: Cell::new(0),
                module_ids: Cell::new(0),
                objects: RefCell::new(ObjectTable::default()),
            }),
        })
    }

    /// Apply sandbox restrictions to the Lua environment.
    fn apply_sandbox(lua: &Lua) -> Result<()> {
        let globals = lua.globals();

        for name in [
            "os",
            "io",
            "loadfile",
            "dofile",
            "load",
            "require",
            "package",
            "debug",
            "collectgarbage",
        ] {
            globals.set(name, Value::Nil).map_err(|e| {
                ScriptHostError::Engine(format!("Failed to disable {}: {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Execute Lua source code in the shared global environment.
    pub fn execute(&self, source: &str) -> Result<()> {
        let chunk = self
            .inner
            .lua
            .load(source)
            .into_function()
            .map_err(|e| ScriptHostError::Engine(format!("Script error: {}", e)))?;
        self.invoke(&chunk, CallFlags::NONE, MultiValue::new())
            .map_err(|e| ScriptHostError::Engine(format!("Script error: {}", e)))?;
        Ok(())
    }

    /// Set a global value in the Lua environment.
    pub fn set_global<V: mlua::IntoLua>(&self, name: &str, value: V) -> Result<()> {
        self.inner.lua.globals().set(name, value).map_err(|e| {
            ScriptHostError::Engine(format!("Failed to set global '{}': {}", name, e))
        })
    }

    /// Get a global value from the Lua environment.
    pub fn get_global<V: mlua::FromLua>(&self, name: &str) -> Result<V> {
        self.inner.lua.globals().get(name).map_err(|e| {
            ScriptHostError::Engine(format!("Failed to get global '{}': {}", name, e))
        })
    }

    /// Create a Lua function from a Rust closure.
    pub fn create_function<F, A, R>(&self, func: F) -> Result<Function>
    where
        F: Fn(&Lua, A) -> LuaResult<R> + 'static,
        A: mlua::FromLuaMulti,
        R: mlua::IntoLuaMulti,
    {
        self.inner
            .lua
            .create_function(func)
            .map_err(|e| ScriptHostError::Engine(format!("Failed to create function: {}", e)))
    }

    /// Expose a Rust closure to every module as a global function.
    pub fn register_function<F, A, R>(&self, name: &str, func: F) -> Result<()>
    where
        F: Fn(&Lua, A) -> LuaResult<R> + 'static,
        A: mlua::FromLuaMulti,
        R: mlua::IntoLuaMulti,
    {
        let function = self.create_function(func)?;
        self.set_global(name, function)?;
        debug!(name, "registered global function");
        Ok(())
    }

    /// Instructions used by the most recent limited top-level call.
    pub fn instruction_count(&self) -> u64 {
        self.inner.instruction_count.load(Ordering::SeqCst)
    }

    /// Get the resource limits.
    pub fn limits(&self) -> &ResourceLimits {
        &self.inner.limits
    }

    /// Get a reference to the underlying Lua instance.
    pub fn lua(&self) -> &Lua {
        &self.inner.lua
    }

    /// Number of function objects currently referenced by the host.
    pub fn live_object_count(&self) -> usize {
        self.inner.objects.borrow().entries.len()
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Allocate a module id, unique for the lifetime of this engine.
    pub(crate) fn next_module_id(&self) -> ModuleId {
        let id = self.inner.module_ids.get() + 1;
        self.inner.module_ids.set(id);
        ModuleId(id)
    }

    /// Create an empty environment for `owner` that falls back to the globals.
    ///
    /// The environment's metatable records `owner` and is protected from
    /// scripts.
    pub(crate) fn create_module_env(&self, owner: &Rc<ModuleInfo>) -> Result<Table> {
        let lua = &self.inner.lua;
        let env = lua.create_table()?;
        let meta = lua.create_table()?;
        meta.set("__index", lua.globals())?;
        meta.raw_set(ENV_OWNER_KEY, EnvOwner(Rc::clone(owner)))?;
        meta.set("__metatable", false)?;
        env.set_metatable(Some(meta));
        Ok(env)
    }

    /// The module whose environment `function` runs in.
    ///
    /// `None` for host functions and functions using the shared globals.
    pub(crate) fn env_owner(function: &Function) -> Option<Rc<ModuleInfo>> {
        let meta = function.environment()?.metatable()?;
        let tag = meta.raw_get::<AnyUserData>(ENV_OWNER_KEY).ok()?;
        let owner = tag.borrow::<EnvOwner>().ok()?;
        Some(Rc::clone(&owner.0))
    }

    /// Compile every section into `env`, then run their top-level code in order.
    ///
    /// Nothing runs unless all sections compile.
    pub(crate) fn compile(&self, env: &Table, sections: &[Section]) -> Result<()> {
        let mut chunks = Vec::with_capacity(sections.len());
        for section in sections {
            let chunk = self
                .inner
                .lua
                .load(section.code())
                .set_name(section.name())
                .set_environment(env.clone())
                .into_function()
                .map_err(|e| {
                    ScriptHostError::Build(format!("section '{}': {}", section.name(), e))
                })?;
            chunks.push((section.name(), chunk));
        }

        for (name, chunk) in chunks {
            self.invoke(&chunk, CallFlags::NONE, MultiValue::new())
                .map_err(|e| ScriptHostError::Build(format!("section '{}': {}", name, e)))?;
            trace!(section = name, "section executed");
        }

        Ok(())
    }

    /// Look up a function defined by a module (not inherited from globals).
    pub(crate) fn find_function(
        &self,
        env: &Table,
        owner: &Rc<ModuleInfo>,
        name: &str,
    ) -> Option<RefPtr<ScriptFunction>> {
        match env.raw_get::<Value>(name) {
            Ok(Value::Function(function)) => Some(self.function_handle(owner, function)),
            _ => None,
        }
    }

    /// Take a reference to the function object for `function`.
    ///
    /// The object belongs to the module that defined the function. `caller`
    /// owns it only when the function has no module environment.
    pub(crate) fn function_handle(
        &self,
        caller: &Rc<ModuleInfo>,
        function: Function,
    ) -> RefPtr<ScriptFunction> {
        let owner = Self::env_owner(&function).unwrap_or_else(|| Rc::clone(caller));
        let id = self.inner.objects.borrow_mut().acquire(&owner, function);
        RefPtr::adopt(ScriptFunction::new(id, self.downgrade()))
    }

    /// Take a reference to the function object for `function`, if one exists.
    pub(crate) fn existing_function_handle(
        &self,
        function: &Function,
    ) -> Option<RefPtr<ScriptFunction>> {
        let pointer = function.to_pointer() as usize;
        let id = self.inner.objects.borrow().by_pointer.get(&pointer).copied()?;
        Some(RefPtr::new(ScriptFunction::new(id, self.downgrade())))
    }

    pub(crate) fn add_object_ref(&self, id: ObjectId) {
        self.inner.objects.borrow_mut().add_ref(id);
    }

    pub(crate) fn release_object(&self, id: ObjectId) {
        let released = self.inner.objects.borrow_mut().release(id);
        if let Some(object) = released {
            trace!(object = id.0, module = object.owner.name(), "function object released");
        }
    }

    pub(crate) fn object_ref_count(&self, id: ObjectId) -> u32 {
        self.inner
            .objects
            .borrow()
            .entries
            .get(&id)
            .map(|entry| entry.refs)
            .unwrap_or(0)
    }

    pub(crate) fn object_owner(&self, id: ObjectId) -> Option<Rc<ModuleInfo>> {
        self.inner
            .objects
            .borrow()
            .entries
            .get(&id)
            .map(|entry| Rc::clone(&entry.owner))
    }

    pub(crate) fn object_function(&self, id: ObjectId) -> Option<Function> {
        self.inner
            .objects
            .borrow()
            .entries
            .get(&id)
            .map(|entry| entry.function.clone())
    }

    pub(crate) fn object_signature(&self, id: ObjectId) -> Option<Signature> {
        self.inner
            .objects
            .borrow()
            .entries
            .get(&id)
            .and_then(|entry| entry.signature.clone())
    }

    pub(crate) fn set_object_signature(&self, id: ObjectId, signature: Signature) {
        if let Some(entry) = self.inner.objects.borrow_mut().entries.get_mut(&id) {
            entry.signature = Some(signature);
        }
    }

    /// Run `function` synchronously to completion.
    pub(crate) fn invoke(
        &self,
        function: &Function,
        flags: CallFlags,
        args: MultiValue,
    ) -> CallResult<MultiValue> {
        let _guard = self.enter_call(flags);
        function
            .call::<MultiValue>(args)
            .map_err(|e| CallError::Exception(e.to_string()))
    }

    fn enter_call(&self, flags: CallFlags) -> CallGuard<'_> {
        let inner = &*self.inner;
        let depth = inner.call_depth.get();
        let limit = inner.limits.max_instructions;
        let limited = depth == 0 && limit > 0 && !flags.contains(CallFlags::UNLIMITED);

        if limited {
            // Reset instruction count
            inner.instruction_count.store(0, Ordering::SeqCst);

            // Set up instruction hook for limiting execution
            let count = Arc::clone(&inner.instruction_count);
            inner.lua.set_hook(
                HookTriggers::new().every_nth_instruction(10000),
                move |_lua, _debug| {
                    let current = count.fetch_add(10000, Ordering::SeqCst) + 10000;
                    if current > limit {
                        Err(mlua::Error::RuntimeError(
                            "Script exceeded instruction limit".to_string(),
                        ))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
        }

        inner.call_depth.set(depth + 1);
        CallGuard {
            engine: inner,
            limited,
        }
    }
}
