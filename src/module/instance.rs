//! A built module.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use mlua::{FromLua, Function, IntoLua, Table};

use super::types::{AccessMask, ModuleDescriptor, ModuleId, ModuleInfo};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::script::engine::WeakEngine;
use crate::script::{RefPtr, ScriptEngine, ScriptFunction, Signature};
use crate::{Result, ScriptHostError};

/// One compiled script unit with its own scheduler.
///
/// Modules are created by [`ModuleManager::build_module`](super::ModuleManager::build_module)
/// and live until they are removed from the manager. After removal the
/// handle still exists for anyone holding it, but [`Module::is_live`]
/// returns false and lookups fail.
pub struct Module {
    info: Rc<ModuleInfo>,
    descriptor: Rc<ModuleDescriptor>,
    env: RefCell<Option<Table>>,
    scheduler: Scheduler,
    engine: WeakEngine,
    this: Weak<Module>,
}

impl Module {
    pub(crate) fn new(
        engine: &ScriptEngine,
        info: Rc<ModuleInfo>,
        descriptor: Rc<ModuleDescriptor>,
        env: Table,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            scheduler: Scheduler::new(Rc::clone(&info)),
            info,
            descriptor,
            env: RefCell::new(Some(env)),
            engine: engine.downgrade(),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> ModuleId {
        self.info.id()
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn info(&self) -> &Rc<ModuleInfo> {
        &self.info
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn access_mask(&self) -> AccessMask {
        self.info.access_mask()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Script-side handle to this module's scheduler.
    pub fn scheduler_handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.this.clone())
    }

    pub fn is_live(&self) -> bool {
        self.info.is_live()
    }

    /// Look up a function the module defines.
    pub fn function(&self, name: &str) -> Option<RefPtr<ScriptFunction>> {
        if !self.is_live() {
            return None;
        }
        let engine = self.engine.upgrade()?;
        let env = self.env.borrow().clone()?;
        engine.find_function(&env, &self.info, name)
    }

    /// Look up a function and declare the signature calls must match.
    pub fn function_with_signature(
        &self,
        name: &str,
        signature: Signature,
    ) -> Result<RefPtr<ScriptFunction>> {
        let function = self.function(name).ok_or_else(|| {
            ScriptHostError::NotFound(format!("function '{}' in module '{}'", name, self.name()))
        })?;
        if let (Some(engine), Some(f)) = (self.engine.upgrade(), function.get()) {
            engine.set_object_signature(f.id(), signature);
        }
        Ok(function)
    }

    /// Set a variable in the module's environment.
    pub fn set_global<V: IntoLua>(&self, name: &str, value: V) -> Result<()> {
        let env = self.env()?;
        env.set(name, value).map_err(|e| {
            ScriptHostError::Engine(format!(
                "failed to set '{}' in module '{}': {}",
                name,
                self.name(),
                e
            ))
        })
    }

    /// Read a variable from the module's environment (falls back to globals).
    pub fn get_global<V: FromLua>(&self, name: &str) -> Result<V> {
        let env = self.env()?;
        env.get(name).map_err(|e| {
            ScriptHostError::Engine(format!(
                "failed to get '{}' from module '{}': {}",
                name,
                self.name(),
                e
            ))
        })
    }

    /// Wrap an engine function value passed in by this module's scripts.
    ///
    /// The handle belongs to the module that defined the function; this module
    /// owns it only when it has no module environment.
    pub(crate) fn function_from_value(&self, function: Function) -> Result<RefPtr<ScriptFunction>> {
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| ScriptHostError::Engine("engine has shut down".to_string()))?;
        Ok(engine.function_handle(&self.info, function))
    }

    /// Mark the module removed and let go of its compiled unit.
    ///
    /// The environment table itself is left intact, so script code still on
    /// the stack can finish.
    pub(crate) fn discard(&self) {
        self.info.mark_removed();
        self.scheduler.clear();
        self.env.borrow_mut().take();
    }

    fn env(&self) -> Result<Table> {
        if !self.is_live() {
            return Err(ScriptHostError::NotFound(format!(
                "module '{}' (removed)",
                self.name()
            )));
        }
        self.env
            .borrow()
            .clone()
            .ok_or_else(|| ScriptHostError::NotFound(format!("module '{}'", self.name())))
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("descriptor", &self.descriptor.name())
            .field("live", &self.is_live())
            .finish()
    }
}
