//! Hook registry.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use mlua::{Function, Table};
use tracing::{debug, info, warn};

use super::dispatch::Hook;
use super::types::HookReturn;
use crate::module::ModuleInfo;
use crate::script::engine::WeakEngine;
use crate::script::ScriptEngine;
use crate::{Result, ScriptHostError};

/// Owns every hook and exposes them to scripts.
///
/// Hooks are added first, then [`register_hooks`](Self::register_hooks) runs
/// once before any module is built. After that the set of hooks is fixed.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RefCell<Vec<Rc<Hook>>>,
    registered: Cell<bool>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook. Fails on a duplicate name or after registration.
    pub fn add_hook(&self, hook: Hook) -> Result<Rc<Hook>> {
        if self.registered.get() {
            return Err(ScriptHostError::Registration(format!(
                "cannot add hook '{}' after hooks were registered",
                hook.name()
            )));
        }
        if self.find_hook_by_name(hook.name()).is_some() {
            return Err(ScriptHostError::Registration(format!(
                "hook '{}' already exists",
                hook.name()
            )));
        }

        let hook = Rc::new(hook);
        self.hooks.borrow_mut().push(Rc::clone(&hook));
        debug!(hook = hook.name(), signature = %hook.signature(), "hook added");
        Ok(hook)
    }

    pub fn find_hook_by_name(&self, name: &str) -> Option<Rc<Hook>> {
        self.hooks
            .borrow()
            .iter()
            .find(|hook| hook.name() == name)
            .cloned()
    }

    pub fn hooks(&self) -> Vec<Rc<Hook>> {
        self.hooks.borrow().clone()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.borrow().len()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.get()
    }

    /// Expose every hook to scripts.
    ///
    /// Sets the `Hooks` table (hook name to itself) and the `HOOK_CONTINUE`
    /// and `HOOK_HANDLED` constants. Running it again does nothing.
    pub fn register_hooks(&self, engine: &ScriptEngine) -> Result<()> {
        if self.registered.get() {
            debug!("hooks already registered");
            return Ok(());
        }

        let lua = engine.lua();
        let table = lua.create_table()?;
        for hook in self.hooks.borrow().iter() {
            table.set(hook.name(), hook.name())?;
        }
        engine.set_global("Hooks", table)?;
        engine.set_global("HOOK_CONTINUE", HookReturn::CONTINUE_CODE)?;
        engine.set_global("HOOK_HANDLED", HookReturn::HANDLED_CODE)?;

        self.registered.set(true);
        info!(count = self.hook_count(), "hooks registered");
        Ok(())
    }

    /// Bind `HookFunction` and `UnhookFunction` into a module environment.
    pub(crate) fn bind_module_api(
        self: &Rc<Self>,
        engine: &ScriptEngine,
        env: &Table,
        owner: &Rc<ModuleInfo>,
    ) -> Result<()> {
        let registry = Rc::downgrade(self);
        let weak_engine = engine.downgrade();
        let module = Rc::clone(owner);
        let hook_function = engine.create_function(move |_, (name, function): (String, Function)| {
            Ok(hook_script_function(&registry, &weak_engine, &module, &name, function))
        })?;
        env.set("HookFunction", hook_function)?;

        let registry = Rc::downgrade(self);
        let weak_engine = engine.downgrade();
        let unhook_function =
            engine.create_function(move |_, (name, function): (String, Function)| {
                Ok(unhook_script_function(&registry, &weak_engine, &name, &function))
            })?;
        env.set("UnhookFunction", unhook_function)?;
        Ok(())
    }

    /// Unregister every handler owned by `module` from every hook.
    pub fn remove_module_functions(&self, module: &ModuleInfo) -> usize {
        let removed: usize = self
            .hooks()
            .iter()
            .map(|hook| hook.remove_module_functions(module))
            .sum();
        if removed > 0 {
            debug!(module = module.name(), removed, "module hook functions removed");
        }
        removed
    }

    /// Remove all handlers from all hooks.
    pub fn clear(&self) {
        for hook in self.hooks() {
            hook.clear();
        }
    }
}

fn hook_script_function(
    registry: &Weak<HookRegistry>,
    engine: &WeakEngine,
    module: &Rc<ModuleInfo>,
    name: &str,
    function: Function,
) -> bool {
    let (Some(registry), Some(engine)) = (registry.upgrade(), engine.upgrade()) else {
        return false;
    };
    let Some(hook) = registry.find_hook_by_name(name) else {
        warn!(hook = name, module = module.name(), "no such hook");
        return false;
    };
    let handle = engine.function_handle(module, function);
    hook.add_function(&handle).is_ok()
}

fn unhook_script_function(
    registry: &Weak<HookRegistry>,
    engine: &WeakEngine,
    name: &str,
    function: &Function,
) -> bool {
    let (Some(registry), Some(engine)) = (registry.upgrade(), engine.upgrade()) else {
        return false;
    };
    let (Some(hook), Some(handle)) = (
        registry.find_hook_by_name(name),
        engine.existing_function_handle(function),
    ) else {
        return false;
    };
    handle.get().is_some_and(|f| hook.remove_function(f))
}
