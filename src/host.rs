//! Host lifecycle.
//!
//! [`ScriptHost`] owns one engine together with its hook registry and module
//! manager. Tests can create as many independent hosts as they need.

use std::path::Path;
use std::rc::Rc;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::hook::HookRegistry;
use crate::module::ModuleManager;
use crate::script::{ResourceLimits, ScriptEngine};
use crate::{Result, ScriptHostError};

struct HostState {
    engine: ScriptEngine,
    hooks: Rc<HookRegistry>,
    modules: ModuleManager,
}

/// Explicit initialize/shutdown lifecycle around the scripting runtime.
#[derive(Default)]
pub struct ScriptHost {
    state: Option<HostState>,
}

impl ScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the engine, hook registry and module manager.
    ///
    /// Engine startup failure is returned to the caller.
    pub fn initialize<P: AsRef<Path>>(
        &mut self,
        config: &EngineConfig,
        scripts_dir: P,
    ) -> Result<()> {
        if self.state.is_some() {
            return Err(ScriptHostError::Validation(
                "script host is already initialized".to_string(),
            ));
        }

        let engine = ScriptEngine::with_limits(ResourceLimits::from(config))?;
        let hooks = Rc::new(HookRegistry::new());
        let modules = ModuleManager::new(engine.clone(), Rc::clone(&hooks), scripts_dir);
        self.state = Some(HostState {
            engine,
            hooks,
            modules,
        });
        info!("script host initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn engine(&self) -> Result<&ScriptEngine> {
        Ok(&self.state()?.engine)
    }

    pub fn hook_registry(&self) -> Result<&Rc<HookRegistry>> {
        Ok(&self.state()?.hooks)
    }

    pub fn module_manager(&self) -> Result<&ModuleManager> {
        Ok(&self.state()?.modules)
    }

    /// Expose the registered hooks to scripts. Must run before any build.
    pub fn register_hooks(&self) -> Result<()> {
        let state = self.state()?;
        state.hooks.register_hooks(&state.engine)
    }

    /// Remove all modules, clear all hooks and drop the engine.
    ///
    /// Does nothing on a host that isn't initialized.
    pub fn shutdown(&mut self) {
        let Some(state) = self.state.take() else {
            debug!("shutdown on uninitialized script host");
            return;
        };
        let removed = state.modules.remove_all_modules();
        state.hooks.clear();
        drop(state);
        info!(modules = removed, "script host shut down");
    }

    fn state(&self) -> Result<&HostState> {
        self.state.as_ref().ok_or_else(|| {
            ScriptHostError::Validation("script host is not initialized".to_string())
        })
    }
}

impl Drop for ScriptHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
