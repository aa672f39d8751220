//! Module manager.
//!
//! Holds the module descriptors and the built modules. A build either
//! produces a fully wired module or leaves the manager exactly as it was.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::builder::{ModuleBuilder, SectionBuilder};
use super::instance::Module;
use super::types::{AccessMask, ModuleDescriptor, ModuleId, ModuleInfo, ModulePriority};
use crate::hook::HookRegistry;
use crate::script::ScriptEngine;
use crate::{Result, ScriptHostError};

/// Builds, tracks and removes modules.
pub struct ModuleManager {
    engine: ScriptEngine,
    hooks: Rc<HookRegistry>,
    scripts_dir: PathBuf,
    /// Sorted by priority, highest first.
    descriptors: RefCell<Vec<Rc<ModuleDescriptor>>>,
    /// Sorted by descriptor priority, then build order.
    modules: RefCell<Vec<Rc<Module>>>,
}

impl ModuleManager {
    pub fn new<P: AsRef<Path>>(
        engine: ScriptEngine,
        hooks: Rc<HookRegistry>,
        scripts_dir: P,
    ) -> Self {
        Self {
            engine,
            hooks,
            scripts_dir: scripts_dir.as_ref().to_path_buf(),
            descriptors: RefCell::new(Vec::new()),
            modules: RefCell::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    pub fn hook_registry(&self) -> &Rc<HookRegistry> {
        &self.hooks
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Register a class of module. Fails if the name is taken.
    pub fn add_descriptor(
        &self,
        name: &str,
        access: AccessMask,
        priority: ModulePriority,
    ) -> Result<Rc<ModuleDescriptor>> {
        if name.is_empty() {
            return Err(ScriptHostError::Validation(
                "descriptor name must not be empty".to_string(),
            ));
        }
        if self.find_descriptor_by_name(name).is_some() {
            return Err(ScriptHostError::Registration(format!(
                "descriptor '{}' already exists",
                name
            )));
        }

        let descriptor = Rc::new(ModuleDescriptor::new(name, access, priority));
        let mut descriptors = self.descriptors.borrow_mut();
        // Equal priorities keep registration order.
        let index = descriptors.partition_point(|d| d.priority() >= priority);
        descriptors.insert(index, Rc::clone(&descriptor));
        debug!(
            descriptor = name,
            access = access.bits(),
            priority = priority.0,
            "descriptor added"
        );
        Ok(descriptor)
    }

    pub fn find_descriptor_by_name(&self, name: &str) -> Option<Rc<ModuleDescriptor>> {
        self.descriptors
            .borrow()
            .iter()
            .find(|d| d.name() == name)
            .cloned()
    }

    /// All descriptors, highest priority first.
    pub fn descriptors(&self) -> Vec<Rc<ModuleDescriptor>> {
        self.descriptors.borrow().clone()
    }

    /// Build a module from `builder` under the named descriptor.
    ///
    /// The builder's `add_scripts` supplies the sources. After compilation
    /// `post_build` is told whether it succeeded and may bind globals into the
    /// module. A failure at any step discards the module.
    pub fn build_module(
        &self,
        descriptor_name: &str,
        module_name: &str,
        builder: &mut dyn ModuleBuilder,
    ) -> Result<Rc<Module>> {
        let result = self.try_build(descriptor_name, module_name, builder);
        match &result {
            Ok(module) => info!(
                module = module_name,
                descriptor = descriptor_name,
                id = %module.id(),
                "module built"
            ),
            Err(e) => warn!(
                module = module_name,
                descriptor = descriptor_name,
                error = %e,
                "module build failed"
            ),
        }
        result
    }

    fn try_build(
        &self,
        descriptor_name: &str,
        module_name: &str,
        builder: &mut dyn ModuleBuilder,
    ) -> Result<Rc<Module>> {
        if !self.hooks.is_registered() {
            return Err(ScriptHostError::Build(
                "hooks must be registered before building modules".to_string(),
            ));
        }
        let descriptor = self.find_descriptor_by_name(descriptor_name).ok_or_else(|| {
            ScriptHostError::Build(format!("descriptor '{}' not found", descriptor_name))
        })?;
        if module_name.is_empty() {
            return Err(ScriptHostError::Build(
                "module name must not be empty".to_string(),
            ));
        }
        if self.find_module_by_name(module_name).is_some() {
            return Err(ScriptHostError::Build(format!(
                "module '{}' already exists",
                module_name
            )));
        }

        let mut sections = SectionBuilder::new(&self.scripts_dir);
        builder.add_scripts(&mut sections).map_err(|e| {
            ScriptHostError::Build(format!("adding scripts to '{}' failed: {}", module_name, e))
        })?;
        if sections.is_empty() {
            return Err(ScriptHostError::Build(format!(
                "module '{}' has no script sections",
                module_name
            )));
        }
        debug!(module = module_name, sections = sections.len(), "sections added");

        let info = Rc::new(ModuleInfo::new(
            self.engine.next_module_id(),
            module_name,
            descriptor.access_mask(),
            descriptor.priority(),
        ));
        let env = self.engine.create_module_env(&info)?;
        self.hooks.bind_module_api(&self.engine, &env, &info)?;

        let module = Module::new(&self.engine, Rc::clone(&info), descriptor, env.clone());
        let compiled = self.engine.compile(&env, sections.sections());
        let success = compiled.is_ok();
        let post_build = builder.post_build(success, &module);

        if let Err(e) = compiled.and(post_build) {
            self.discard(&module);
            return Err(match e {
                ScriptHostError::Build(_) => e,
                other => ScriptHostError::Build(format!(
                    "post-build of '{}' failed: {}",
                    module_name, other
                )),
            });
        }

        let mut modules = self.modules.borrow_mut();
        let priority = module.descriptor().priority();
        let index = modules.partition_point(|m| m.descriptor().priority() >= priority);
        modules.insert(index, Rc::clone(&module));
        Ok(module)
    }

    pub fn find_module_by_name(&self, name: &str) -> Option<Rc<Module>> {
        self.modules
            .borrow()
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }

    pub fn find_module_by_id(&self, id: ModuleId) -> Option<Rc<Module>> {
        self.modules.borrow().iter().find(|m| m.id() == id).cloned()
    }

    /// Built modules, highest descriptor priority first.
    pub fn modules(&self) -> Vec<Rc<Module>> {
        self.modules.borrow().clone()
    }

    pub fn module_count(&self) -> usize {
        self.modules.borrow().len()
    }

    /// Remove a module: its hook handlers, pending continuations and compiled unit.
    ///
    /// Safe to call from script code of the module being removed, including
    /// from inside a hook dispatch.
    pub fn remove_module(&self, module: &Module) -> Result<()> {
        let removed = {
            let mut modules = self.modules.borrow_mut();
            let index = modules
                .iter()
                .position(|m| Rc::ptr_eq(m.info(), module.info()))
                .ok_or_else(|| ScriptHostError::NotFound(format!("module '{}'", module.name())))?;
            modules.remove(index)
        };
        self.discard(&removed);
        info!(module = removed.name(), id = %removed.id(), "module removed");
        Ok(())
    }

    /// Remove every module built from the named descriptor.
    pub fn remove_modules_by_descriptor(&self, descriptor_name: &str) -> usize {
        let removed: Vec<Rc<Module>> = {
            let mut modules = self.modules.borrow_mut();
            let (removed, kept): (Vec<_>, Vec<_>) = modules
                .drain(..)
                .partition(|m| m.descriptor().name() == descriptor_name);
            *modules = kept;
            removed
        };
        for module in &removed {
            self.discard(module);
            info!(module = module.name(), id = %module.id(), "module removed");
        }
        removed.len()
    }

    /// Remove every module, lowest priority first.
    pub fn remove_all_modules(&self) -> usize {
        let removed: Vec<Rc<Module>> = self.modules.borrow_mut().drain(..).rev().collect();
        for module in &removed {
            self.discard(module);
            info!(module = module.name(), id = %module.id(), "module removed");
        }
        removed.len()
    }

    fn discard(&self, module: &Module) {
        module.discard();
        self.hooks.remove_module_functions(module.info());
    }
}
