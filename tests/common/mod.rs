//! Test helpers for integration tests.
//!
//! Provides a fixture wiring an engine, hook registry and module manager,
//! plus a configurable builder for exercising build failures.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use scripthost::{
    AccessMask, Hook, HookRegistry, Module, ModuleBuilder, ModuleManager, ModulePriority,
    ScriptEngine, ScriptHostError, SectionBuilder,
};

/// Engine, hooks and manager for one test.
pub struct Fixture {
    pub manager: Rc<ModuleManager>,
    pub hooks: Rc<HookRegistry>,
    pub engine: ScriptEngine,
    /// Tags passed to the script-visible `Record` function, in call order.
    pub records: Rc<RefCell<Vec<String>>>,
}

impl Fixture {
    /// Register `hooks`, then the `MapScript` and `Plugin` descriptors.
    pub fn new(hooks: Vec<Hook>) -> Self {
        let fixture = Self::unregistered(hooks);
        fixture.hooks.register_hooks(&fixture.engine).unwrap();
        fixture
    }

    /// Like [`Fixture::new`] but without running the hook registration pass.
    pub fn unregistered(hooks: Vec<Hook>) -> Self {
        let engine = ScriptEngine::new().unwrap();
        let registry = Rc::new(HookRegistry::new());
        for hook in hooks {
            registry.add_hook(hook).unwrap();
        }

        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        engine
            .register_function("Record", move |_, tag: String| {
                sink.borrow_mut().push(tag);
                Ok(())
            })
            .unwrap();

        let manager = Rc::new(ModuleManager::new(
            engine.clone(),
            Rc::clone(&registry),
            ".",
        ));
        manager
            .add_descriptor("MapScript", AccessMask::MAP_SCRIPT, ModulePriority::HIGHEST)
            .unwrap();
        manager
            .add_descriptor("Plugin", AccessMask::PLUGIN, ModulePriority::DEFAULT)
            .unwrap();

        Self {
            manager,
            hooks: registry,
            engine,
            records,
        }
    }

    /// Build a module from inline source; panics on failure.
    pub fn build(&self, descriptor: &str, name: &str, code: &str) -> Rc<Module> {
        let mut builder = TestBuilder::new(code);
        self.manager
            .build_module(descriptor, name, &mut builder)
            .unwrap()
    }

    pub fn hook(&self, name: &str) -> Rc<Hook> {
        self.hooks.find_hook_by_name(name).unwrap()
    }

    pub fn records(&self) -> Vec<String> {
        self.records.borrow().clone()
    }

    pub fn clear_records(&self) {
        self.records.borrow_mut().clear();
    }
}

/// Builder whose phases can be told to fail.
pub struct TestBuilder {
    pub code: String,
    pub fail_add_scripts: bool,
    pub fail_post_build: bool,
    /// The `success` flag of every `post_build` call.
    pub post_build_calls: Vec<bool>,
}

impl TestBuilder {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            fail_add_scripts: false,
            fail_post_build: false,
            post_build_calls: Vec::new(),
        }
    }
}

impl ModuleBuilder for TestBuilder {
    fn add_scripts(&mut self, sections: &mut SectionBuilder) -> scripthost::Result<()> {
        if self.fail_add_scripts {
            return Err(ScriptHostError::Build("scripts refused".to_string()));
        }
        sections.add_section_from_memory("test", &self.code)
    }

    fn post_build(&mut self, success: bool, module: &Module) -> scripthost::Result<()> {
        self.post_build_calls.push(success);
        if !success {
            return Err(ScriptHostError::Build("compilation failed".to_string()));
        }
        if self.fail_post_build {
            return Err(ScriptHostError::Build("post-build refused".to_string()));
        }
        module.set_global("Scheduler", module.scheduler_handle())
    }
}
