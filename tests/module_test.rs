//! Module manager tests: descriptors, all-or-nothing builds and removal.

mod common;

use std::fs;

use common::{Fixture, TestBuilder};
use scripthost::{
    AccessMask, ArgType, Hook, ModulePriority, ScriptFileBuilder, ScriptHostError, Signature,
    StopMode,
};

fn main_hook() -> Hook {
    Hook::new(
        "Main",
        Signature::new([ArgType::String]),
        AccessMask::ALL,
        StopMode::None,
    )
}

const HOOKING_MODULE: &str = r#"
function OnMain(message) Record("main") end
HookFunction(Hooks.Main, OnMain)
"#;

#[test]
fn test_add_scripts_failure_leaves_no_module() {
    let fx = Fixture::new(vec![main_hook()]);
    let mut builder = TestBuilder::new("x = 1");
    builder.fail_add_scripts = true;

    let result = fx.manager.build_module("MapScript", "MapModule", &mut builder);
    assert!(matches!(result, Err(ScriptHostError::Build(_))));
    assert!(builder.post_build_calls.is_empty());
    assert!(fx.manager.find_module_by_name("MapModule").is_none());
    assert_eq!(fx.manager.module_count(), 0);

    // The name is still available.
    let module = fx.build("MapScript", "MapModule", "x = 1");
    assert_eq!(module.name(), "MapModule");
    assert_eq!(fx.manager.module_count(), 1);
}

#[test]
fn test_post_build_failure_discards_module() {
    let fx = Fixture::new(vec![main_hook()]);
    let mut builder = TestBuilder::new(HOOKING_MODULE);
    builder.fail_post_build = true;

    let result = fx.manager.build_module("MapScript", "MapModule", &mut builder);
    assert!(matches!(result, Err(ScriptHostError::Build(_))));
    assert_eq!(builder.post_build_calls, vec![true]);
    assert_eq!(fx.manager.module_count(), 0);
    // The hook registration made while compiling is undone as well.
    assert_eq!(fx.hook("Main").handler_count(), 0);

    fx.build("MapScript", "MapModule", HOOKING_MODULE);
    assert_eq!(fx.hook("Main").handler_count(), 1);
}

#[test]
fn test_compile_error_reports_failure_to_post_build() {
    let fx = Fixture::new(vec![]);
    let mut builder = TestBuilder::new("function broken(");

    let result = fx.manager.build_module("Plugin", "Broken", &mut builder);
    assert!(matches!(result, Err(ScriptHostError::Build(_))));
    assert_eq!(builder.post_build_calls, vec![false]);
    assert!(fx.manager.find_module_by_name("Broken").is_none());
}

#[test]
fn test_runtime_error_in_top_level_code_fails_build() {
    let fx = Fixture::new(vec![]);
    let mut builder = TestBuilder::new("error('init failed')");

    let err = fx
        .manager
        .build_module("Plugin", "Faulty", &mut builder)
        .unwrap_err();
    assert!(err.to_string().contains("init failed"));
    assert_eq!(fx.manager.module_count(), 0);
}

#[test]
fn test_duplicate_module_name_fails() {
    let fx = Fixture::new(vec![]);
    fx.build("Plugin", "Plugin1", "x = 1");

    let mut builder = TestBuilder::new("x = 2");
    let result = fx.manager.build_module("MapScript", "Plugin1", &mut builder);
    assert!(matches!(result, Err(ScriptHostError::Build(_))));
    assert_eq!(fx.manager.module_count(), 1);
}

#[test]
fn test_missing_descriptor_fails() {
    let fx = Fixture::new(vec![]);
    let mut builder = TestBuilder::new("x = 1");
    let err = fx
        .manager
        .build_module("Unknown", "Module", &mut builder)
        .unwrap_err();
    assert!(err.to_string().contains("Unknown"));
}

#[test]
fn test_build_requires_registered_hooks() {
    let fx = Fixture::unregistered(vec![main_hook()]);
    let mut builder = TestBuilder::new("x = 1");
    let result = fx.manager.build_module("Plugin", "Early", &mut builder);
    assert!(matches!(result, Err(ScriptHostError::Build(_))));
}

#[test]
fn test_empty_builder_fails() {
    let fx = Fixture::new(vec![]);
    let mut builder = ScriptFileBuilder::new();
    let result = fx.manager.build_module("Plugin", "Empty", &mut builder);
    assert!(matches!(result, Err(ScriptHostError::Build(_))));
}

#[test]
fn test_duplicate_descriptor_is_rejected() {
    let fx = Fixture::new(vec![]);
    let result = fx
        .manager
        .add_descriptor("Plugin", AccessMask::ALL, ModulePriority::HIGH);
    assert!(matches!(result, Err(ScriptHostError::Registration(_))));

    let plugin = fx.manager.find_descriptor_by_name("Plugin").unwrap();
    assert_eq!(plugin.access_mask(), AccessMask::PLUGIN);
}

#[test]
fn test_descriptors_ordered_by_priority() {
    let fx = Fixture::new(vec![]);
    fx.manager
        .add_descriptor("Late", AccessMask::SHARED, ModulePriority::LOWEST)
        .unwrap();
    fx.manager
        .add_descriptor("Core", AccessMask::SHARED, ModulePriority::HIGH)
        .unwrap();

    let names: Vec<String> = fx
        .manager
        .descriptors()
        .iter()
        .map(|d| d.name().to_string())
        .collect();
    assert_eq!(names, vec!["MapScript", "Core", "Plugin", "Late"]);
}

#[test]
fn test_modules_ordered_by_descriptor_priority_then_build_order() {
    let fx = Fixture::new(vec![]);
    fx.build("Plugin", "PluginA", "x = 1");
    fx.build("MapScript", "Map", "x = 1");
    fx.build("Plugin", "PluginB", "x = 1");

    let names: Vec<String> = fx
        .manager
        .modules()
        .iter()
        .map(|m| m.name().to_string())
        .collect();
    assert_eq!(names, vec!["Map", "PluginA", "PluginB"]);
}

#[test]
fn test_remove_module_releases_everything() {
    let fx = Fixture::new(vec![main_hook()]);
    let module = fx.build("MapScript", "MapModule", HOOKING_MODULE);
    assert!(module.function("OnMain").is_some());
    assert_eq!(fx.hook("Main").handler_count(), 1);

    fx.manager.remove_module(&module).unwrap();

    assert!(!module.is_live());
    assert!(module.function("OnMain").is_none());
    assert!(module.get_global::<i64>("x").is_err());
    assert_eq!(fx.hook("Main").handler_count(), 0);
    assert!(fx.manager.find_module_by_name("MapModule").is_none());
    assert!(matches!(
        fx.manager.remove_module(&module),
        Err(ScriptHostError::NotFound(_))
    ));
}

#[test]
fn test_remove_modules_by_descriptor_keeps_others() {
    let fx = Fixture::new(vec![]);
    fx.build("MapScript", "Map1", "x = 1");
    fx.build("MapScript", "Map2", "x = 1");
    let plugin = fx.build("Plugin", "Plugin1", "x = 1");

    assert_eq!(fx.manager.remove_modules_by_descriptor("MapScript"), 2);
    assert_eq!(fx.manager.module_count(), 1);
    assert!(plugin.is_live());

    assert_eq!(fx.manager.remove_all_modules(), 1);
    assert!(!plugin.is_live());
}

#[test]
fn test_module_globals_are_isolated() {
    let fx = Fixture::new(vec![]);
    let a = fx.build("Plugin", "A", "value = 1");
    let b = fx.build("Plugin", "B", "value = 2");

    assert_eq!(a.get_global::<i64>("value").unwrap(), 1);
    assert_eq!(b.get_global::<i64>("value").unwrap(), 2);

    a.set_global("value", 10).unwrap();
    assert_eq!(a.get_global::<i64>("value").unwrap(), 10);
    assert_eq!(b.get_global::<i64>("value").unwrap(), 2);
}

#[test]
fn test_file_builder_binds_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("main.lua"),
        "function Start() return Scheduler:GetCurrentTime() end",
    )
    .unwrap();

    let fx = Fixture::new(vec![]);
    let manager = scripthost::ModuleManager::new(
        fx.engine.clone(),
        std::rc::Rc::clone(&fx.hooks),
        dir.path(),
    );
    manager
        .add_descriptor("Plugin", AccessMask::PLUGIN, ModulePriority::DEFAULT)
        .unwrap();

    let mut builder = ScriptFileBuilder::new().with_file("main.lua");
    let module = manager.build_module("Plugin", "Files", &mut builder).unwrap();

    let scheduler: mlua::Value = module.get_global("Scheduler").unwrap();
    assert!(matches!(scheduler, mlua::Value::UserData(_)));
    assert!(module.function("Start").is_some());
}

#[test]
fn test_file_builder_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let fx = Fixture::new(vec![]);
    let manager = scripthost::ModuleManager::new(
        fx.engine.clone(),
        std::rc::Rc::clone(&fx.hooks),
        dir.path(),
    );
    manager
        .add_descriptor("Plugin", AccessMask::PLUGIN, ModulePriority::DEFAULT)
        .unwrap();

    let mut builder = ScriptFileBuilder::new().with_file("missing.lua");
    assert!(manager.build_module("Plugin", "Files", &mut builder).is_err());
    assert_eq!(manager.module_count(), 0);
}

#[test]
fn test_managers_sharing_hooks_keep_modules_apart() {
    let fx = Fixture::new(vec![main_hook()]);
    let first = fx.build(
        "Plugin",
        "First",
        r#"
        function OnMain(message) Record("first") end
        HookFunction(Hooks.Main, OnMain)
        "#,
    );

    let other = scripthost::ModuleManager::new(
        fx.engine.clone(),
        std::rc::Rc::clone(&fx.hooks),
        ".",
    );
    other
        .add_descriptor("Plugin", AccessMask::PLUGIN, ModulePriority::DEFAULT)
        .unwrap();
    let mut builder = TestBuilder::new(
        r#"
        function OnMain(message) Record("second") end
        HookFunction(Hooks.Main, OnMain)
        "#,
    );
    let second = other.build_module("Plugin", "Second", &mut builder).unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(fx.hook("Main").handler_count(), 2);

    // A manager only removes its own modules.
    assert!(matches!(
        fx.manager.remove_module(&second),
        Err(ScriptHostError::NotFound(_))
    ));
    other.remove_module(&second).unwrap();

    assert!(first.is_live());
    assert_eq!(fx.hook("Main").handler_count(), 1);
    fx.hook("Main")
        .call(scripthost::CallFlags::NONE, &scripthost::CallArgs::new().with("hi"))
        .unwrap();
    assert_eq!(fx.records(), vec!["first"]);
}
