use std::env;
use std::process;

use tracing::{error, info, warn};

use scripthost::logging::SCRIPT_TARGET;
use scripthost::{
    AccessMask, ArgType, CallArgs, CallFlags, Config, Hook, ScriptFileBuilder, ScriptHost,
    Signature, StopMode,
};

/// Scheduler steps run after the `Main` hook fires.
const THINK_STEPS: usize = 3;
const THINK_DELTA: f64 = 10.0;

fn main() {
    let path = env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {path}: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = scripthost::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        scripthost::logging::init_console_only(&config.logging);
    }

    if let Err(e) = run(&config) {
        error!(error = %e, "script host failed");
        process::exit(1);
    }
}

fn run(config: &Config) -> scripthost::Result<()> {
    config.validate()?;

    let mut host = ScriptHost::new();
    host.initialize(&config.engine, &config.scripts.dir)?;

    host.engine()?.register_function("Print", |_, message: String| {
        info!(target: SCRIPT_TARGET, "{}", message);
        Ok(())
    })?;

    let main_hook = host.hook_registry()?.add_hook(Hook::new(
        "Main",
        Signature::new([ArgType::String]),
        AccessMask::ALL,
        StopMode::OnHandled,
    ))?;
    host.register_hooks()?;

    let manager = host.module_manager()?;
    for (name, access, priority) in config.descriptor_list() {
        manager.add_descriptor(&name, access, priority)?;
    }

    if config.modules.is_empty() {
        let mut builder = ScriptFileBuilder::new().with_file("main.lua");
        if let Err(e) = manager.build_module("MapScript", "MapModule", &mut builder) {
            warn!(error = %e, "default module not built");
        }
    }
    for module in &config.modules {
        let mut builder = ScriptFileBuilder::new().with_files(&module.files);
        // A failed build is logged by the manager; the others still run.
        let _ = manager.build_module(&module.descriptor, &module.name, &mut builder);
    }
    info!(modules = manager.module_count(), "modules ready");

    let outcome = main_hook.call(CallFlags::NONE, &CallArgs::new().with("Hello World"))?;
    info!(
        handled = outcome.handled,
        invoked = outcome.invoked,
        failed = outcome.failed,
        "Main hook fired"
    );

    for _ in 0..THINK_STEPS {
        for module in manager.modules() {
            module.scheduler().think(THINK_DELTA);
        }
    }

    manager.remove_all_modules();
    host.shutdown();
    Ok(())
}
