//! Module descriptors, built modules and the module manager.

pub mod builder;
pub mod instance;
pub mod manager;
pub mod types;

pub use builder::{ModuleBuilder, ScriptFileBuilder, Section, SectionBuilder};
pub use instance::Module;
pub use manager::ModuleManager;
pub use types::{AccessMask, ModuleDescriptor, ModuleId, ModuleInfo, ModulePriority};
