//! Configuration module for scripthost.

use serde::Deserialize;
use std::path::Path;

use crate::logging::parse_level;
use crate::module::{AccessMask, ModulePriority};
use crate::{Result, ScriptHostError};

/// Script engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Instruction budget per top-level call (0 = unlimited).
    #[serde(default = "default_max_instructions")]
    pub max_instructions: u64,
    /// Memory limit in megabytes (0 = unlimited).
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,
}

fn default_max_instructions() -> u64 {
    1_000_000
}

fn default_max_memory_mb() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_instructions: default_max_instructions(),
            max_memory_mb: default_max_memory_mb(),
        }
    }
}

/// Script source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptsConfig {
    /// Base directory that relative section paths resolve against.
    #[serde(default = "default_scripts_dir")]
    pub dir: String,
}

fn default_scripts_dir() -> String {
    "scripts".to_string()
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            dir: default_scripts_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Level for text printed by scripts.
    #[serde(default = "default_log_level")]
    pub script_level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/scripthost.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            script_level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// A module descriptor declared in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorConfig {
    pub name: String,
    /// Access mask bits.
    pub access: u32,
    /// Priority level name.
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_priority() -> String {
    "normal".to_string()
}

impl DescriptorConfig {
    pub fn access_mask(&self) -> AccessMask {
        AccessMask::from_bits_retain(self.access)
    }

    pub fn priority(&self) -> Option<ModulePriority> {
        ModulePriority::from_name(&self.priority)
    }
}

/// A module built at startup from script files.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    /// Name of the descriptor to build under.
    pub descriptor: String,
    /// Script files, relative to the scripts directory.
    #[serde(default)]
    pub files: Vec<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Script source configuration.
    #[serde(default)]
    pub scripts: ScriptsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Module descriptors.
    #[serde(default)]
    pub descriptors: Vec<DescriptorConfig>,
    /// Modules to build at startup.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ScriptHostError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ScriptHostError::Config(format!("config parse error: {e}")))
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - a descriptor has an unknown priority name or an empty access mask
    /// - a module references a descriptor that is not declared
    /// - a logging level is not a known level name
    ///
    /// Modules may also use the built-in `MapScript` and `Plugin` descriptors
    /// when no descriptors are declared.
    pub fn validate(&self) -> Result<()> {
        for level in [&self.logging.level, &self.logging.script_level] {
            if parse_level(level).is_none() {
                return Err(ScriptHostError::Config(format!(
                    "unknown log level '{}'",
                    level
                )));
            }
        }

        for descriptor in &self.descriptors {
            if descriptor.priority().is_none() {
                return Err(ScriptHostError::Config(format!(
                    "descriptor '{}' has unknown priority '{}'",
                    descriptor.name, descriptor.priority
                )));
            }
            if descriptor.access == 0 {
                return Err(ScriptHostError::Config(format!(
                    "descriptor '{}' has an empty access mask",
                    descriptor.name
                )));
            }
        }

        let declared: Vec<&str> = if self.descriptors.is_empty() {
            DEFAULT_DESCRIPTORS.iter().map(|(name, _, _)| *name).collect()
        } else {
            self.descriptors.iter().map(|d| d.name.as_str()).collect()
        };
        for module in &self.modules {
            if !declared.contains(&module.descriptor.as_str()) {
                return Err(ScriptHostError::Config(format!(
                    "module '{}' uses undeclared descriptor '{}'",
                    module.name, module.descriptor
                )));
            }
        }
        Ok(())
    }

    /// Descriptors to register: the declared ones, or the defaults.
    pub fn descriptor_list(&self) -> Vec<(String, AccessMask, ModulePriority)> {
        if self.descriptors.is_empty() {
            return DEFAULT_DESCRIPTORS
                .iter()
                .map(|(name, access, priority)| (name.to_string(), *access, *priority))
                .collect();
        }
        self.descriptors
            .iter()
            .map(|d| {
                (
                    d.name.clone(),
                    d.access_mask(),
                    d.priority().unwrap_or_default(),
                )
            })
            .collect()
    }
}

/// Descriptors used when the config declares none.
const DEFAULT_DESCRIPTORS: [(&str, AccessMask, ModulePriority); 2] = [
    ("MapScript", AccessMask::MAP_SCRIPT, ModulePriority::HIGHEST),
    ("Plugin", AccessMask::PLUGIN, ModulePriority::DEFAULT),
];
