//! Builder contract for modules.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::instance::Module;
use crate::{Result, ScriptHostError};

/// A named piece of script source.
#[derive(Debug, Clone)]
pub struct Section {
    name: String,
    code: String,
}

impl Section {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

/// Collects the source sections of one compilation unit.
///
/// Relative file paths resolve against the configured scripts directory.
pub struct SectionBuilder {
    base_dir: PathBuf,
    sections: Vec<Section>,
}

impl SectionBuilder {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            sections: Vec::new(),
        }
    }

    /// Add a section from literal source text.
    ///
    /// A section whose name was already added is skipped.
    pub fn add_section_from_memory(&mut self, name: &str, code: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ScriptHostError::Validation(
                "section name must not be empty".to_string(),
            ));
        }
        if self.contains(name) {
            debug!(section = name, "section already added, skipping");
            return Ok(());
        }
        self.sections.push(Section::new(name, code));
        Ok(())
    }

    /// Add a section read from a file.
    pub fn add_section_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = self.resolve(path.as_ref());
        let name = path.display().to_string();
        if self.contains(&name) {
            debug!(section = %name, "section already added, skipping");
            return Ok(());
        }

        let code = fs::read_to_string(&path).map_err(|e| {
            ScriptHostError::Build(format!("failed to read section {}: {}", name, e))
        })?;
        self.sections
            .push(Section::new(name, code.trim_start_matches('\u{FEFF}')));
        Ok(())
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    fn contains(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Supplies the source of a module and wires it up after compilation.
pub trait ModuleBuilder {
    /// Add the module's source sections. An error aborts the build.
    fn add_scripts(&mut self, sections: &mut SectionBuilder) -> Result<()>;

    /// Runs after compilation with its outcome.
    ///
    /// Used to bind host-exposed globals into the module. An error, or a
    /// failed compilation, discards the module.
    fn post_build(&mut self, success: bool, module: &Module) -> Result<()> {
        let _ = module;
        if success {
            Ok(())
        } else {
            Err(ScriptHostError::Build("compilation failed".to_string()))
        }
    }
}

/// Builder for modules made of script files.
///
/// Binds the module's scheduler as the `Scheduler` global after a
/// successful compilation.
#[derive(Debug, Clone, Default)]
pub struct ScriptFileBuilder {
    files: Vec<PathBuf>,
    inline: Vec<Section>,
}

impl ScriptFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn with_files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Add literal source compiled before the files.
    pub fn with_source(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        self.inline.push(Section::new(name, code));
        self
    }
}

impl ModuleBuilder for ScriptFileBuilder {
    fn add_scripts(&mut self, sections: &mut SectionBuilder) -> Result<()> {
        for section in &self.inline {
            sections.add_section_from_memory(section.name(), section.code())?;
        }
        for file in &self.files {
            sections.add_section_from_file(file)?;
        }
        Ok(())
    }

    fn post_build(&mut self, success: bool, module: &Module) -> Result<()> {
        if !success {
            return Err(ScriptHostError::Build("compilation failed".to_string()));
        }
        module.set_global("Scheduler", module.scheduler_handle())
    }
}
