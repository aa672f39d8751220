//! Module descriptor types.

use std::cell::Cell;
use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Capability tag gating which modules may subscribe to which hooks.
    ///
    /// A module may hook a function only if its mask intersects the hook's.
    /// The named bits are the default policy; any other bits are kept as-is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const NONE = 0;
        /// Shared API, present in every module kind.
        const SHARED = 1 << 0;
        /// Per-map scripts.
        const MAP_SCRIPT = Self::SHARED.bits() | 1 << 1;
        /// Persistent plugin scripts.
        const PLUGIN = Self::SHARED.bits() | 1 << 2;
        const ALL = Self::SHARED.bits() | Self::MAP_SCRIPT.bits() | Self::PLUGIN.bits();
    }
}

impl AccessMask {
    /// Whether two masks share at least one bit.
    pub fn allows(self, other: AccessMask) -> bool {
        self.intersects(other)
    }
}

/// Build priority of a module descriptor. Higher values come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePriority(pub i32);

impl ModulePriority {
    pub const HIGHEST: Self = Self(i32::MAX);
    pub const HIGH: Self = Self(100);
    pub const NORMAL: Self = Self(0);
    pub const LOW: Self = Self(-100);
    pub const LOWEST: Self = Self(i32::MIN);
    pub const DEFAULT: Self = Self::NORMAL;

    /// Parse a named priority level (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "highest" => Some(Self::HIGHEST),
            "high" => Some(Self::HIGH),
            "normal" | "default" => Some(Self::NORMAL),
            "low" => Some(Self::LOW),
            "lowest" => Some(Self::LOWEST),
            _ => None,
        }
    }
}

impl Default for ModulePriority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A named class of module. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    name: String,
    access: AccessMask,
    priority: ModulePriority,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, access: AccessMask, priority: ModulePriority) -> Self {
        Self {
            name: name.into(),
            access,
            priority,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access_mask(&self) -> AccessMask {
        self.access
    }

    pub fn priority(&self) -> ModulePriority {
        self.priority
    }
}

/// Unique id of a built module, never reused within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a module as seen by its function objects.
///
/// Function objects and schedulers keep this alive after the module itself
/// is removed, so they can tell that their module is gone.
#[derive(Debug)]
pub struct ModuleInfo {
    id: ModuleId,
    name: String,
    access: AccessMask,
    priority: ModulePriority,
    live: Cell<bool>,
}

impl ModuleInfo {
    pub(crate) fn new(
        id: ModuleId,
        name: impl Into<String>,
        access: AccessMask,
        priority: ModulePriority,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            access,
            priority,
            live: Cell::new(true),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access_mask(&self) -> AccessMask {
        self.access
    }

    pub fn priority(&self) -> ModulePriority {
        self.priority
    }

    /// False once the module was removed or its build was discarded.
    pub fn is_live(&self) -> bool {
        self.live.get()
    }

    pub(crate) fn mark_removed(&self) {
        self.live.set(false);
    }
}
