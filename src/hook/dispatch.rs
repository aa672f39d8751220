//! Hook dispatch.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use super::types::{HookOutcome, HookReturn, HookState, StopMode};
use crate::module::{AccessMask, ModuleInfo};
use crate::script::{call_args, CallArgs, CallFlags, RefPtr, ScriptFunction, Signature};
use crate::{Result, ScriptHostError};

#[derive(Clone)]
struct Handler {
    function: RefPtr<ScriptFunction>,
    owner: Rc<ModuleInfo>,
}

impl Handler {
    fn is_live(&self) -> bool {
        self.function.get().is_some_and(|f| f.is_live())
    }
}

/// A named broadcast point.
///
/// Handlers are called in registration order. A handler holds a reference to
/// a function object, not to its module; once the module is removed the
/// handler is stale and is skipped, then pruned.
pub struct Hook {
    name: String,
    signature: Signature,
    access: AccessMask,
    stop_mode: StopMode,
    handlers: RefCell<Vec<Handler>>,
}

impl Hook {
    pub fn new(
        name: impl Into<String>,
        signature: Signature,
        access: AccessMask,
        stop_mode: StopMode,
    ) -> Self {
        Self {
            name: name.into(),
            signature,
            access,
            stop_mode,
            handlers: RefCell::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn access_mask(&self) -> AccessMask {
        self.access
    }

    pub fn stop_mode(&self) -> StopMode {
        self.stop_mode
    }

    pub fn state(&self) -> HookState {
        if self.handlers.borrow().is_empty() {
            HookState::Idle
        } else {
            HookState::Active
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Register a handler.
    ///
    /// Rejected if the function is null or stale, its module's access mask
    /// does not intersect the hook's, it was declared with a different
    /// signature, or it is already registered. A rejection leaves the handler
    /// list unchanged.
    pub fn add_function(&self, function: &RefPtr<ScriptFunction>) -> Result<()> {
        let result = self.check_function(function);
        match result {
            Ok(owner) => {
                debug!(hook = %self.name, module = owner.name(), "hook function added");
                self.handlers.borrow_mut().push(Handler {
                    function: function.clone(),
                    owner,
                });
                Ok(())
            }
            Err(e) => {
                warn!(hook = %self.name, error = %e, "hook function rejected");
                Err(e)
            }
        }
    }

    fn check_function(&self, function: &RefPtr<ScriptFunction>) -> Result<Rc<ModuleInfo>> {
        let f = function.get().ok_or_else(|| {
            ScriptHostError::Registration(format!("null function for hook '{}'", self.name))
        })?;
        let owner = f.owner().filter(|owner| owner.is_live()).ok_or_else(|| {
            ScriptHostError::Registration(format!(
                "function for hook '{}' belongs to a removed module",
                self.name
            ))
        })?;

        if !owner.access_mask().allows(self.access) {
            return Err(ScriptHostError::Registration(format!(
                "module '{}' (access {:#x}) may not hook '{}' (access {:#x})",
                owner.name(),
                owner.access_mask().bits(),
                self.name,
                self.access.bits()
            )));
        }
        if let Some(declared) = f.signature() {
            if declared != self.signature {
                return Err(ScriptHostError::Registration(format!(
                    "function declared as {} does not match hook '{}' {}",
                    declared, self.name, self.signature
                )));
            }
        }
        if self.handlers.borrow().iter().any(|h| h.function == *function) {
            return Err(ScriptHostError::Registration(format!(
                "function from module '{}' already hooked to '{}'",
                owner.name(),
                self.name
            )));
        }
        Ok(owner)
    }

    /// Unregister a handler. Returns false if it was not registered.
    pub fn remove_function(&self, function: &ScriptFunction) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|h| h.function.get() != Some(function));
        before != handlers.len()
    }

    /// Unregister every handler owned by `module`. Returns how many were removed.
    pub fn remove_module_functions(&self, module: &ModuleInfo) -> usize {
        let removed: Vec<Handler> = {
            let mut handlers = self.handlers.borrow_mut();
            let (removed, kept): (Vec<_>, Vec<_>) = handlers
                .drain(..)
                .partition(|h| std::ptr::eq(Rc::as_ptr(&h.owner), module));
            *handlers = kept;
            removed
        };
        removed.len()
    }

    pub fn clear(&self) {
        let handlers = std::mem::take(&mut *self.handlers.borrow_mut());
        drop(handlers);
    }

    /// Broadcast to every handler, honouring the stop mode.
    ///
    /// Arguments are checked against the hook's signature first. A handler
    /// that fails is counted and does not stop the broadcast. Handlers may
    /// add or remove handlers, or remove modules, while the dispatch runs.
    pub fn call(&self, flags: CallFlags, args: &CallArgs) -> Result<HookOutcome> {
        self.signature.check_args(args)?;

        let mut outcome = HookOutcome::default();
        let snapshot: Vec<Handler> = self.handlers.borrow().clone();

        for handler in &snapshot {
            if !handler.is_live() || !self.is_registered(&handler.function) {
                outcome.skipped += 1;
                continue;
            }
            let Some(function) = handler.function.get() else {
                continue;
            };

            outcome.invoked += 1;
            match call_args::<HookReturn>(flags, function, args) {
                Ok(HookReturn::Handled) => {
                    outcome.handled = true;
                    if self.stop_mode == StopMode::OnHandled {
                        break;
                    }
                }
                Ok(HookReturn::Continue) => {}
                Err(e) => {
                    outcome.failed += 1;
                    if !flags.contains(CallFlags::NO_LOG) {
                        warn!(
                            hook = %self.name,
                            module = handler.owner.name(),
                            error = %e,
                            "hook handler failed"
                        );
                    }
                }
            }
        }
        drop(snapshot);

        if outcome.skipped > 0 {
            self.prune();
        }
        Ok(outcome)
    }

    fn is_registered(&self, function: &RefPtr<ScriptFunction>) -> bool {
        self.handlers.borrow().iter().any(|h| h.function == *function)
    }

    fn prune(&self) {
        let stale: Vec<Handler> = {
            let mut handlers = self.handlers.borrow_mut();
            let (live, stale): (Vec<_>, Vec<_>) = handlers
                .drain(..)
                .partition(Handler::is_live);
            *handlers = live;
            stale
        };
        if !stale.is_empty() {
            debug!(hook = %self.name, count = stale.len(), "pruned stale hook handlers");
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("access", &self.access)
            .field("stop_mode", &self.stop_mode)
            .field("handlers", &self.handler_count())
            .finish()
    }
}
