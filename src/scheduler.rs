//! Per-module cooperative scheduler.
//!
//! A scheduler has no clock of its own. The host advances it with
//! [`Scheduler::think`], and every continuation whose due time has been
//! reached runs synchronously, in due-time order with ties broken by the
//! order they were scheduled in. The unit of time is whatever the host uses
//! consistently (frames, milliseconds, seconds).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use mlua::{UserData, UserDataMethods, Value, Variadic};
use tracing::{debug, trace, warn};

use crate::module::{Module, ModuleInfo};
use crate::script::{call_args, ArgValue, CallArgs, CallError, CallFlags, RefPtr, ScriptFunction};
use crate::{Result, ScriptHostError};

/// Identifier of a scheduled continuation, unique within its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How many times an interval fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Times(u32),
    Forever,
}

/// Result of one [`Scheduler::think`] step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThinkReport {
    /// Continuations that were called.
    pub invoked: usize,
    /// Of those, the ones that failed.
    pub failed: usize,
}

struct Continuation {
    id: TimerId,
    due: Cell<f64>,
    seq: Cell<u64>,
    interval: Option<f64>,
    /// Runs left for a limited interval; `None` for timeouts and endless intervals.
    remaining: Cell<Option<u32>>,
    function: RefPtr<ScriptFunction>,
    args: CallArgs,
    cancelled: Cell<bool>,
    /// Called during the current `think`.
    started: Cell<bool>,
    /// Ran for the last time; nothing is left to cancel.
    finished: Cell<bool>,
}

impl Continuation {
    /// Whether `remove_timer` can still prevent a future run.
    fn is_cancellable(&self) -> bool {
        !self.cancelled.get()
            && !self.finished.get()
            && (!self.started.get() || self.interval.is_some())
    }

    /// Whether the continuation should be queued again after running.
    fn rearm(&self) -> Option<f64> {
        let interval = self.interval?;
        if self.cancelled.get() {
            return None;
        }
        match self.remaining.get() {
            Some(left) if left <= 1 => None,
            Some(left) => {
                self.remaining.set(Some(left - 1));
                Some(interval)
            }
            None => Some(interval),
        }
    }
}

/// Time-driven continuation queue owned by one module.
pub struct Scheduler {
    owner: Rc<ModuleInfo>,
    current_time: Cell<f64>,
    queue: RefCell<Vec<Rc<Continuation>>>,
    /// Continuations taken off the queue by the running `think`.
    running: RefCell<Vec<Rc<Continuation>>>,
    next_id: Cell<u64>,
    next_seq: Cell<u64>,
    thinking: Cell<bool>,
}

impl Scheduler {
    pub(crate) fn new(owner: Rc<ModuleInfo>) -> Self {
        Self {
            owner,
            current_time: Cell::new(0.0),
            queue: RefCell::new(Vec::new()),
            running: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            next_seq: Cell::new(0),
            thinking: Cell::new(false),
        }
    }

    /// Name of the owning module.
    pub fn module_name(&self) -> &str {
        self.owner.name()
    }

    /// Time accumulated by `think` so far.
    pub fn current_time(&self) -> f64 {
        self.current_time.get()
    }

    /// Number of continuations waiting in the queue.
    pub fn pending_count(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run `function` once, `delay` time units from now.
    pub fn set_timeout(
        &self,
        delay: f64,
        function: RefPtr<ScriptFunction>,
        args: CallArgs,
    ) -> Result<TimerId> {
        self.enqueue(delay, None, None, function, args)
    }

    /// Run `function` every `interval` time units, starting `interval` from now.
    pub fn set_interval(
        &self,
        interval: f64,
        repeat: Repeat,
        function: RefPtr<ScriptFunction>,
        args: CallArgs,
    ) -> Result<TimerId> {
        let remaining = match repeat {
            Repeat::Times(0) => {
                return Err(ScriptHostError::Validation(
                    "interval must repeat at least once".to_string(),
                ))
            }
            Repeat::Times(n) => Some(n),
            Repeat::Forever => None,
        };
        self.enqueue(interval, Some(interval), remaining, function, args)
    }

    /// Cancel a pending continuation. Returns false if it is unknown or already ran.
    pub fn remove_timer(&self, id: TimerId) -> bool {
        let removed = {
            let mut queue = self.queue.borrow_mut();
            match queue.iter().position(|c| c.id == id) {
                Some(index) => {
                    queue.remove(index).cancelled.set(true);
                    true
                }
                None => false,
            }
        };
        // Due this tick but not run yet, or an interval running right now.
        let running = match self
            .running
            .borrow()
            .iter()
            .find(|c| c.id == id && c.is_cancellable())
        {
            Some(continuation) => {
                continuation.cancelled.set(true);
                true
            }
            None => false,
        };
        removed || running
    }

    /// Drop every pending continuation.
    pub fn clear(&self) {
        let dropped: Vec<Rc<Continuation>> = self.queue.borrow_mut().drain(..).collect();
        for continuation in dropped.iter().chain(self.running.borrow().iter()) {
            continuation.cancelled.set(true);
        }
        if !dropped.is_empty() {
            debug!(
                module = self.owner.name(),
                count = dropped.len(),
                "scheduler cleared"
            );
        }
    }

    /// Advance time by `delta` and run every continuation that became due.
    pub fn think(&self, delta: f64) -> ThinkReport {
        let mut report = ThinkReport::default();
        if !delta.is_finite() || delta < 0.0 {
            warn!(module = self.owner.name(), delta, "ignoring invalid think delta");
            return report;
        }
        if !self.owner.is_live() {
            return report;
        }
        if self.thinking.replace(true) {
            warn!(module = self.owner.name(), "scheduler think called re-entrantly");
            return report;
        }

        let now = self.current_time.get() + delta;
        self.current_time.set(now);

        let mut due: Vec<Rc<Continuation>> = Vec::new();
        self.queue.borrow_mut().retain(|c| {
            if c.due.get() <= now {
                due.push(Rc::clone(c));
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| {
            a.due
                .get()
                .total_cmp(&b.due.get())
                .then(a.seq.get().cmp(&b.seq.get()))
        });
        *self.running.borrow_mut() = due.clone();

        for continuation in due {
            if !self.owner.is_live() {
                break;
            }
            if continuation.cancelled.get() {
                continue;
            }

            report.invoked += 1;
            continuation.started.set(true);
            let result = match continuation.function.get() {
                Some(function) => {
                    call_args::<()>(CallFlags::NONE, function, &continuation.args)
                }
                None => Err(CallError::InvalidFunction),
            };
            if let Err(e) = result {
                report.failed += 1;
                warn!(
                    module = self.owner.name(),
                    timer = continuation.id.0,
                    error = %e,
                    "scheduled continuation failed"
                );
            }

            match continuation.rearm() {
                Some(interval) if self.owner.is_live() => {
                    continuation.due.set(continuation.due.get() + interval);
                    continuation.seq.set(self.next_seq());
                    continuation.started.set(false);
                    self.queue.borrow_mut().push(continuation);
                }
                _ => continuation.finished.set(true),
            }
        }

        self.running.borrow_mut().clear();
        self.thinking.set(false);
        trace!(
            module = self.owner.name(),
            time = now,
            invoked = report.invoked,
            "scheduler think"
        );
        report
    }

    fn enqueue(
        &self,
        delay: f64,
        interval: Option<f64>,
        remaining: Option<u32>,
        function: RefPtr<ScriptFunction>,
        args: CallArgs,
    ) -> Result<TimerId> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(ScriptHostError::Validation(format!(
                "delay must be a finite, non-negative number, got {}",
                delay
            )));
        }
        if !self.owner.is_live() {
            return Err(ScriptHostError::Validation(format!(
                "module '{}' has been removed",
                self.owner.name()
            )));
        }
        if !function.get().is_some_and(|f| f.is_live()) {
            return Err(CallError::InvalidFunction.into());
        }

        self.next_id.set(self.next_id.get() + 1);
        let id = TimerId(self.next_id.get());
        let continuation = Continuation {
            id,
            due: Cell::new(self.current_time.get() + delay),
            seq: Cell::new(self.next_seq()),
            interval,
            remaining: Cell::new(remaining),
            function,
            args,
            cancelled: Cell::new(false),
            started: Cell::new(false),
            finished: Cell::new(false),
        };
        self.queue.borrow_mut().push(Rc::new(continuation));
        trace!(module = self.owner.name(), timer = id.0, delay, "continuation scheduled");
        Ok(id)
    }

    fn next_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("module", &self.owner.name())
            .field("current_time", &self.current_time.get())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Script-side view of a module's scheduler, bound as the `Scheduler` global.
#[derive(Clone)]
pub struct SchedulerHandle {
    module: Weak<Module>,
}

impl SchedulerHandle {
    pub(crate) fn new(module: Weak<Module>) -> Self {
        Self { module }
    }

    fn module(&self) -> mlua::Result<Rc<Module>> {
        self.module
            .upgrade()
            .filter(|m| m.is_live())
            .ok_or_else(|| mlua::Error::RuntimeError("module has been removed".to_string()))
    }
}

/// A function value, or the name of a function in the owning module.
fn resolve_target(module: &Module, target: Value) -> mlua::Result<RefPtr<ScriptFunction>> {
    match target {
        Value::Function(function) => module
            .function_from_value(function)
            .map_err(mlua::Error::external),
        Value::String(name) => {
            let name = name.to_string_lossy().to_string();
            module.function(&name).ok_or_else(|| {
                mlua::Error::RuntimeError(format!("function '{}' not found in module", name))
            })
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "expected function or function name, got {}",
            other.type_name()
        ))),
    }
}

fn collect_args(values: &[Value]) -> CallArgs {
    values.iter().cloned().map(ArgValue::from_lua_value).collect()
}

impl UserData for SchedulerHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method(
            "SetTimeout",
            |_, this, (target, delay, args): (Value, f64, Variadic<Value>)| {
                let module = this.module()?;
                let function = resolve_target(&module, target)?;
                let id = module
                    .scheduler()
                    .set_timeout(delay, function, collect_args(&args))
                    .map_err(mlua::Error::external)?;
                Ok(id.0)
            },
        );

        methods.add_method(
            "SetInterval",
            |_, this, (target, interval, repeats, args): (Value, f64, i64, Variadic<Value>)| {
                let module = this.module()?;
                let function = resolve_target(&module, target)?;
                let repeat = if repeats < 0 {
                    Repeat::Forever
                } else {
                    Repeat::Times(u32::try_from(repeats).unwrap_or(u32::MAX))
                };
                let id = module
                    .scheduler()
                    .set_interval(interval, repeat, function, collect_args(&args))
                    .map_err(mlua::Error::external)?;
                Ok(id.0)
            },
        );

        methods.add_method("RemoveTimer", |_, this, id: u64| {
            Ok(this.module()?.scheduler().remove_timer(TimerId(id)))
        });

        methods.add_method("ClearTimerList", |_, this, ()| {
            this.module()?.scheduler().clear();
            Ok(())
        });

        methods.add_method("GetCurrentTime", |_, this, ()| {
            Ok(this.module()?.scheduler().current_time())
        });
    }
}
