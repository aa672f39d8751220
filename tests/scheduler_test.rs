//! Scheduler tests driven from scripts through the `Scheduler` global.

mod common;

use std::rc::Rc;

use common::Fixture;
use scripthost::{call, CallArgs, CallFlags, Repeat};

const SOURCE: &str = r#"
count = 0
function Bump(step) count = count + (step or 1) end
function StartTimeout(delay) return Scheduler:SetTimeout(Bump, delay) end
function StartByName(delay) return Scheduler:SetTimeout("Bump", delay, 10) end
function StartInterval(interval, repeats) return Scheduler:SetInterval(Bump, interval, repeats) end
function Stop(id) return Scheduler:RemoveTimer(id) end
function StopAll() Scheduler:ClearTimerList() end
function Now() return Scheduler:GetCurrentTime() end
function Again() count = count + 1 Scheduler:SetTimeout(Again, 0) end
"#;

fn run<R: mlua::FromLuaMulti>(
    module: &scripthost::Module,
    name: &str,
    args: impl mlua::IntoLuaMulti,
) -> R {
    let function = module.function(name).unwrap();
    call(CallFlags::NONE, function.get().unwrap(), args).unwrap()
}

#[test]
fn test_schedule_fires_exactly_once_when_due() {
    let fx = Fixture::new(vec![]);
    let module = fx.build("Plugin", "Timers", SOURCE);
    let _: u64 = run(&module, "StartTimeout", 5);

    let scheduler = module.scheduler();
    scheduler.think(3.0);
    assert_eq!(module.get_global::<i64>("count").unwrap(), 0);

    let report = scheduler.think(2.0);
    assert_eq!(report.invoked, 1);
    assert_eq!(module.get_global::<i64>("count").unwrap(), 1);

    scheduler.think(2.0);
    assert_eq!(module.get_global::<i64>("count").unwrap(), 1);
    assert_eq!(run::<f64>(&module, "Now", ()), 7.0);
}

#[test]
fn test_target_by_name_with_arguments() {
    let fx = Fixture::new(vec![]);
    let module = fx.build("Plugin", "Timers", SOURCE);
    let _: u64 = run(&module, "StartByName", 1);

    module.scheduler().think(1.0);
    assert_eq!(module.get_global::<i64>("count").unwrap(), 10);
}

#[test]
fn test_unknown_target_name_raises_script_error() {
    let fx = Fixture::new(vec![]);
    let module = fx.build(
        "Plugin",
        "Timers",
        "function Start() Scheduler:SetTimeout('Nope', 1) end",
    );
    let start = module.function("Start").unwrap();
    assert!(call::<()>(CallFlags::NONE, start.get().unwrap(), ()).is_err());
    assert_eq!(module.scheduler().pending_count(), 0);
}

#[test]
fn test_self_rescheduling_does_not_refire_in_same_tick() {
    let fx = Fixture::new(vec![]);
    let module = fx.build("Plugin", "Timers", SOURCE);
    let again = module.function("Again").unwrap();
    module
        .scheduler()
        .set_timeout(0.0, again, CallArgs::new())
        .unwrap();

    module.scheduler().think(1.0);
    assert_eq!(module.get_global::<i64>("count").unwrap(), 1);
    module.scheduler().think(1.0);
    assert_eq!(module.get_global::<i64>("count").unwrap(), 2);
}

#[test]
fn test_interval_from_script() {
    let fx = Fixture::new(vec![]);
    let module = fx.build("Plugin", "Timers", SOURCE);
    let id: u64 = run(&module, "StartInterval", (2, -1));

    for _ in 0..3 {
        module.scheduler().think(2.0);
    }
    assert_eq!(module.get_global::<i64>("count").unwrap(), 3);

    assert!(run::<bool>(&module, "Stop", id));
    module.scheduler().think(2.0);
    assert_eq!(module.get_global::<i64>("count").unwrap(), 3);
}

#[test]
fn test_limited_interval_from_host() {
    let fx = Fixture::new(vec![]);
    let module = fx.build("Plugin", "Timers", SOURCE);
    let bump = module.function("Bump").unwrap();
    module
        .scheduler()
        .set_interval(1.0, Repeat::Times(3), bump, CallArgs::new().with(2))
        .unwrap();

    for _ in 0..10 {
        module.scheduler().think(1.0);
    }
    assert_eq!(module.get_global::<i64>("count").unwrap(), 6);
}

#[test]
fn test_clear_timer_list_from_script() {
    let fx = Fixture::new(vec![]);
    let module = fx.build("Plugin", "Timers", SOURCE);
    let _: u64 = run(&module, "StartTimeout", 1);
    let _: u64 = run(&module, "StartInterval", (1, -1));
    assert_eq!(module.scheduler().pending_count(), 2);

    run::<()>(&module, "StopAll", ());
    assert_eq!(module.scheduler().pending_count(), 0);
    module.scheduler().think(5.0);
    assert_eq!(module.get_global::<i64>("count").unwrap(), 0);
}

#[test]
fn test_negative_delay_raises_script_error() {
    let fx = Fixture::new(vec![]);
    let module = fx.build("Plugin", "Timers", SOURCE);
    let start = module.function("StartTimeout").unwrap();
    assert!(call::<u64>(CallFlags::NONE, start.get().unwrap(), -1).is_err());
}

#[test]
fn test_removing_module_discards_pending_continuations() {
    let fx = Fixture::new(vec![]);
    let module = fx.build("Plugin", "Timers", SOURCE);
    let _: u64 = run(&module, "StartTimeout", 1);
    let bump = module.function("Bump").unwrap();
    let objects_with_timer = fx.engine.live_object_count();

    fx.manager.remove_module(&module).unwrap();

    assert_eq!(module.scheduler().pending_count(), 0);
    assert_eq!(module.scheduler().think(5.0).invoked, 0);
    assert!(fx.engine.live_object_count() <= objects_with_timer);
    assert!(!bump.get().unwrap().is_live());
}

#[test]
fn test_schedulers_are_per_module() {
    let fx = Fixture::new(vec![]);
    let a = fx.build("Plugin", "A", SOURCE);
    let b = fx.build("Plugin", "B", SOURCE);
    let _: u64 = run(&a, "StartTimeout", 1);

    b.scheduler().think(5.0);
    assert_eq!(a.get_global::<i64>("count").unwrap(), 0);
    assert_eq!(b.scheduler().current_time(), 5.0);
    assert_eq!(a.scheduler().current_time(), 0.0);

    a.scheduler().think(1.0);
    assert_eq!(a.get_global::<i64>("count").unwrap(), 1);
    assert_eq!(b.get_global::<i64>("count").unwrap(), 0);
}

#[test]
fn test_remove_timer_reports_only_runs_it_prevented() {
    let fx = Fixture::new(vec![]);
    let module = fx.build(
        "Plugin",
        "Timers",
        r#"
        function First() Record("first") end
        function Second()
            Record("second")
            ranAlready = Scheduler:RemoveTimer(firstId)
            notRunYet = Scheduler:RemoveTimer(thirdId)
            selfRemoved = Scheduler:RemoveTimer(secondId)
        end
        function Third() Record("third") end
        "#,
    );
    let scheduler = module.scheduler();
    let timers = [
        ("First", "firstId"),
        ("Second", "secondId"),
        ("Third", "thirdId"),
    ];
    for (name, global) in timers {
        let function = module.function(name).unwrap();
        let id = scheduler.set_timeout(1.0, function, CallArgs::new()).unwrap();
        module.set_global(global, id.value()).unwrap();
    }

    let report = scheduler.think(1.0);

    assert_eq!(report.invoked, 2);
    assert_eq!(fx.records(), vec!["first", "second"]);
    assert!(!module.get_global::<bool>("ranAlready").unwrap());
    assert!(module.get_global::<bool>("notRunYet").unwrap());
    assert!(!module.get_global::<bool>("selfRemoved").unwrap());
}

#[test]
fn test_running_interval_can_cancel_itself() {
    let fx = Fixture::new(vec![]);
    let module = fx.build(
        "Plugin",
        "Timers",
        r#"
        count = 0
        function Tick()
            count = count + 1
            if count == 2 then stopped = Scheduler:RemoveTimer(tickId) end
        end
        "#,
    );
    let tick = module.function("Tick").unwrap();
    let id = module
        .scheduler()
        .set_interval(1.0, Repeat::Forever, tick, CallArgs::new())
        .unwrap();
    module.set_global("tickId", id.value()).unwrap();

    for _ in 0..4 {
        module.scheduler().think(1.0);
    }
    assert_eq!(module.get_global::<i64>("count").unwrap(), 2);
    assert!(module.get_global::<bool>("stopped").unwrap());
    assert_eq!(module.scheduler().pending_count(), 0);
}

#[test]
fn test_continuation_may_remove_its_own_module() {
    let fx = Fixture::new(vec![]);
    let manager = Rc::downgrade(&fx.manager);
    fx.engine
        .register_function("RemoveModule", move |_, name: String| {
            let removed = manager
                .upgrade()
                .and_then(|m| m.find_module_by_name(&name).map(|module| (m, module)))
                .map(|(m, module)| m.remove_module(&module).is_ok())
                .unwrap_or(false);
            Ok(removed)
        })
        .unwrap();

    let module = fx.build(
        "Plugin",
        "Doomed",
        r#"
        function Leave() Record("leave") RemoveModule("Doomed") end
        function Later() Record("later") end
        "#,
    );
    let leave = module.function("Leave").unwrap();
    let later = module.function("Later").unwrap();
    module
        .scheduler()
        .set_timeout(1.0, leave, CallArgs::new())
        .unwrap();
    module
        .scheduler()
        .set_timeout(1.0, later.clone(), CallArgs::new())
        .unwrap();
    module
        .scheduler()
        .set_interval(1.0, Repeat::Forever, later, CallArgs::new())
        .unwrap();

    let report = module.scheduler().think(1.0);

    assert_eq!(report.invoked, 1);
    assert_eq!(fx.records(), vec!["leave"]);
    assert!(!module.is_live());
    assert!(fx.manager.find_module_by_name("Doomed").is_none());
    assert_eq!(module.scheduler().pending_count(), 0);
    assert_eq!(module.scheduler().think(5.0).invoked, 0);
}
