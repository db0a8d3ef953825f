//! Time-based helpers.

use std::time::Duration;

use crate::continuation::Script;
use crate::continuation::Suspend;
use crate::runtime::Scheduler;
use crate::types::TaskId;

/// Parks the current task for `duration`.
///
/// A zero duration yields for one tick instead.
#[must_use]
pub const fn sleep(duration: Duration) -> Suspend {
    Suspend::Sleep(duration)
}

/// Yields execution back to the scheduler for one tick.
#[must_use]
pub const fn yield_now() -> Suspend {
    Suspend::Yield
}

/// Runs `action` once, `delay` from now, as its own task.
pub fn invoke_after<F>(scheduler: &Scheduler, delay: Duration, action: F) -> TaskId
where
    F: FnOnce(&Scheduler) + 'static,
{
    scheduler.spawn_after(
        delay,
        Script::new().then(move |cx| {
            action(cx.scheduler());
            Ok(None)
        }),
    )
}
