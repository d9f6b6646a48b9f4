//! Collaborator bundle handed to the engine.

use crate::{Baseband, HostNotifier, RadioScheduler, TimerService};

/// Everything outside the sync engine that it drives.
pub trait Platform {
    type Scheduler: RadioScheduler;
    type Host: HostNotifier;
    type Timers: TimerService;
    type Baseband: Baseband;

    fn scheduler(&mut self) -> &mut Self::Scheduler;
    fn host(&mut self) -> &mut Self::Host;
    fn timers(&mut self) -> &mut Self::Timers;
    fn baseband(&mut self) -> &mut Self::Baseband;
}
