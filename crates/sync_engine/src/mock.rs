//! In-memory platform for tests.
//!
//! The scheduler keeps queued operations in a slab, detects window overlap,
//! and records end notifications instead of delivering them; tests feed
//! them back through [`crate::LinkLayer::dispatch`].

use std::collections::{HashMap, HashSet, VecDeque};

use contracts::{
    tick_diff, Baseband, ConflictHook, ConflictWinner, HostEvent, HostNotifier, OpId, OpOwner,
    Platform, ProtocolMode, RadioOp, RadioScheduler, ScheduleError, ScheduleOutcome, SyncHandle,
    Tick, TimerId, TimerService,
};
use slab::Slab;

#[derive(Debug, Default)]
pub struct MockScheduler {
    now: Tick,
    ops: Slab<RadioOp>,
    ended: VecDeque<OpOwner>,
    removed: Vec<OpOwner>,
    no_time: bool,
}

impl MockScheduler {
    pub fn set_now(&mut self, now: Tick) {
        self.now = now;
    }

    pub fn advance(&mut self, usec: u32) {
        self.now = self.now.wrapping_add(usec);
    }

    /// Make every subsequent insertion fail with [`ScheduleError::NoTime`].
    pub fn set_no_time(&mut self, no_time: bool) {
        self.no_time = no_time;
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> impl Iterator<Item = (OpId, &RadioOp)> {
        self.ops.iter().map(|(key, op)| (OpId(key), op))
    }

    pub fn op_for(&self, owner: OpOwner) -> Option<(OpId, &RadioOp)> {
        self.ops().find(|(_, op)| op.owner == owner)
    }

    pub fn periodic_op(&self, handle: SyncHandle) -> Option<&RadioOp> {
        self.op_for(OpOwner::PeriodicScan(handle)).map(|(_, op)| op)
    }

    /// Run an operation to completion; no end notification is recorded.
    pub fn complete(&mut self, owner: OpOwner) -> Option<RadioOp> {
        let (id, _) = self.op_for(owner)?;
        self.ops.try_remove(id.0)
    }

    /// Drain recorded end notifications of removed operations.
    pub fn take_ended(&mut self) -> Vec<OpOwner> {
        self.ended.drain(..).collect()
    }

    /// Owners of every operation removed so far.
    pub fn removed(&self) -> &[OpOwner] {
        &self.removed
    }

    fn overlapping(&self, op: &RadioOp) -> Vec<usize> {
        self.ops
            .iter()
            .filter(|(_, queued)| queued.overlaps(op))
            .map(|(key, _)| key)
            .collect()
    }
}

impl RadioScheduler for MockScheduler {
    fn now(&self) -> Tick {
        self.now
    }

    fn schedule_at(
        &mut self,
        op: RadioOp,
        hook: &dyn ConflictHook,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        if self.no_time {
            return Err(ScheduleError::NoTime);
        }
        if tick_diff(op.due, self.now) < 0 {
            return Err(ScheduleError::TooLate {
                due: op.due,
                now: self.now,
            });
        }

        let contenders = self.overlapping(&op);
        for &key in &contenders {
            let incumbent = &self.ops[key];
            if hook.resolve(incumbent, &op) == ConflictWinner::Incumbent {
                return Err(ScheduleError::Conflict {
                    with: incumbent.owner,
                });
            }
        }

        if contenders.is_empty() {
            return Ok(ScheduleOutcome::Inserted(OpId(self.ops.insert(op))));
        }
        let displaced = contenders
            .into_iter()
            .map(|key| self.ops.remove(key).owner)
            .collect();
        let id = OpId(self.ops.insert(op));
        Ok(ScheduleOutcome::Preempted { id, displaced })
    }

    fn schedule_next_available(&mut self, mut op: RadioOp) -> Result<OpId, ScheduleError> {
        if self.no_time {
            return Err(ScheduleError::NoTime);
        }
        if tick_diff(op.due, self.now) < 0 {
            op.due = self.now;
        }
        while let Some(&key) = self.overlapping(&op).first() {
            op.due = self.ops[key].end();
        }
        Ok(OpId(self.ops.insert(op)))
    }

    fn remove(&mut self, id: OpId) -> bool {
        match self.ops.try_remove(id.0) {
            Some(op) => {
                self.ended.push_back(op.owner);
                self.removed.push(op.owner);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingHost {
    pub events: Vec<HostEvent>,
}

impl RecordingHost {
    pub fn take(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn count(&self, pred: impl Fn(&HostEvent) -> bool) -> usize {
        self.events.iter().filter(|event| pred(event)).count()
    }
}

impl HostNotifier for RecordingHost {
    fn deliver(&mut self, event: HostEvent) {
        self.events.push(event);
    }
}

#[derive(Debug, Default)]
pub struct MockTimers {
    armed: HashMap<TimerId, u32>,
}

impl MockTimers {
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.armed.contains_key(&id)
    }

    pub fn timeout_of(&self, id: TimerId) -> Option<u32> {
        self.armed.get(&id).copied()
    }

    /// Simulate expiry: the timer is no longer armed.
    pub fn fire(&mut self, id: TimerId) -> bool {
        self.armed.remove(&id).is_some()
    }
}

impl TimerService for MockTimers {
    fn arm(&mut self, id: TimerId, timeout_usec: u32) {
        self.armed.insert(id, timeout_usec);
    }

    fn disarm(&mut self, id: TimerId) {
        self.armed.remove(&id);
    }
}

#[derive(Debug, Default)]
pub struct MockBaseband {
    active: HashSet<ProtocolMode>,
    pub starts: usize,
    pub stops: usize,
}

impl MockBaseband {
    pub fn is_active(&self, mode: ProtocolMode) -> bool {
        self.active.contains(&mode)
    }
}

impl Baseband for MockBaseband {
    fn start(&mut self, mode: ProtocolMode) {
        self.active.insert(mode);
        self.starts += 1;
    }

    fn stop(&mut self, mode: ProtocolMode) {
        self.active.remove(&mode);
        self.stops += 1;
    }
}

#[derive(Debug, Default)]
pub struct MockPlatform {
    pub scheduler: MockScheduler,
    pub host: RecordingHost,
    pub timers: MockTimers,
    pub baseband: MockBaseband,
}

impl Platform for MockPlatform {
    type Scheduler = MockScheduler;
    type Host = RecordingHost;
    type Timers = MockTimers;
    type Baseband = MockBaseband;

    fn scheduler(&mut self) -> &mut MockScheduler {
        &mut self.scheduler
    }

    fn host(&mut self) -> &mut RecordingHost {
        &mut self.host
    }

    fn timers(&mut self) -> &mut MockTimers {
        &mut self.timers
    }

    fn baseband(&mut self) -> &mut MockBaseband {
        &mut self.baseband
    }
}

/// Deliver every recorded end notification until none remain.
pub fn settle(ll: &mut crate::LinkLayer<MockPlatform>) {
    loop {
        let ended = ll.platform_mut().scheduler.take_ended();
        if ended.is_empty() {
            return;
        }
        for owner in ended {
            ll.dispatch(crate::LlMessage::Radio(crate::RadioEvent::OpEnd { owner }));
        }
    }
}
