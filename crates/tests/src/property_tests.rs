//! Randomized host and radio sequences against resource invariants.

use std::collections::HashSet;

use contracts::{
    tick_diff, HciStatus, HostEvent, OpOwner, ProtocolMode, RadioScheduler, SyncHandle, TimerId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sync_engine::mock::settle;
use sync_engine::{EstablishState, FilterPolicy, LlMessage, PerScanState, RadioEvent, RxPacket};

use crate::support::*;

const LISTED: u64 = 3;
const INTERVALS: [u16; 4] = [24, 80, 160, 400];

/// Earliest queued periodic operation.
fn next_periodic(ll: &TestLl) -> Option<(SyncHandle, u32)> {
    ll.platform()
        .scheduler
        .ops()
        .filter_map(|(_, op)| match op.owner {
            OpOwner::PeriodicScan(handle) => Some((handle, op.due)),
            OpOwner::ExtScan(_) => None,
        })
        .min_by_key(|&(_, due)| due)
}

/// Run the earliest periodic operation, with or without a reception.
fn run_next(ll: &mut TestLl, rng: &mut StdRng) {
    let Some((handle, due)) = next_periodic(ll) else {
        return;
    };
    let anchor = ll.context(handle).map_or(due, |ctx| ctx.next.tick);
    let owner = OpOwner::PeriodicScan(handle);
    let Some(op) = ll.platform_mut().scheduler.complete(owner) else {
        return;
    };

    let now = ll.platform().scheduler.now();
    if rng.random_bool(0.7) {
        let end = anchor.wrapping_add(3_000);
        if tick_diff(end, now) > 0 {
            ll.platform_mut().scheduler.set_now(end);
        }
        ll.dispatch(LlMessage::Radio(RadioEvent::PeriodicRx {
            handle,
            rx: RxPacket {
                pdu: periodic_pdu(b"payload"),
                rssi: -60,
                start: anchor,
            },
        }));
    } else {
        let end = op.end();
        if tick_diff(end, now) > 0 {
            ll.platform_mut().scheduler.set_now(end);
        }
        ll.dispatch(LlMessage::Radio(RadioEvent::PeriodicMissed { handle }));
    }
}

fn random_handle(ll: &TestLl, rng: &mut StdRng) -> Option<SyncHandle> {
    let handles = ll.pool().handles();
    if handles.is_empty() {
        None
    } else {
        Some(handles[rng.random_range(0..handles.len())])
    }
}

fn check_invariants(ll: &TestLl) {
    let pool = ll.pool();
    assert!(pool.enabled_count() <= pool.capacity());

    if ll.create_sync_state() == EstablishState::Disabled {
        assert_eq!(ll.create_sync_context(), None);
    }
    if let Some(handle) = ll.create_sync_context() {
        let ctx = ll.context(handle).expect("create-sync context enabled");
        assert_eq!(ctx.state, PerScanState::Disabled);
    }

    // every queued periodic operation belongs to a live context
    for (_, op) in ll.platform().scheduler.ops() {
        if let OpOwner::PeriodicScan(handle) = op.owner {
            assert!(ll.context(handle).is_some(), "orphan operation for {handle}");
        }
    }

    // one context per train
    let mut identities = HashSet::new();
    for handle in pool.handles() {
        let ctx = ll.context(handle).unwrap();
        assert!(identities.insert(ctx.identity), "{} tracked twice", ctx.identity);
    }

    assert_eq!(
        ll.platform().baseband.is_active(ProtocolMode::PeriodicScan),
        !pool.is_empty()
    );
}

/// Established syncs are lost at most once, and only while established.
fn audit_events(ll: &mut TestLl, live: &mut HashSet<SyncHandle>) {
    for event in events(ll) {
        match event {
            HostEvent::SyncEstablished(report) if report.status == HciStatus::Success => {
                assert!(live.insert(report.handle), "{} established twice", report.handle);
            }
            HostEvent::SyncLost { handle } => {
                assert!(live.remove(&handle), "{handle} lost without being established");
            }
            _ => {}
        }
    }
}

fn run_sequence(seed: u64, steps: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ll = link_layer(1_000_000);
    let mut live = HashSet::new();

    for seed in 1..=LISTED {
        ll.add_to_periodic_adv_list(identity(seed, 0)).unwrap();
    }
    ll.set_ext_scan_enable(true, 0, 0).unwrap();

    for _ in 0..steps {
        match rng.random_range(0..10) {
            0 => {
                let mut params = create_params(identity(rng.random_range(1..=6), 0));
                if rng.random_bool(0.3) {
                    params.filter_policy = FilterPolicy::UseAdvList;
                }
                let _ = ll.create_sync(params);
            }
            1 | 2 => {
                let target = identity(rng.random_range(1..=6), 0);
                let offset = rng.random_range(10_000..200_000);
                let interval = INTERVALS[rng.random_range(0..INTERVALS.len())];
                discover(&mut ll, target, offset, interval, rng.random());
            }
            3..=6 => run_next(&mut ll, &mut rng),
            7 => {
                let _ = ll.create_sync_cancel();
            }
            8 => {
                if let Some(handle) = random_handle(&ll, &mut rng) {
                    ll.dispatch(LlMessage::Timer(TimerId::Supervision(handle)));
                }
            }
            _ => {
                if let Some(handle) = random_handle(&ll, &mut rng) {
                    if ll.terminate_sync(handle).is_ok() {
                        live.remove(&handle);
                    }
                }
            }
        }
        if rng.random_bool(0.5) {
            settle(&mut ll);
        }
        audit_events(&mut ll, &mut live);
        check_invariants(&ll);
    }

    ll.reset();
    settle(&mut ll);

    assert!(ll.pool().is_empty());
    assert!(ll.platform().scheduler.is_empty());
    assert!(!ll.create_sync_pending());
    assert_eq!(ll.create_sync_state(), EstablishState::Disabled);
    assert!(!ll.platform().baseband.is_active(ProtocolMode::PeriodicScan));
    assert!(!ll.platform().baseband.is_active(ProtocolMode::ExtScan));
    assert!(events(&mut ll).is_empty());
    // no context still holds the advertiser list
    ll.add_to_periodic_adv_list(identity(1, 0)).unwrap();
    ll.clear_periodic_adv_list().unwrap();
}

#[test]
fn test_random_sequences_keep_invariants() {
    for seed in 0..32 {
        run_sequence(seed, 200);
    }
}

#[test]
fn test_pool_never_exceeds_capacity() {
    let mut ll = link_layer(1_000_000);
    ll.set_ext_scan_enable(true, 0, 0).unwrap();
    let capacity = ll.pool().capacity();

    for seed in 1..=(capacity as u64 + 2) {
        let target = identity(seed, 1);
        match ll.create_sync(create_params(target)) {
            Ok(()) => {
                discover(&mut ll, target, 30_000 + seed as u32 * 7_000, 80, 0);
                let handle = ll.create_sync_context().unwrap();
                let anchor = expected_anchor(&ll, handle);
                receive(&mut ll, handle, anchor);
            }
            Err(err) => {
                assert_eq!(err.status(), HciStatus::MemoryCapacityExceeded);
                assert_eq!(ll.pool().enabled_count(), capacity);
            }
        }
    }
    assert_eq!(ll.pool().enabled_count(), capacity);
}
