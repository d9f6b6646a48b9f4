//! Periodic sync transfer between two link layers.

use bytes::Bytes;
use contracts::{
    HciStatus, HostEvent, PastParams, Phy, SyncHandle, SyncTransferMode, SyncTransferReport, Tick,
};
use sync_engine::mock::settle;
use sync_engine::{ConnEventRef, EstablishState, LlMessage, PerScanState, SyncTransferMsg};

use crate::support::*;

const CONN: u16 = 1;
const CONN_INTERVAL_USEC: u32 = 50_000;
const SERVICE_DATA: u16 = 0x0A0B;

/// Sender tracking a train anchored at 1_030_000 (counter 10), 100 ms interval.
fn sender() -> (TestLl, SyncHandle) {
    established(1_000_000, identity(7, 2))
}

fn build_transfer(ll: &TestLl, handle: SyncHandle) -> Bytes {
    ll.periodic_sync_transfer(
        ConnEventRef {
            conn_handle: CONN,
            event_counter: 5,
            anchor: 1_050_000,
        },
        SERVICE_DATA,
        handle,
    )
    .unwrap()
}

fn transfer_msg(pdu: Bytes, rx_conn_event: u16, rx_conn_anchor: Tick) -> LlMessage {
    LlMessage::SyncTransfer(SyncTransferMsg {
        conn_handle: CONN,
        pdu,
        rx_conn_event,
        rx_conn_anchor,
        conn_interval_usec: CONN_INTERVAL_USEC,
    })
}

fn receiver(now: Tick, mode: SyncTransferMode) -> TestLl {
    let mut ll = link_layer(now);
    ll.set_past_params(
        CONN,
        PastParams {
            mode,
            skip: 0,
            sync_timeout_10ms: 1000,
        },
    )
    .unwrap();
    ll
}

#[test]
fn test_transfer_pdu_describes_next_event() {
    let (ll, handle) = sender();
    let pdu = build_transfer(&ll, handle);
    let ind = sync_pdu::PeriodicSyncInd::decode(&pdu).unwrap();

    assert_eq!(ind.id, SERVICE_DATA);
    assert_eq!(ind.identity(), identity(7, 2));
    assert_eq!(ind.conn_event_count, 5);
    assert_eq!(ind.last_pa_event_counter, 10);
    assert_eq!(ind.sync_info.event_counter, 11);
    assert_eq!(ind.sync_info.interval, 80);
    assert_eq!(ind.sync_info.access_address, 0x5065_A1B2);
    // 80 ms rounded down to 30 us units
    assert_eq!(ind.sync_info.offset.to_usec(), 79_980);
    assert_eq!(ind.phy, Phy::Le1M);
}

#[test]
fn test_transfer_requires_established_sync() {
    let (ll, handle) = discovering(1_000_000, identity(7, 2));
    let conn = ConnEventRef {
        conn_handle: CONN,
        event_counter: 5,
        anchor: 1_050_000,
    };
    let err = ll.periodic_sync_transfer(conn, 0, handle).unwrap_err();
    assert_eq!(err.status(), HciStatus::UnknownAdvertisingIdentifier);
    assert!(ll.periodic_sync_transfer(conn, 0, SyncHandle(3)).is_err());
}

#[test]
fn test_transfer_establishes_on_receiver() {
    let (sender, handle) = sender();
    let pdu = build_transfer(&sender, handle);

    let mut ll = receiver(1_052_000, SyncTransferMode::ReportsEnabled);
    ll.dispatch(transfer_msg(pdu, 5, 1_050_000));

    assert_eq!(ll.transfer_sync_state(), EstablishState::Discovering);
    let synced = ll.transfer_sync_context().unwrap();
    let anchor = expected_anchor(&ll, synced);
    assert_eq!(anchor, 1_129_980);
    assert_eq!(ll.context(synced).unwrap().next.event_counter, 11);

    receive(&mut ll, synced, 1_130_000);
    assert_eq!(ll.transfer_sync_state(), EstablishState::Disabled);
    assert_eq!(ll.transfer_sync_context(), None);
    assert_eq!(ll.context(synced).unwrap().state, PerScanState::SyncEstablished);

    let reported = events(&mut ll);
    assert_eq!(reported.len(), 2);
    match &reported[0] {
        HostEvent::SyncTransferReceived(report) => {
            assert_eq!(report.status, HciStatus::Success);
            assert_eq!(report.conn_handle, CONN);
            assert_eq!(report.service_data, SERVICE_DATA);
            assert_eq!(report.handle, synced);
            assert_eq!(report.addr, identity(7, 2).addr);
            assert_eq!(report.interval, 80);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(reported[1], HostEvent::PeriodicAdvReport { .. }));
}

#[test]
fn test_stale_transfer_projects_forward() {
    let (sender, handle) = sender();
    let pdu = build_transfer(&sender, handle);

    // delivered two connection events late, after the described event passed
    let mut ll = receiver(1_152_000, SyncTransferMode::ReportsEnabled);
    ll.dispatch(transfer_msg(pdu, 7, 1_150_000));

    let synced = ll.transfer_sync_context().unwrap();
    let ctx = ll.context(synced).unwrap();
    assert_eq!(ctx.next.event_counter, 12);
    assert_eq!(ctx.next.tick, 1_229_980);
}

#[test]
fn test_reports_disabled_mode() {
    let (sender, handle) = sender();
    let pdu = build_transfer(&sender, handle);

    let mut ll = receiver(1_052_000, SyncTransferMode::ReportsDisabled);
    ll.dispatch(transfer_msg(pdu, 5, 1_050_000));
    let synced = ll.transfer_sync_context().unwrap();
    receive(&mut ll, synced, 1_130_000);

    let reported = events(&mut ll);
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].establish_status(), Some(HciStatus::Success));
}

#[test]
fn test_transfer_ignored_when_receiving_off() {
    let (sender, handle) = sender();
    let pdu = build_transfer(&sender, handle);

    let mut ll = link_layer(1_052_000);
    ll.dispatch(transfer_msg(pdu, 5, 1_050_000));

    assert_eq!(ll.transfer_sync_state(), EstablishState::Disabled);
    assert!(ll.pool().is_empty());
    assert!(events(&mut ll).is_empty());
}

#[test]
fn test_default_past_params_apply_to_new_connections() {
    let (sender, handle) = sender();
    let pdu = build_transfer(&sender, handle);

    let mut ll = link_layer(1_052_000);
    ll.set_default_past_params(PastParams {
        mode: SyncTransferMode::ReportsEnabled,
        skip: 0,
        sync_timeout_10ms: 1000,
    })
    .unwrap();
    ll.dispatch(transfer_msg(pdu, 5, 1_050_000));
    assert_eq!(ll.transfer_sync_state(), EstablishState::Discovering);
}

#[test]
fn test_invalid_past_params_rejected() {
    let mut ll = link_layer(1_000_000);
    let err = ll
        .set_past_params(
            CONN,
            PastParams {
                mode: SyncTransferMode::ReportsEnabled,
                skip: 0,
                sync_timeout_10ms: 1,
            },
        )
        .unwrap_err();
    assert_eq!(err.status(), HciStatus::InvalidParameters);
}

#[test]
fn test_duplicate_transfers_dropped() {
    let (sender, handle) = sender();
    let pdu = build_transfer(&sender, handle);

    let mut ll = receiver(1_052_000, SyncTransferMode::ReportsEnabled);
    ll.dispatch(transfer_msg(pdu.clone(), 5, 1_050_000));
    let synced = ll.transfer_sync_context().unwrap();

    // machine busy
    ll.dispatch(transfer_msg(pdu.clone(), 5, 1_050_000));
    assert_eq!(ll.pool().enabled_count(), 1);
    assert_eq!(ll.transfer_sync_context(), Some(synced));

    receive(&mut ll, synced, 1_130_000);
    events(&mut ll);

    // train already tracked
    ll.dispatch(transfer_msg(pdu, 5, 1_050_000));
    assert_eq!(ll.transfer_sync_state(), EstablishState::Disabled);
    assert_eq!(ll.pool().enabled_count(), 1);
    assert!(events(&mut ll).is_empty());
}

/// 转移状态机忙时，另一条列车的转移被拒绝
#[test]
fn test_transfer_rejected_while_establishing() {
    let (first, first_handle) = sender();
    let (second, second_handle) = established(1_000_000, identity(8, 4));
    let first_pdu = build_transfer(&first, first_handle);
    let second_pdu = build_transfer(&second, second_handle);

    let mut ll = receiver(1_052_000, SyncTransferMode::ReportsEnabled);
    ll.dispatch(transfer_msg(first_pdu, 5, 1_050_000));
    let synced = ll.transfer_sync_context().unwrap();

    ll.dispatch(transfer_msg(second_pdu, 5, 1_050_000));
    assert_eq!(ll.transfer_sync_state(), EstablishState::Discovering);
    assert_eq!(ll.transfer_sync_context(), Some(synced));
    assert_eq!(ll.pool().enabled_count(), 1);
    assert_eq!(ll.context(synced).unwrap().identity, identity(7, 2));
    assert!(events(&mut ll).is_empty());

    receive(&mut ll, synced, 1_130_000);
    assert_eq!(ll.transfer_sync_state(), EstablishState::Disabled);
    assert!(matches!(
        events(&mut ll).first(),
        Some(HostEvent::SyncTransferReceived(report)) if report.status == HciStatus::Success
    ));
}

#[test]
fn test_past_params_reject_unknown_connection() {
    let mut ll = link_layer(1_000_000);
    let params = PastParams {
        mode: SyncTransferMode::ReportsEnabled,
        skip: 0,
        sync_timeout_10ms: 1000,
    };
    let err = ll.set_past_params(0x0F00, params).unwrap_err();
    assert_eq!(err.status(), HciStatus::UnknownConnectionIdentifier);
    assert!(ll.set_past_params(0x0EFF, params).is_ok());
}

#[test]
fn test_malformed_transfer_dropped() {
    let mut ll = receiver(1_052_000, SyncTransferMode::ReportsEnabled);
    ll.dispatch(transfer_msg(Bytes::from_static(&[0x22, 0x01, 0x02]), 5, 1_050_000));
    assert_eq!(ll.transfer_sync_state(), EstablishState::Disabled);
    assert!(ll.pool().is_empty());
}

#[test]
fn test_host_cancels_transfer_sync() {
    let (sender, handle) = sender();
    let pdu = build_transfer(&sender, handle);

    let mut ll = receiver(1_052_000, SyncTransferMode::ReportsEnabled);
    ll.dispatch(transfer_msg(pdu, 5, 1_050_000));
    let synced = ll.transfer_sync_context().unwrap();

    ll.terminate_sync(synced).unwrap();
    assert_eq!(ll.transfer_sync_state(), EstablishState::ShuttingDown);
    settle(&mut ll);

    assert_eq!(ll.transfer_sync_state(), EstablishState::Disabled);
    assert!(ll.pool().is_empty());
    assert_eq!(
        events(&mut ll),
        vec![HostEvent::SyncTransferReceived(SyncTransferReport {
            status: HciStatus::OperationCancelledByHost,
            conn_handle: CONN,
            service_data: SERVICE_DATA,
            ..Default::default()
        })]
    );
}

#[test]
fn test_transfer_sync_fails_without_reception() {
    let (sender, handle) = sender();
    let pdu = build_transfer(&sender, handle);

    let mut ll = receiver(1_052_000, SyncTransferMode::ReportsEnabled);
    ll.dispatch(transfer_msg(pdu, 5, 1_050_000));
    let synced = ll.transfer_sync_context().unwrap();

    for _ in 0..ll.config().establish_event_limit {
        miss(&mut ll, synced);
    }
    settle(&mut ll);

    assert!(ll.pool().is_empty());
    match events(&mut ll).as_slice() {
        [HostEvent::SyncTransferReceived(report)] => {
            assert_eq!(report.status, HciStatus::ConnectionFailedToEstablish);
            assert_eq!(report.conn_handle, CONN);
            assert_eq!(report.addr, identity(7, 2).addr);
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[test]
fn test_create_and_transfer_run_side_by_side() {
    let (sender, handle) = sender();
    let pdu = build_transfer(&sender, handle);

    let mut ll = receiver(1_000_000, SyncTransferMode::ReportsEnabled);
    ll.set_ext_scan_enable(true, 0, 0).unwrap();
    ll.create_sync(create_params(identity(1, 3))).unwrap();
    discover(&mut ll, identity(1, 3), 30_000, 80, 10);
    ll.platform_mut().scheduler.set_now(1_052_000);
    ll.dispatch(transfer_msg(pdu, 5, 1_050_000));

    assert_eq!(ll.create_sync_state(), EstablishState::Discovering);
    assert_eq!(ll.transfer_sync_state(), EstablishState::Discovering);
    assert_eq!(ll.pool().enabled_count(), 2);
    assert!(ll.terminate_sync(ll.create_sync_context().unwrap()).is_err());
}
