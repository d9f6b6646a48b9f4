//! End-to-end scenarios on the mock platform.

use contracts::{
    tick_diff, DataStatus, HciStatus, HostEvent, OpOwner, Phy, ProtocolMode, SyncEstablishedReport,
    TimerId,
};
use sync_engine::mock::settle;
use sync_engine::{
    AcadId, AcadState, ChannelSelection, EstablishState, ExtScanState, LlMessage, PerScanState,
    RadioEvent,
};
use sync_pdu::ChannelMap;

use crate::support::*;

const NOW: u32 = 1_000_000;

/// 扫描发现目标后进入 Discovering，首个接收操作位于未来
#[test]
fn test_scan_discovery_starts_establishment() {
    let target = identity(1, 3);
    let (ll, handle) = discovering(NOW, target);

    assert_eq!(ll.create_sync_state(), EstablishState::Discovering);
    assert_eq!(ll.pool().enabled_count(), 1);

    let ctx = ll.context(handle).unwrap();
    assert_eq!(ctx.identity, target);
    assert_eq!(ctx.next.event_counter, 10);
    assert_eq!(ctx.next.tick, NOW + 30_000);
    assert!(ctx.rx_slop_usec >= 30);

    let op = ll.platform().scheduler.periodic_op(handle).unwrap();
    assert!(tick_diff(op.due, NOW) > 0);
    assert_eq!(op.access_address, 0x5065_A1B2);
    assert!(ll.platform().baseband.is_active(ProtocolMode::PeriodicScan));
    assert!(ll
        .platform()
        .timers
        .is_armed(TimerId::Supervision(handle)));
}

#[test]
fn test_discovery_reports_advertisement() {
    let target = identity(1, 3);
    let (mut ll, _) = discovering(NOW, target);

    let reports = events(&mut ll);
    assert_eq!(reports.len(), 1);
    match &reports[0] {
        HostEvent::ExtAdvReport {
            addr,
            sid,
            periodic_interval,
            data_status,
            ..
        } => {
            assert_eq!(*addr, target.addr);
            assert_eq!(*sid, Some(3));
            assert_eq!(*periodic_interval, Some(80));
            assert_eq!(*data_status, DataStatus::Complete);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_other_advertisers_ignored() {
    let mut ll = link_layer(NOW);
    ll.set_ext_scan_enable(true, 0, 0).unwrap();
    ll.create_sync(create_params(identity(1, 3))).unwrap();

    discover(&mut ll, identity(2, 3), 30_000, 80, 10);
    discover(&mut ll, identity(1, 4), 30_000, 80, 10);

    assert_eq!(ll.create_sync_state(), EstablishState::Disabled);
    assert!(ll.create_sync_pending());
    assert!(ll.pool().is_empty());
}

/// 首次接收：先上报建立事件，再上报周期广播报告
#[test]
fn test_first_reception_establishes() {
    let target = identity(1, 3);
    let (mut ll, handle) = established(NOW, target);

    let reported = events(&mut ll);
    assert_eq!(reported.len(), 3);
    match &reported[1] {
        HostEvent::SyncEstablished(report) => {
            assert_eq!(report.status, HciStatus::Success);
            assert_eq!(report.handle, handle);
            assert_eq!(report.addr, target.addr);
            assert_eq!(report.sid, 3);
            assert_eq!(report.interval, 80);
            assert_eq!(report.phy, Some(Phy::Le1M));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        &reported[2],
        HostEvent::PeriodicAdvReport { handle: h, rssi: -40, data, .. }
            if *h == handle && &data[..] == b"periodic"
    ));

    assert_eq!(ll.create_sync_state(), EstablishState::Disabled);
    assert!(!ll.create_sync_pending());
    assert_eq!(ll.create_sync_context(), None);

    let ctx = ll.context(handle).unwrap();
    assert_eq!(ctx.state, PerScanState::SyncEstablished);
    assert_eq!(ctx.anchor.tick, NOW + 30_000);
    assert_eq!(ctx.next.event_counter, 11);
    assert_eq!(ctx.next.tick, NOW + 130_000);
    assert_eq!(ctx.base_widening_usec, 0);
}

#[test]
fn test_reception_after_miss_tracks_drift() {
    let (mut ll, handle) = established(NOW, identity(1, 3));
    let first = ll.context(handle).unwrap().rx_slop_usec;

    miss(&mut ll, handle);
    let ctx = ll.context(handle).unwrap();
    assert_eq!(ctx.missed_events, 1);
    assert_eq!(ctx.next.event_counter, 12);
    assert!(ctx.rx_slop_usec > first);

    let anchor = expected_anchor(&ll, handle);
    receive(&mut ll, handle, anchor + 15);
    let ctx = ll.context(handle).unwrap();
    assert_eq!(ctx.missed_events, 0);
    assert_eq!(ctx.anchor.tick, anchor + 15);
    assert_eq!(ctx.next.event_counter, 13);
}

#[test]
fn test_reporting_disabled_suppresses_reports() {
    let (mut ll, handle) = established(NOW, identity(1, 3));
    events(&mut ll);

    ll.set_periodic_receive_enable(handle, false).unwrap();
    let anchor = expected_anchor(&ll, handle);
    receive(&mut ll, handle, anchor);
    assert!(events(&mut ll).is_empty());

    ll.set_periodic_receive_enable(handle, true).unwrap();
    let anchor = expected_anchor(&ll, handle);
    receive(&mut ll, handle, anchor);
    assert_eq!(events(&mut ll).len(), 1);
}

/// 监督超时：SyncLost 只上报一次，上下文在操作结束后释放
#[test]
fn test_supervision_timeout_reports_loss_once() {
    let (mut ll, handle) = established(NOW, identity(1, 3));
    events(&mut ll);
    let timer = TimerId::Supervision(handle);

    assert!(ll.platform_mut().timers.fire(timer));
    ll.dispatch(LlMessage::Timer(timer));

    assert_eq!(events(&mut ll), vec![HostEvent::SyncLost { handle }]);
    assert_eq!(
        ll.context(handle).unwrap().state,
        PerScanState::SyncTerminating
    );
    assert!(ll
        .platform()
        .scheduler
        .removed()
        .contains(&OpOwner::PeriodicScan(handle)));

    // a stray second expiry is ignored
    ll.dispatch(LlMessage::Timer(timer));
    assert!(events(&mut ll).is_empty());

    settle(&mut ll);
    assert!(ll.pool().is_empty());
    assert!(ll.context(handle).is_none());
    assert!(!ll.platform().baseband.is_active(ProtocolMode::PeriodicScan));
    assert!(events(&mut ll).is_empty());
}

#[test]
fn test_host_terminate() {
    let (mut ll, handle) = established(NOW, identity(1, 3));
    events(&mut ll);

    ll.terminate_sync(handle).unwrap();
    assert!(ll.terminate_sync(handle).is_err());
    settle(&mut ll);

    assert!(ll.pool().is_empty());
    assert!(events(&mut ll).is_empty());
    assert!(!ll.platform().timers.is_armed(TimerId::Supervision(handle)));
}

#[test]
fn test_terminate_while_operation_running() {
    let (mut ll, handle) = established(NOW, identity(1, 3));

    // the scheduler already started the operation: removal is refused
    ll.platform_mut()
        .scheduler
        .complete(OpOwner::PeriodicScan(handle))
        .unwrap();
    ll.terminate_sync(handle).unwrap();
    assert_eq!(ll.pool().enabled_count(), 1);

    ll.dispatch(LlMessage::Radio(RadioEvent::PeriodicMissed { handle }));
    assert!(ll.pool().is_empty());
}

#[test]
fn test_terminate_unknown_handle() {
    let mut ll = link_layer(NOW);
    let err = ll.terminate_sync(contracts::SyncHandle(2)).unwrap_err();
    assert_eq!(err.status(), HciStatus::UnknownAdvertisingIdentifier);
}

/// 主机取消：ShuttingDown → 操作结束后回到 Disabled，上报全零取消事件
#[test]
fn test_cancel_while_discovering() {
    let (mut ll, _) = discovering(NOW, identity(1, 3));
    events(&mut ll);

    ll.create_sync_cancel().unwrap();
    assert_eq!(ll.create_sync_state(), EstablishState::ShuttingDown);
    assert_eq!(ll.pool().enabled_count(), 1);
    assert!(events(&mut ll).is_empty());

    settle(&mut ll);
    assert_eq!(ll.create_sync_state(), EstablishState::Disabled);
    assert!(!ll.create_sync_pending());
    assert!(ll.pool().is_empty());
    assert_eq!(
        events(&mut ll),
        vec![HostEvent::SyncEstablished(SyncEstablishedReport::zeroed(
            HciStatus::OperationCancelledByHost
        ))]
    );
}

#[test]
fn test_cancel_before_discovery() {
    let mut ll = link_layer(NOW);
    ll.create_sync(create_params(identity(1, 3))).unwrap();

    ll.create_sync_cancel().unwrap();
    assert!(!ll.create_sync_pending());
    assert_eq!(
        events(&mut ll),
        vec![HostEvent::SyncEstablished(SyncEstablishedReport::zeroed(
            HciStatus::OperationCancelledByHost
        ))]
    );
    assert!(ll.create_sync_cancel().is_err());
}

#[test]
fn test_establishment_gives_up_after_missed_events() {
    let target = identity(1, 3);
    let (mut ll, handle) = discovering(NOW, target);
    events(&mut ll);
    let limit = ll.config().establish_event_limit;

    for _ in 0..limit {
        assert_eq!(ll.create_sync_state(), EstablishState::Discovering);
        miss(&mut ll, handle);
    }
    settle(&mut ll);

    assert_eq!(ll.create_sync_state(), EstablishState::Disabled);
    assert!(ll.pool().is_empty());
    match events(&mut ll).as_slice() {
        [HostEvent::SyncEstablished(report)] => {
            assert_eq!(report.status, HciStatus::ConnectionFailedToEstablish);
            assert_eq!(report.addr, target.addr);
            assert_eq!(report.sid, target.sid);
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[test]
fn test_supervision_expiry_before_first_reception() {
    let (mut ll, handle) = discovering(NOW, identity(1, 3));
    events(&mut ll);

    ll.dispatch(LlMessage::Timer(TimerId::Supervision(handle)));
    assert_eq!(ll.create_sync_state(), EstablishState::ShuttingDown);
    settle(&mut ll);

    assert!(ll.pool().is_empty());
    assert_eq!(
        events(&mut ll)
            .iter()
            .filter_map(HostEvent::establish_status)
            .collect::<Vec<_>>(),
        vec![HciStatus::ConnectionFailedToEstablish]
    );
}

#[test]
fn test_create_rejects_duplicate_and_second_request() {
    let target = identity(1, 3);
    let (mut ll, _) = established(NOW, target);

    let err = ll.create_sync(create_params(target)).unwrap_err();
    assert_eq!(err.status(), HciStatus::ConnectionAlreadyExists);

    ll.create_sync(create_params(identity(2, 1))).unwrap();
    let err = ll.create_sync(create_params(identity(3, 1))).unwrap_err();
    assert_eq!(err.status(), HciStatus::CommandDisallowed);
}

#[test]
fn test_create_rejects_invalid_params() {
    let mut ll = link_layer(NOW);
    let mut params = create_params(identity(1, 3));
    params.sync_timeout_10ms = 5;
    let err = ll.create_sync(params).unwrap_err();
    assert_eq!(err.status(), HciStatus::InvalidParameters);
    assert!(!ll.create_sync_pending());
}

#[test]
fn test_create_from_advertiser_list() {
    let mut ll = link_layer(NOW);
    ll.set_ext_scan_enable(true, 0, 0).unwrap();
    let target = identity(9, 2);
    ll.add_to_periodic_adv_list(target).unwrap();

    let mut params = create_params(identity(1, 1));
    params.filter_policy = sync_engine::FilterPolicy::UseAdvList;
    ll.create_sync(params).unwrap();
    assert!(ll.clear_periodic_adv_list().is_err());

    discover(&mut ll, target, 30_000, 80, 10);
    let handle = ll.create_sync_context().unwrap();
    assert!(ll.context(handle).unwrap().holds_list_ref);
    assert!(ll.remove_from_periodic_adv_list(&target).is_err());

    ll.create_sync_cancel().unwrap();
    settle(&mut ll);
    assert!(ll.pool().is_empty());
    ll.remove_from_periodic_adv_list(&target).unwrap();
}

/// 较长间隔的列车在冲突中胜出，被挤占的同步顺延一个事件
#[test]
fn test_conflict_favours_long_interval_train() {
    let (mut ll, first) = established(NOW, identity(1, 3));
    assert_eq!(ll.context(first).unwrap().next.event_counter, 11);

    ll.platform_mut().scheduler.set_now(NOW + 40_000);
    let mut params = create_params(identity(2, 1));
    params.sync_timeout_10ms = 500;
    ll.create_sync(params).unwrap();
    // lands on the first sync's next event; 500 ms vs 100 ms trains
    discover(&mut ll, identity(2, 1), 90_000, 400, 50);
    let second = ll.create_sync_context().unwrap();

    assert_eq!(ll.context(second).unwrap().next.event_counter, 50);
    assert_eq!(ll.context(first).unwrap().next.event_counter, 12);
    assert!(ll.platform().scheduler.periodic_op(first).is_some());
}

#[test]
fn test_conflict_keeps_incumbent_of_similar_interval() {
    let (mut ll, first) = established(NOW, identity(1, 3));

    ll.platform_mut().scheduler.set_now(NOW + 40_000);
    ll.create_sync(create_params(identity(2, 1))).unwrap();
    discover(&mut ll, identity(2, 1), 90_000, 160, 50);
    let second = ll.create_sync_context().unwrap();

    assert_eq!(ll.context(first).unwrap().next.event_counter, 11);
    assert_eq!(ll.context(second).unwrap().next.event_counter, 51);
}

#[test]
fn test_scan_duration_timeout() {
    let mut ll = link_layer(NOW);
    ll.set_ext_scan_enable(true, 100, 0).unwrap();
    let timer = TimerId::ScanDuration(Phy::Le1M);
    assert_eq!(ll.platform().timers.timeout_of(timer), Some(1_000_000));
    assert!(ll.platform().baseband.is_active(ProtocolMode::ExtScan));

    ll.platform_mut().timers.fire(timer);
    ll.dispatch(LlMessage::Timer(timer));
    assert_eq!(ll.ext_scan_state(Phy::Le1M), Some(ExtScanState::ShuttingDown));
    settle(&mut ll);

    assert_eq!(ll.ext_scan_state(Phy::Le1M), Some(ExtScanState::Disabled));
    assert!(!ll.platform().baseband.is_active(ProtocolMode::ExtScan));
    assert_eq!(events(&mut ll), vec![HostEvent::ScanTimeout]);
}

#[test]
fn test_scan_period_restarts_without_timeout() {
    let mut ll = link_layer(NOW);
    ll.set_ext_scan_enable(true, 100, 2).unwrap();

    let duration = TimerId::ScanDuration(Phy::Le1M);
    ll.platform_mut().timers.fire(duration);
    ll.dispatch(LlMessage::Timer(duration));
    settle(&mut ll);
    assert_eq!(ll.ext_scan_state(Phy::Le1M), Some(ExtScanState::Disabled));
    assert!(events(&mut ll).is_empty());

    let period = TimerId::ScanPeriod(Phy::Le1M);
    ll.platform_mut().timers.fire(period);
    ll.dispatch(LlMessage::Timer(period));
    assert_eq!(ll.ext_scan_state(Phy::Le1M), Some(ExtScanState::Discovering));
    assert!(ll.platform().timers.is_armed(duration));
}

#[test]
fn test_scan_params_locked_while_scanning() {
    let mut ll = link_layer(NOW);
    let params = contracts::ScanPhyParams {
        active: true,
        interval_usec: 60_000,
        window_usec: 30_000,
    };
    ll.set_ext_scan_params(&[(Phy::Le1M, params), (Phy::LeCoded, params)])
        .unwrap();
    assert!(ll.set_ext_scan_params(&[(Phy::Le2M, params)]).is_err());

    ll.set_ext_scan_enable(true, 0, 0).unwrap();
    assert_eq!(ll.ext_scan_state(Phy::LeCoded), Some(ExtScanState::Discovering));
    assert!(ll.set_ext_scan_params(&[(Phy::Le1M, params)]).is_err());
    assert!(ll.scan_request_permitted(Phy::Le1M));
}

#[test]
fn test_scan_response_outcomes_drive_backoff() {
    let mut ll = link_layer(NOW);
    let params = contracts::ScanPhyParams {
        active: true,
        interval_usec: 60_000,
        window_usec: 30_000,
    };
    ll.set_ext_scan_params(&[(Phy::Le1M, params)]).unwrap();
    ll.set_ext_scan_enable(true, 0, 0).unwrap();

    let outcome = |success| LlMessage::Radio(RadioEvent::ScanRspOutcome { phy: Phy::Le1M, success });
    for _ in 0..4 {
        ll.dispatch(outcome(false));
    }
    let backoff = ll.scan_backoff(Phy::Le1M).unwrap();
    assert_eq!(backoff.upper_limit(), 4);
    assert!((1..=4).contains(&backoff.count()));

    ll.dispatch(outcome(true));
    ll.dispatch(outcome(true));
    assert_eq!(ll.scan_backoff(Phy::Le1M).unwrap().upper_limit(), 2);

    ll.dispatch(LlMessage::Radio(RadioEvent::ScanRspOutcome {
        phy: Phy::Le2M,
        success: false,
    }));
    assert!(ll.scan_backoff(Phy::Le2M).is_none());
    assert_eq!(ll.scan_backoff(Phy::Le1M).unwrap().upper_limit(), 2);
}

/// 信道图更新：瞬时点之前沿用旧图，到达瞬时点后切换
#[test]
fn test_channel_map_update_applies_at_instant() {
    let (mut ll, handle) = established(NOW, identity(1, 3));
    let access_address = ll.context(handle).unwrap().access_address;
    let new_map = ChannelMap::from_channels(&[3, 4]);

    // counter 11 announces the update for counter 13
    let anchor = expected_anchor(&ll, handle);
    receive_pdu(&mut ll, handle, anchor, channel_map_update_pdu(new_map, 13));

    let ctx = ll.context(handle).unwrap();
    assert_eq!(ctx.next.event_counter, 12);
    assert_eq!(ctx.chan_sel.map(), ChannelMap::ALL);
    assert!(matches!(
        ctx.acad.state(AcadId::ChannelMapUpdate),
        AcadState::Enabled(_)
    ));
    let old = ChannelSelection::new(access_address, ChannelMap::ALL);
    let op = ll.platform().scheduler.periodic_op(handle).unwrap();
    assert_eq!(op.channel, old.channel_for(12));

    let anchor = expected_anchor(&ll, handle);
    receive(&mut ll, handle, anchor);

    let ctx = ll.context(handle).unwrap();
    assert_eq!(ctx.next.event_counter, 13);
    assert_eq!(ctx.chan_sel.map(), new_map);
    assert_eq!(ctx.acad.state(AcadId::ChannelMapUpdate), AcadState::Disabled);
    let updated = ChannelSelection::new(access_address, new_map);
    let op = ll.platform().scheduler.periodic_op(handle).unwrap();
    assert_eq!(op.channel, updated.channel_for(13));
    assert!(new_map.is_used(op.channel));

    for counter in 14..18 {
        let anchor = expected_anchor(&ll, handle);
        receive(&mut ll, handle, anchor);
        let op = ll.platform().scheduler.periodic_op(handle).unwrap();
        assert_eq!(op.channel, updated.channel_for(counter));
        assert!(new_map.is_used(op.channel));
    }
}

#[test]
fn test_channel_map_update_with_passed_instant_ignored() {
    let (mut ll, handle) = established(NOW, identity(1, 3));
    let access_address = ll.context(handle).unwrap().access_address;

    let anchor = expected_anchor(&ll, handle);
    receive_pdu(
        &mut ll,
        handle,
        anchor,
        channel_map_update_pdu(ChannelMap::from_channels(&[3, 4]), 8),
    );

    let ctx = ll.context(handle).unwrap();
    assert_eq!(ctx.chan_sel.map(), ChannelMap::ALL);
    assert_eq!(ctx.acad.state(AcadId::ChannelMapUpdate), AcadState::Disabled);
    assert_eq!(ctx.state, PerScanState::SyncEstablished);
    let op = ll.platform().scheduler.periodic_op(handle).unwrap();
    let selection = ChannelSelection::new(access_address, ChannelMap::ALL);
    assert_eq!(op.channel, selection.channel_for(ctx.next.event_counter));
}

/// 复位：所有对象静默拆除
#[test]
fn test_reset_tears_down_silently() {
    let (mut ll, _) = established(NOW, identity(1, 3));
    ll.create_sync(create_params(identity(2, 1))).unwrap();
    discover(&mut ll, identity(2, 1), 60_000, 80, 7);
    assert_eq!(ll.pool().enabled_count(), 2);
    events(&mut ll);

    ll.reset();
    settle(&mut ll);

    assert!(ll.pool().is_empty());
    assert_eq!(ll.create_sync_state(), EstablishState::Disabled);
    assert!(!ll.create_sync_pending());
    assert_eq!(ll.ext_scan_state(Phy::Le1M), Some(ExtScanState::Disabled));
    assert!(!ll.platform().baseband.is_active(ProtocolMode::ExtScan));
    assert!(!ll.platform().baseband.is_active(ProtocolMode::PeriodicScan));
    assert!(events(&mut ll).is_empty());
    assert!(ll.platform().scheduler.is_empty());
}

#[test]
fn test_metrics_aggregator_over_session() {
    let (mut ll, handle) = established(NOW, identity(1, 3));
    for _ in 0..3 {
        let anchor = expected_anchor(&ll, handle);
        receive(&mut ll, handle, anchor);
    }

    let mut aggregator = observability::SyncMetricsAggregator::new();
    for event in events(&mut ll) {
        aggregator.update(&event);
    }
    let summary = aggregator.summary();
    assert_eq!(summary.established, 1);
    assert_eq!(summary.periodic_reports, 4);
    assert_eq!(summary.ext_adv_reports, 1);
    assert!((summary.rssi_dbm.mean + 40.0).abs() < 1e-9);
}
