//! Shared fixtures: a link layer on the mock platform and PDU builders.

use bytes::Bytes;
use contracts::{
    AddrType, AdvIdentity, BdAddr, HostEvent, LinkLayerConfig, OpOwner, Phy, RadioScheduler, Sca,
    SyncHandle, Tick,
};
use sync_engine::mock::MockPlatform;
use sync_engine::{CreateSyncParams, FilterPolicy, LinkLayer, LlMessage, RadioEvent, RxPacket};
use sync_pdu::{Adi, ChannelMap, ExtAdvPdu, SyncInfo};
use timing::SyncOffset;

pub type TestLl = LinkLayer<MockPlatform>;

/// 50 ppm
pub const ADV_SCA: u8 = 5;

pub fn link_layer(now: Tick) -> TestLl {
    let mut ll = LinkLayer::new(LinkLayerConfig::default(), MockPlatform::default());
    ll.platform_mut().scheduler.set_now(now);
    ll
}

pub fn identity(seed: u64, sid: u8) -> AdvIdentity {
    AdvIdentity::new(BdAddr::from_u64(0xC0DE_0000_0000 | seed), AddrType::Public, sid)
}

pub fn create_params(target: AdvIdentity) -> CreateSyncParams {
    CreateSyncParams {
        filter_policy: FilterPolicy::UseParams,
        sid: target.sid,
        addr: target.addr,
        addr_type: target.addr_type,
        skip: 0,
        sync_timeout_10ms: 100,
        reporting_disabled: false,
    }
}

pub fn sync_info(offset_usec: u32, interval: u16, event_counter: u16) -> SyncInfo {
    SyncInfo {
        offset: SyncOffset::from_usec(offset_usec).unwrap(),
        interval,
        channel_map: ChannelMap::ALL,
        sca: Sca::from_bits(ADV_SCA),
        access_address: 0x5065_A1B2,
        crc_init: 0x12_3456,
        event_counter,
    }
}

/// Advertisement carrying SyncInfo for `target`.
pub fn sync_adv(target: AdvIdentity, info: SyncInfo) -> Bytes {
    ExtAdvPdu {
        tx_add: target.addr_type.is_random(),
        adv_addr: Some(target.addr),
        adi: Some(Adi {
            did: 1,
            sid: target.sid,
        }),
        sync_info: Some(info),
        adv_data: Bytes::from_static(b"\x02\x01\x06"),
        ..Default::default()
    }
    .encode()
}

pub fn periodic_pdu(data: &'static [u8]) -> Bytes {
    ExtAdvPdu {
        adv_data: Bytes::from_static(data),
        ..Default::default()
    }
    .encode()
}

/// Periodic packet whose ACAD carries a channel map update.
pub fn channel_map_update_pdu(map: ChannelMap, instant: u16) -> Bytes {
    let mut acad = vec![0x08, 0x28];
    acad.extend_from_slice(&map.to_bytes());
    acad.extend_from_slice(&instant.to_le_bytes());
    ExtAdvPdu {
        acad: Bytes::from(acad),
        adv_data: Bytes::from_static(b"periodic"),
        ..Default::default()
    }
    .encode()
}

/// Scan discovers `target` with a train whose first event is `offset_usec` after now.
pub fn discover(ll: &mut TestLl, target: AdvIdentity, offset_usec: u32, interval: u16, counter: u16) {
    let now = ll.platform().scheduler.now();
    ll.dispatch(LlMessage::Radio(RadioEvent::AdvReceived {
        phy: Phy::Le1M,
        rx: RxPacket {
            pdu: sync_adv(target, sync_info(offset_usec, interval, counter)),
            rssi: -55,
            start: now,
        },
    }));
}

/// Run the outstanding periodic operation of `handle` with a reception at `start`.
pub fn receive(ll: &mut TestLl, handle: SyncHandle, start: Tick) {
    receive_pdu(ll, handle, start, periodic_pdu(b"periodic"));
}

/// As [`receive`], with the given packet.
pub fn receive_pdu(ll: &mut TestLl, handle: SyncHandle, start: Tick, pdu: Bytes) {
    ll.platform_mut()
        .scheduler
        .complete(OpOwner::PeriodicScan(handle))
        .expect("periodic operation queued");
    ll.platform_mut().scheduler.set_now(start + 3_000);
    ll.dispatch(LlMessage::Radio(RadioEvent::PeriodicRx {
        handle,
        rx: RxPacket {
            pdu,
            rssi: -40,
            start,
        },
    }));
}

/// Run the outstanding periodic operation of `handle` without a reception.
pub fn miss(ll: &mut TestLl, handle: SyncHandle) {
    ll.platform_mut()
        .scheduler
        .complete(OpOwner::PeriodicScan(handle))
        .expect("periodic operation queued");
    ll.dispatch(LlMessage::Radio(RadioEvent::PeriodicMissed { handle }));
}

/// Tick the outstanding operation of `handle` targets (window centre).
pub fn expected_anchor(ll: &TestLl, handle: SyncHandle) -> Tick {
    ll.context(handle).expect("context enabled").next.tick
}

/// Scan enabled, create-sync issued and the target discovered at `now`.
pub fn discovering(now: Tick, target: AdvIdentity) -> (TestLl, SyncHandle) {
    let mut ll = link_layer(now);
    ll.set_ext_scan_enable(true, 0, 0).unwrap();
    ll.create_sync(create_params(target)).unwrap();
    discover(&mut ll, target, 30_000, 80, 10);
    let handle = ll.create_sync_context().expect("create-sync discovering");
    (ll, handle)
}

/// As [`discovering`], followed by the first reception.
pub fn established(now: Tick, target: AdvIdentity) -> (TestLl, SyncHandle) {
    let (mut ll, handle) = discovering(now, target);
    let anchor = expected_anchor(&ll, handle);
    receive(&mut ll, handle, anchor);
    (ll, handle)
}

pub fn events(ll: &mut TestLl) -> Vec<HostEvent> {
    ll.platform_mut().host.take()
}
