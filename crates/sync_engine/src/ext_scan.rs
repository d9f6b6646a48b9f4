//! Extended scanning: discovery windows, report assembly and the scan state machine.

use bytes::{BufMut, BytesMut};
use contracts::{
    tick_diff, AddrType, AdvIdentity, Baseband, BdAddr, DataStatus, HostEvent, HostNotifier,
    LinkLayerError, OpId, OpOwner, Phy, Platform, ProtocolMode, RadioOp, RadioScheduler,
    ScanPhyParams, Tick, TimerId, TimerService,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sync_pdu::ExtAdvPdu;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::context::MAX_REPORT_LEN;
use crate::create_sync::SyncCandidate;
use crate::engine::LinkLayer;
use crate::event::{LlMessage, RadioEvent, RxPacket};

/// Access address of the primary advertising channels.
pub const ADV_ACCESS_ADDRESS: u32 = 0x8E89_BED6;
pub const ADV_CRC_INIT: u32 = 0x55_5555;
const ADV_CHANNELS: [u8; 3] = [37, 38, 39];

/// Upper bound of the active-scan backoff window.
pub const BACKOFF_MAX: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtScanState {
    #[default]
    Disabled,
    Discovering,
    ShuttingDown,
    Resetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtScanEvent {
    Reset,
    EnableDiscovery,
    DisableDiscovery,
    Terminate,
    /// Scan duration timer fired
    DurationExpired,
    /// Scan period timer fired
    PeriodExpired,
}

impl ExtScanEvent {
    /// Timer events behave as the host events they stand for.
    fn normalized(self) -> Self {
        match self {
            Self::DurationExpired => Self::DisableDiscovery,
            Self::PeriodExpired => Self::EnableDiscovery,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtScanAction {
    Start,
    Restart,
    Stop,
    ScanTerminated,
    ResetTerminated,
}

/// `(action, next state)` for `event` in `state`.
pub fn transition(
    state: ExtScanState,
    event: ExtScanEvent,
) -> (Option<ExtScanAction>, ExtScanState) {
    use ExtScanAction as A;
    use ExtScanEvent as E;
    use ExtScanState as S;

    match (state, event.normalized()) {
        (S::Disabled, E::EnableDiscovery) => (Some(A::Start), S::Discovering),

        (S::Discovering, E::Reset) => (Some(A::Stop), S::Resetting),
        (S::Discovering, E::EnableDiscovery) => (Some(A::Restart), S::Discovering),
        (S::Discovering, E::DisableDiscovery) => (Some(A::Stop), S::ShuttingDown),

        (S::ShuttingDown, E::Terminate) => (Some(A::ScanTerminated), S::Disabled),
        (S::ShuttingDown, E::Reset) => (None, S::Resetting),

        (S::Resetting, E::Terminate) => (Some(A::ResetTerminated), S::Disabled),

        (state, _) => (None, state),
    }
}

/// Sender of the report being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOrigin {
    pub addr: BdAddr,
    pub addr_type: AddrType,
    pub sid: Option<u8>,
    pub rssi: i8,
    pub periodic_interval: Option<u16>,
}

/// Reassembles an advertisement spread over a PDU chain.
#[derive(Debug, Clone, Default)]
pub struct ReportAssembly {
    origin: Option<ReportOrigin>,
    buf: BytesMut,
    truncated: bool,
}

impl ReportAssembly {
    /// Start a new report, discarding any unfinished one.
    pub fn begin(&mut self, origin: ReportOrigin) {
        self.origin = Some(origin);
        self.buf.clear();
        self.truncated = false;
    }

    pub fn is_open(&self) -> bool {
        self.origin.is_some()
    }

    pub fn append(&mut self, data: &[u8]) {
        if self.truncated {
            return;
        }
        let room = MAX_REPORT_LEN - self.buf.len();
        if data.len() > room {
            self.buf.put_slice(&data[..room]);
            self.truncated = true;
        } else {
            self.buf.put_slice(data);
        }
    }

    /// Close the chain and build the host report.
    pub fn finish(&mut self, phy: Phy) -> Option<HostEvent> {
        let origin = self.origin.take()?;
        let data_status = if self.truncated {
            DataStatus::Truncated
        } else {
            DataStatus::Complete
        };
        self.truncated = false;
        Some(HostEvent::ExtAdvReport {
            phy,
            addr: origin.addr,
            addr_type: origin.addr_type,
            sid: origin.sid,
            rssi: origin.rssi,
            periodic_interval: origin.periodic_interval,
            data_status,
            data: self.buf.split().freeze(),
        })
    }

    pub fn reset(&mut self) {
        self.origin = None;
        self.buf.clear();
        self.truncated = false;
    }
}

/// Active-scan request backoff.
///
/// Two consecutive failures double the upper limit, two consecutive
/// successes halve it; the countdown is redrawn after every outcome.
#[derive(Debug, Clone)]
pub struct ScanBackoff {
    upper_limit: u16,
    count: u16,
    successes: u8,
    failures: u8,
    rng: StdRng,
}

impl ScanBackoff {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            upper_limit: 1,
            count: 1,
            successes: 0,
            failures: 0,
            rng,
        }
    }

    pub fn upper_limit(&self) -> u16 {
        self.upper_limit
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// Count down one scannable advertisement; `true` when a request may go out.
    pub fn should_request(&mut self) -> bool {
        self.count = self.count.saturating_sub(1);
        self.count == 0
    }

    pub fn record(&mut self, success: bool) {
        if success {
            self.failures = 0;
            self.successes += 1;
            if self.successes == 2 {
                self.upper_limit = (self.upper_limit / 2).max(1);
                self.successes = 0;
            }
        } else {
            self.successes = 0;
            self.failures += 1;
            if self.failures == 2 {
                self.upper_limit = (self.upper_limit * 2).min(BACKOFF_MAX);
                self.failures = 0;
            }
        }
        self.count = self.rng.random_range(1..=self.upper_limit);
    }
}

impl Default for ScanBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Extended scanner for one PHY.
#[derive(Debug, Clone)]
pub struct ExtScanContext {
    pub phy: Phy,
    pub state: ExtScanState,
    pub params: ScanPhyParams,
    /// Included in the last accepted scan parameters
    pub configured: bool,
    pub op: Option<OpId>,
    pub next_due: Tick,
    channel_cursor: usize,
    pub duration_usec: u32,
    pub period_usec: u32,
    pub duration_expired: bool,
    pub assembly: ReportAssembly,
    pub backoff: ScanBackoff,
}

impl ExtScanContext {
    pub fn new(phy: Phy, params: ScanPhyParams) -> Self {
        Self {
            phy,
            state: ExtScanState::Disabled,
            params,
            configured: phy == Phy::Le1M,
            op: None,
            next_due: 0,
            channel_cursor: 0,
            duration_usec: 0,
            period_usec: 0,
            duration_expired: false,
            assembly: ReportAssembly::default(),
            backoff: ScanBackoff::new(),
        }
    }

    fn next_channel(&mut self) -> u8 {
        let channel = ADV_CHANNELS[self.channel_cursor % ADV_CHANNELS.len()];
        self.channel_cursor = self.channel_cursor.wrapping_add(1);
        channel
    }
}

impl<P: Platform> LinkLayer<P> {
    pub fn ext_scan_state(&self, phy: Phy) -> Option<ExtScanState> {
        self.scanner(phy).map(|scanner| scanner.state)
    }

    pub fn scan_backoff(&self, phy: Phy) -> Option<&ScanBackoff> {
        self.scanner(phy).map(|scanner| &scanner.backoff)
    }

    pub(crate) fn execute_ext_scan(&mut self, phy: Phy, event: ExtScanEvent) {
        let Some(scanner) = self.scanner_mut(phy) else {
            return;
        };
        let (action, next) = transition(scanner.state, event);
        debug!(%phy, state = ?scanner.state, ?event, ?next, "Ext scan transition");
        scanner.state = next;

        if let Some(action) = action {
            self.run_ext_scan_action(phy, action);
        }
    }

    fn run_ext_scan_action(&mut self, phy: Phy, action: ExtScanAction) {
        match action {
            ExtScanAction::Start => {
                let first = self
                    .scanners
                    .iter()
                    .filter(|scanner| scanner.state != ExtScanState::Disabled)
                    .count()
                    == 1;
                if first {
                    self.platform.baseband().start(ProtocolMode::ExtScan);
                }
                self.arm_scan_timers(phy);
                if let Some(scanner) = self.scanner_mut(phy) {
                    scanner.next_due = 0;
                }
                self.schedule_scan_window(phy);
                info!(%phy, "Extended scan started");
            }
            ExtScanAction::Restart => self.arm_scan_timers(phy),
            ExtScanAction::Stop => {
                self.platform.timers().disarm(TimerId::ScanDuration(phy));
                let op = self.scanner(phy).and_then(|scanner| scanner.op);
                let removed = op.is_some_and(|id| self.platform.scheduler().remove(id));
                if !removed {
                    self.post(LlMessage::Radio(RadioEvent::OpEnd {
                        owner: OpOwner::ExtScan(phy),
                    }));
                }
            }
            ExtScanAction::ScanTerminated | ExtScanAction::ResetTerminated => {
                let mut timed_out = false;
                if let Some(scanner) = self.scanner_mut(phy) {
                    scanner.op = None;
                    scanner.assembly.reset();
                    timed_out = action == ExtScanAction::ScanTerminated
                        && scanner.duration_expired
                        && scanner.period_usec == 0;
                    scanner.duration_expired = false;
                }
                if action == ExtScanAction::ResetTerminated {
                    self.platform.timers().disarm(TimerId::ScanPeriod(phy));
                }
                if self
                    .scanners
                    .iter()
                    .all(|scanner| scanner.state == ExtScanState::Disabled)
                {
                    self.platform.baseband().stop(ProtocolMode::ExtScan);
                }
                if timed_out {
                    info!(%phy, "Extended scan duration elapsed");
                    self.platform.host().deliver(HostEvent::ScanTimeout);
                } else {
                    debug!(%phy, "Extended scan stopped");
                }
            }
        }
    }

    fn arm_scan_timers(&mut self, phy: Phy) {
        let Some(scanner) = self.scanner_mut(phy) else {
            return;
        };
        scanner.duration_expired = false;
        let (duration, period) = (scanner.duration_usec, scanner.period_usec);
        if duration > 0 {
            self.platform.timers().arm(TimerId::ScanDuration(phy), duration);
        }
        if period > 0 {
            self.platform.timers().arm(TimerId::ScanPeriod(phy), period);
        }
    }

    fn schedule_scan_window(&mut self, phy: Phy) {
        let now = self.platform.scheduler().now();
        let earliest = now.wrapping_add(self.config.schedule_setup_usec);
        let Some(scanner) = self.scanners.iter_mut().find(|scanner| scanner.phy == phy) else {
            return;
        };
        let due = if tick_diff(scanner.next_due, earliest) < 0 {
            earliest
        } else {
            scanner.next_due
        };
        let op = RadioOp {
            owner: OpOwner::ExtScan(phy),
            due,
            duration_usec: scanner.params.window_usec,
            channel: scanner.next_channel(),
            phy,
            access_address: ADV_ACCESS_ADDRESS,
            crc_init: ADV_CRC_INIT,
            priority: None,
        };
        match self.platform.scheduler().schedule_next_available(op) {
            Ok(id) => {
                scanner.op = Some(id);
                scanner.next_due = due.wrapping_add(scanner.params.interval_usec);
            }
            Err(err) => {
                scanner.op = None;
                warn!(%phy, error = %err, "Scan window not scheduled");
            }
        }
    }

    pub(crate) fn on_scan_window_end(&mut self, phy: Phy) {
        let Some(scanner) = self.scanner_mut(phy) else {
            return;
        };
        scanner.op = None;
        match scanner.state {
            ExtScanState::Discovering => self.schedule_scan_window(phy),
            ExtScanState::ShuttingDown | ExtScanState::Resetting => {
                self.execute_ext_scan(phy, ExtScanEvent::Terminate)
            }
            ExtScanState::Disabled => {}
        }
    }

    /// A periodic reception took the window's slot.
    pub(crate) fn on_scan_window_displaced(&mut self, phy: Phy) {
        debug!(%phy, "Scan window displaced");
        self.on_scan_window_end(phy);
    }

    pub(crate) fn on_adv_received(&mut self, phy: Phy, rx: RxPacket) {
        let Some(scanner) = self.scanners.iter_mut().find(|scanner| scanner.phy == phy) else {
            return;
        };
        if scanner.state != ExtScanState::Discovering {
            return;
        }
        let pdu = match ExtAdvPdu::decode(rx.pdu) {
            Ok(pdu) => pdu,
            Err(err) => {
                debug!(%phy, error = %err, "Undecodable advertisement dropped");
                return;
            }
        };

        if let Some(addr) = pdu.adv_addr {
            scanner.assembly.begin(ReportOrigin {
                addr,
                addr_type: pdu.addr_type(),
                sid: pdu.sid(),
                rssi: rx.rssi,
                periodic_interval: pdu.sync_info.map(|info| info.interval),
            });
        }
        let report = if scanner.assembly.is_open() {
            scanner.assembly.append(&pdu.adv_data);
            if pdu.aux_ptr.is_none() {
                scanner.assembly.finish(phy)
            } else {
                None
            }
        } else {
            None
        };
        if let Some(report) = report {
            observability::record_ext_adv_report(phy);
            self.platform.host().deliver(report);
        }

        if let (Some(sync_info), Some(addr), Some(sid)) = (pdu.sync_info, pdu.adv_addr, pdu.sid()) {
            self.offer_sync_candidate(SyncCandidate {
                identity: AdvIdentity::new(addr, pdu.addr_type(), sid),
                sync_info,
                aux_start: rx.start,
                phy,
            });
        }
    }

    /// Whether the baseband may send a scan request for the advertisement just received.
    pub fn scan_request_permitted(&mut self, phy: Phy) -> bool {
        match self.scanner_mut(phy) {
            Some(scanner) if scanner.state == ExtScanState::Discovering && scanner.params.active => {
                scanner.backoff.should_request()
            }
            _ => false,
        }
    }

    /// Host scan parameters; only accepted while every scanner is idle.
    #[instrument(level = "debug", name = "set_ext_scan_params", skip(self))]
    pub fn set_ext_scan_params(
        &mut self,
        phys: &[(Phy, ScanPhyParams)],
    ) -> Result<(), LinkLayerError> {
        if self
            .scanners
            .iter()
            .any(|scanner| scanner.state != ExtScanState::Disabled)
        {
            return Err(LinkLayerError::disallowed("scanning enabled"));
        }
        if phys.is_empty() {
            return Err(LinkLayerError::invalid_param("phys", "no scanning PHY selected"));
        }
        for (phy, params) in phys {
            if self.scanner(*phy).is_none() {
                return Err(LinkLayerError::invalid_param("phys", format!("{phy} cannot scan")));
            }
            params
                .validate()
                .map_err(|err| LinkLayerError::invalid_param("scan_params", err.to_string()))?;
            if params.window_usec > params.interval_usec {
                return Err(LinkLayerError::invalid_param(
                    "scan_window",
                    "window exceeds interval",
                ));
            }
        }

        for scanner in &mut self.scanners {
            match phys.iter().find(|(phy, _)| *phy == scanner.phy) {
                Some((_, params)) => {
                    scanner.params = *params;
                    scanner.configured = true;
                }
                None => scanner.configured = false,
            }
        }
        Ok(())
    }

    /// Host scan enable.
    ///
    /// `duration_10ms` of zero scans until disabled; a non-zero
    /// `period_1_28s` restarts the scan every period.
    #[instrument(level = "debug", name = "set_ext_scan_enable", skip(self))]
    pub fn set_ext_scan_enable(
        &mut self,
        enable: bool,
        duration_10ms: u16,
        period_1_28s: u16,
    ) -> Result<(), LinkLayerError> {
        if enable {
            let duration_usec = duration_10ms as u32 * 10_000;
            let period_usec = period_1_28s as u32 * 1_280_000;
            if period_usec > 0 && (duration_usec == 0 || duration_usec >= period_usec) {
                return Err(LinkLayerError::invalid_param(
                    "period",
                    "period requires a shorter non-zero duration",
                ));
            }
            let phys: Vec<Phy> = self
                .scanners
                .iter_mut()
                .filter(|scanner| scanner.configured)
                .map(|scanner| {
                    scanner.duration_usec = duration_usec;
                    scanner.period_usec = period_usec;
                    scanner.phy
                })
                .collect();
            for phy in phys {
                self.execute_ext_scan(phy, ExtScanEvent::EnableDiscovery);
            }
        } else {
            let phys: Vec<Phy> = self.scanners.iter().map(|scanner| scanner.phy).collect();
            for phy in phys {
                self.platform.timers().disarm(TimerId::ScanPeriod(phy));
                self.execute_ext_scan(phy, ExtScanEvent::DisableDiscovery);
            }
        }
        self.drain();
        Ok(())
    }
}
