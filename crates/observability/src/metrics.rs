//! 周期广播同步指标收集模块
//!
//! 记录同步建立、丢失、冲突仲裁与报告上送等运行指标。

use std::collections::HashMap;

use contracts::{DataStatus, HciStatus, HostEvent, Phy, SyncHandle};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

/// 向已安装的 recorder 注册指标说明
pub fn describe_metrics() {
    describe_counter!("pa_sync_established_total", "Periodic syncs established");
    describe_counter!("pa_sync_lost_total", "Established syncs lost to supervision timeout");
    describe_counter!("pa_sync_failed_total", "Sync establishment attempts that failed");
    describe_counter!("pa_sync_transfer_dropped_total", "Incoming sync transfers dropped");
    describe_counter!("pa_sync_conflicts_total", "Radio scheduling conflicts resolved");
    describe_counter!("pa_sync_periodic_reports_total", "Periodic advertising reports delivered");
    describe_histogram!("pa_sync_periodic_rssi_dbm", "RSSI of received periodic packets");
    describe_counter!("pa_sync_missed_events_total", "Periodic events without a reception");
    describe_gauge!("pa_sync_contexts_in_use", Unit::Count, "Periodic sync contexts allocated");
    describe_gauge!("pa_sync_contexts_capacity", Unit::Count, "Periodic sync context pool size");
    describe_counter!("pa_sync_ext_adv_reports_total", "Extended advertising reports delivered");
}

/// 记录同步建立
///
/// `via` 为 `"scan"` 或 `"transfer"`。
pub fn record_sync_established(via: &str) {
    counter!("pa_sync_established_total", "via" => via.to_string()).increment(1);
}

/// 记录已建立同步的丢失（监督超时）
pub fn record_sync_lost() {
    counter!("pa_sync_lost_total").increment(1);
}

/// 记录同步建立失败
pub fn record_sync_failed(reason: &str) {
    counter!("pa_sync_failed_total", "reason" => reason.to_string()).increment(1);
}

/// 记录被丢弃的 PAST 传输
pub fn record_transfer_dropped(reason: &str) {
    counter!("pa_sync_transfer_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// 记录调度冲突仲裁结果
pub fn record_conflict(winner: &str) {
    counter!("pa_sync_conflicts_total", "winner" => winner.to_string()).increment(1);
}

/// 记录周期广播报告
pub fn record_periodic_report(rssi: i8) {
    counter!("pa_sync_periodic_reports_total").increment(1);
    histogram!("pa_sync_periodic_rssi_dbm").record(rssi as f64);
}

/// 记录错过的周期事件
pub fn record_missed_event() {
    counter!("pa_sync_missed_events_total").increment(1);
}

/// 记录同步上下文池占用
pub fn record_pool_occupancy(used: usize, capacity: usize) {
    gauge!("pa_sync_contexts_in_use").set(used as f64);
    gauge!("pa_sync_contexts_capacity").set(capacity as f64);
}

/// 记录扩展广播报告
pub fn record_ext_adv_report(phy: Phy) {
    counter!("pa_sync_ext_adv_reports_total", "phy" => phy.to_string()).increment(1);
}

/// 主机事件指标聚合器
///
/// 在内存中聚合上送给主机的事件，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct SyncMetricsAggregator {
    /// 直接扫描建立的同步数
    pub established_by_scan: u64,

    /// PAST 建立的同步数
    pub established_by_transfer: u64,

    /// 建立失败次数
    pub establish_failures: u64,

    /// 主机取消的建立次数
    pub cancelled: u64,

    /// 同步丢失次数
    pub sync_lost: u64,

    /// 周期广播报告数
    pub periodic_reports: u64,

    /// 截断的报告数
    pub truncated_reports: u64,

    /// 扩展广播报告数
    pub ext_adv_reports: u64,

    /// 扫描超时次数
    pub scan_timeouts: u64,

    /// 周期广播 RSSI 统计
    pub rssi_stats: RunningStats,

    /// 报告负载长度统计
    pub payload_stats: RunningStats,

    /// 各同步句柄的报告数
    pub reports_per_handle: HashMap<SyncHandle, u64>,
}

impl SyncMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, event: &HostEvent) {
        match event {
            HostEvent::SyncEstablished(report) => match report.status {
                HciStatus::Success => self.established_by_scan += 1,
                HciStatus::OperationCancelledByHost => self.cancelled += 1,
                _ => self.establish_failures += 1,
            },
            HostEvent::SyncTransferReceived(report) => match report.status {
                HciStatus::Success => self.established_by_transfer += 1,
                HciStatus::OperationCancelledByHost => self.cancelled += 1,
                _ => self.establish_failures += 1,
            },
            HostEvent::SyncLost { .. } => self.sync_lost += 1,
            HostEvent::PeriodicAdvReport {
                handle,
                rssi,
                data_status,
                data,
                ..
            } => {
                self.periodic_reports += 1;
                *self.reports_per_handle.entry(*handle).or_insert(0) += 1;
                self.rssi_stats.push(*rssi as f64);
                self.payload_stats.push(data.len() as f64);
                if *data_status == DataStatus::Truncated {
                    self.truncated_reports += 1;
                }
            }
            HostEvent::ExtAdvReport { data_status, .. } => {
                self.ext_adv_reports += 1;
                if *data_status == DataStatus::Truncated {
                    self.truncated_reports += 1;
                }
            }
            HostEvent::ScanTimeout => self.scan_timeouts += 1,
        }
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        let established = self.established_by_scan + self.established_by_transfer;
        let attempts = established + self.establish_failures;
        MetricsSummary {
            established,
            transfers_received: self.established_by_transfer,
            establish_failures: self.establish_failures,
            cancelled: self.cancelled,
            sync_lost: self.sync_lost,
            periodic_reports: self.periodic_reports,
            ext_adv_reports: self.ext_adv_reports,
            scan_timeouts: self.scan_timeouts,
            establish_rate: if attempts > 0 {
                established as f64 / attempts as f64 * 100.0
            } else {
                0.0
            },
            rssi_dbm: StatsSummary::from(&self.rssi_stats),
            payload_len: StatsSummary::from(&self.payload_stats),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub established: u64,
    /// 其中由 PAST 建立的数量
    pub transfers_received: u64,
    pub establish_failures: u64,
    pub cancelled: u64,
    pub sync_lost: u64,
    pub periodic_reports: u64,
    pub ext_adv_reports: u64,
    pub scan_timeouts: u64,
    pub establish_rate: f64,
    pub rssi_dbm: StatsSummary,
    pub payload_len: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Periodic Sync Summary ===")?;
        writeln!(
            f,
            "Established: {} ({:.2}% of attempts)",
            self.established, self.establish_rate
        )?;
        writeln!(f, "Via transfer: {}", self.transfers_received)?;
        writeln!(f, "Failed: {}", self.establish_failures)?;
        writeln!(f, "Cancelled: {}", self.cancelled)?;
        writeln!(f, "Lost: {}", self.sync_lost)?;
        writeln!(f, "Periodic reports: {}", self.periodic_reports)?;
        writeln!(f, "Extended reports: {}", self.ext_adv_reports)?;
        writeln!(f, "Scan timeouts: {}", self.scan_timeouts)?;
        writeln!(f, "RSSI (dBm): {}", self.rssi_dbm)?;
        writeln!(f, "Payload (bytes): {}", self.payload_len)?;
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
