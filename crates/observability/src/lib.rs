//! # Observability
//!
//! 链路层同步引擎的日志与指标接入。
//!
//! ## 功能
//!
//! - 安装全局 tracing subscriber，默认只放开引擎相关 target
//! - 可选：安装 Prometheus recorder 并注册指标说明
//! - 周期广播同步指标收集与统计
//!
//! 引擎本身只调用 `metrics` / `tracing` 门面；未安装 recorder 或
//! subscriber 时这些调用均为空操作，嵌入式宿主可以完全不初始化本模块。
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{ObservabilityConfig, SyncMetricsAggregator};
//!
//! observability::init_with_config(ObservabilityConfig {
//!     metrics_listen: Some(([127, 0, 0, 1], 9464).into()),
//!     ..Default::default()
//! })?;
//!
//! let mut aggregator = SyncMetricsAggregator::new();
//! for event in host_events {
//!     aggregator.update(&event);
//! }
//! println!("{}", aggregator.summary());
//! ```

pub mod metrics;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use crate::metrics::{
    describe_metrics, record_conflict, record_ext_adv_report, record_missed_event,
    record_periodic_report, record_pool_occupancy, record_sync_established, record_sync_failed,
    record_sync_lost, record_transfer_dropped, MetricsSummary, RunningStats, StatsSummary,
    SyncMetricsAggregator,
};

/// 默认过滤指令：引擎 info，其余 warn
pub const DEFAULT_DIRECTIVES: &str = "warn,sync_engine=info,config_loader=info";

/// 以默认配置初始化（紧凑日志，无指标导出）
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// `RUST_LOG` 未设置时使用的过滤指令
    pub directives: String,
    /// 记录 `#[instrument]` span 的关闭事件（含耗时）
    pub span_timing: bool,
    /// Prometheus 抓取地址 (None = 不安装 recorder)
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            directives: DEFAULT_DIRECTIVES.to_string(),
            span_timing: false,
            metrics_listen: None,
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// 附带当前 span 字段的 JSON
    Json,
    Pretty,
    /// 紧凑单行格式
    #[default]
    Compact,
}

/// 使用自定义配置初始化
///
/// 全局 subscriber 只能安装一次，重复调用返回错误。
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.directives)
            .with_context(|| format!("Invalid log directives '{}'", config.directives))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(&config))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(addr) = config.metrics_listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("Failed to install Prometheus recorder on {addr}"))?;
        describe_metrics();
        tracing::info!(%addr, "Prometheus endpoint listening");
    }

    tracing::debug!(
        log_format = ?config.log_format,
        directives = %config.directives,
        "Observability initialized"
    );
    Ok(())
}

fn fmt_layer<S>(config: &ObservabilityConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let spans = if config.span_timing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(spans)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_span_events(spans).boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_span_events(spans)
            .boxed(),
    }
}
