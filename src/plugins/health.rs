// 插件健康监视
// 周期性探测运行中的插件，连续失败达到阈值时触发重启

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::PluginHostError;
use crate::plugins::context::OperationContext;
use crate::plugins::instance::PluginInstance;
use crate::plugins::lifecycle::{HealthResultOutcome, PluginLifecycleManager};

/// 扫描间隔下限，`tokio::time::interval` 不接受零间隔
const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(10);

/// 健康探测接口
///
/// 探测方式（HTTP、进程信号等）由宿主实现，返回错误即视为一次失败。
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, ctx: &OperationContext, instance: &PluginInstance) -> anyhow::Result<()>;
}

/// 单轮扫描的结果汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthScanReport {
    pub checked: usize,
    pub failed: usize,
    /// 探测期间已停止或卸载的插件
    pub skipped: usize,
    pub restarted: Vec<String>,
}

/// 健康监视器
pub struct HealthMonitor {
    manager: Arc<PluginLifecycleManager>,
    probe: Arc<dyn HealthProbe>,
    scan_interval: Duration,
    shutdown: CancellationToken,
}

impl HealthMonitor {
    pub fn new(
        manager: Arc<PluginLifecycleManager>,
        probe: Arc<dyn HealthProbe>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            manager,
            probe,
            scan_interval: scan_interval.max(MIN_SCAN_INTERVAL),
            shutdown: CancellationToken::new(),
        }
    }

    /// 启动后台扫描任务
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.run().await })
    }

    /// 通知后台任务退出
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn run(&self) {
        info!("启动插件健康监视，扫描间隔: {:?}", self.scan_interval);

        let mut interval = tokio::time::interval(self.scan_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.run_once().await;
                    debug!(
                        checked = report.checked,
                        failed = report.failed,
                        skipped = report.skipped,
                        restarted = report.restarted.len(),
                        "健康检查扫描完成"
                    );
                }
            }
        }

        info!("插件健康监视已停止");
    }

    /// 执行一轮扫描
    ///
    /// 只探测处于运行状态、启用了健康检查且已到检查时间的插件。
    pub async fn run_once(&self) -> HealthScanReport {
        let now = Utc::now();
        let due: Vec<PluginInstance> = self
            .manager
            .list_plugins()
            .await
            .into_iter()
            .filter(|p| p.is_running() && p.health_check.enabled && p.health_check.is_due(now))
            .collect();

        let mut report = HealthScanReport::default();

        for instance in due {
            report.checked += 1;
            let ctx = OperationContext::new();
            let timeout = Duration::from_secs(instance.health_check.timeout_seconds);

            let outcome = match tokio::time::timeout(timeout, self.probe.check(&ctx, &instance)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err(format!("健康检查超时 ({}s)", timeout.as_secs())),
            };

            let healthy = outcome.is_ok();
            if !healthy {
                report.failed += 1;
            }

            match self
                .manager
                .apply_health_result(&ctx, &instance.id, healthy, outcome.err())
                .await
            {
                Ok(HealthResultOutcome::Skipped) => report.skipped += 1,
                Ok(HealthResultOutcome::Recorded(_)) => {}
                Ok(HealthResultOutcome::Restarted(_)) => report.restarted.push(instance.id.clone()),
                Err(PluginHostError::NotFound { .. }) => {
                    // 探测期间被卸载
                    debug!(plugin_id = %instance.id, "插件已卸载，跳过健康检查结果");
                    report.skipped += 1;
                }
                Err(e) => error!(plugin_id = %instance.id, "健康检查触发的重启失败: {}", e),
            }
        }

        report
    }
}
