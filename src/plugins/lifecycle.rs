// 插件生命周期管理
// 编排运行时、沙箱管理器、注册表与事件总线，实现安装/启动/停止/升级/卸载/重启

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::{AppConfig, HealthCheckConfig, LifecycleConfig};
use crate::errors::{LifecycleOperation, PluginHostError};
use crate::plugins::context::OperationContext;
use crate::plugins::events::{EventBus, PluginEventHandler, PluginEventType};
use crate::plugins::instance::{
    HealthCheck, PluginDescriptor, PluginInstance, PluginState, PluginStats,
};
use crate::plugins::registry::PluginRegistry;
use crate::plugins::runtime::{PluginRuntime, ResourceLimits, SandboxManager};

/// 插件生命周期管理器
///
/// 每个生命周期操作在整个执行期间持有注册表写锁（包括对运行时和沙箱管理器的调用），
/// 所有插件的操作因此串行执行。事件在锁内按程序顺序入队，由独立的分发循环投递。
pub struct PluginLifecycleManager {
    runtime: Arc<dyn PluginRuntime>,
    sandboxes: Arc<dyn SandboxManager>,
    registry: PluginRegistry,
    events: EventBus,
    config: LifecycleConfig,
    default_limits: ResourceLimits,
    health_defaults: HealthCheckConfig,
}

/// 一次健康检查结果的处理结果
#[derive(Debug, Clone)]
pub enum HealthResultOutcome {
    /// 插件已不在运行，结果被丢弃
    Skipped,
    /// 结果已记录，未触发重启
    Recorded(HealthCheck),
    /// 达到失败阈值并已成功重启
    Restarted(PluginInstance),
}

impl PluginLifecycleManager {
    /// 创建新的生命周期管理器，必须在 tokio 运行时内调用
    pub fn new(
        runtime: Arc<dyn PluginRuntime>,
        sandboxes: Arc<dyn SandboxManager>,
        config: &AppConfig,
    ) -> Self {
        Self {
            runtime,
            sandboxes,
            registry: PluginRegistry::new(),
            events: EventBus::new(config.lifecycle.event_channel_capacity),
            config: config.lifecycle.clone(),
            default_limits: config.sandbox.default_limits.clone(),
            health_defaults: config.health_check.clone(),
        }
    }

    /// 使用默认配置创建
    pub fn with_defaults(runtime: Arc<dyn PluginRuntime>, sandboxes: Arc<dyn SandboxManager>) -> Self {
        Self::new(runtime, sandboxes, &AppConfig::default())
    }

    /// 注册事件处理器
    pub async fn add_event_handler(&self, handler: Arc<dyn PluginEventHandler>) {
        self.events.add_handler(handler).await;
    }

    /// 因通道满或已关闭而丢弃的事件数
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped_events()
    }

    /// 安装插件
    ///
    /// 运行时安装失败时实例仍以 Error 状态注册，便于排查。
    pub async fn install_plugin(
        &self,
        ctx: &OperationContext,
        plugin: PluginDescriptor,
    ) -> Result<PluginInstance, PluginHostError> {
        let span = ctx.span(LifecycleOperation::Install.as_str());
        self.install_inner(ctx, plugin).instrument(span).await
    }

    async fn install_inner(
        &self,
        ctx: &OperationContext,
        plugin: PluginDescriptor,
    ) -> Result<PluginInstance, PluginHostError> {
        let mut plugins = self.registry.write().await;

        if plugins.contains_key(&plugin.id) {
            return Err(PluginHostError::already_exists(&plugin.id, LifecycleOperation::Install));
        }

        let mut instance =
            PluginInstance::from_descriptor(&plugin, self.health_defaults.to_health_check());

        if let Err(e) = self.runtime.install(ctx, &plugin).await {
            let err = PluginHostError::runtime(&plugin.id, LifecycleOperation::Install, &e);
            instance.fail(format!("{:#}", e));
            plugins.insert(plugin.id.clone(), instance);
            self.emit_failure(&plugin.id, PluginEventType::InstallFailed, &err, None);
            error!(plugin_id = %plugin.id, "插件安装失败: {}", err);
            return Err(err);
        }

        plugins.insert(plugin.id.clone(), instance.clone());
        self.events.emit(&plugin.id, PluginEventType::Installed, None);

        info!(
            plugin_id = %plugin.id,
            plugin_name = %plugin.name,
            version = %plugin.version,
            "插件安装成功"
        );

        Ok(instance)
    }

    /// 启动插件
    pub async fn start_plugin(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
    ) -> Result<PluginInstance, PluginHostError> {
        let span = ctx.span(LifecycleOperation::Start.as_str());
        self.start_inner(ctx, plugin_id).instrument(span).await
    }

    async fn start_inner(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
    ) -> Result<PluginInstance, PluginHostError> {
        let mut plugins = self.registry.write().await;
        let instance = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::Start))?;

        self.start_locked(ctx, instance).await?;
        Ok(instance.clone())
    }

    /// 停止插件
    pub async fn stop_plugin(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
    ) -> Result<PluginInstance, PluginHostError> {
        let span = ctx.span(LifecycleOperation::Stop.as_str());
        self.stop_inner(ctx, plugin_id).instrument(span).await
    }

    async fn stop_inner(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
    ) -> Result<PluginInstance, PluginHostError> {
        let mut plugins = self.registry.write().await;
        let instance = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::Stop))?;

        self.stop_locked(ctx, instance).await?;
        Ok(instance.clone())
    }

    /// 升级插件
    ///
    /// 运行中的插件先完整停止；升级成功后处于 Installed 状态，不会自动重启。
    pub async fn upgrade_plugin(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
        new_version: &str,
    ) -> Result<PluginInstance, PluginHostError> {
        let span = ctx.span(LifecycleOperation::Upgrade.as_str());
        self.upgrade_inner(ctx, plugin_id, new_version)
            .instrument(span)
            .await
    }

    async fn upgrade_inner(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
        new_version: &str,
    ) -> Result<PluginInstance, PluginHostError> {
        let mut plugins = self.registry.write().await;
        let instance = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::Upgrade))?;

        self.ensure_stopped(ctx, instance, LifecycleOperation::Upgrade)
            .await?;

        let previous_version = instance.version.clone();
        instance.state = PluginState::Upgrading;
        self.events.emit(
            plugin_id,
            PluginEventType::Upgrading,
            Some(json!({ "new_version": new_version })),
        );

        if let Err(e) = self.runtime.upgrade(ctx, plugin_id, new_version).await {
            let err = PluginHostError::runtime(plugin_id, LifecycleOperation::Upgrade, &e);
            instance.fail(format!("{:#}", e));
            self.emit_failure(
                plugin_id,
                PluginEventType::UpgradeFailed,
                &err,
                Some(("new_version", new_version)),
            );
            error!(plugin_id = %plugin_id, "插件升级失败: {}", err);
            return Err(err);
        }

        instance.version = new_version.to_string();
        instance.state = PluginState::Installed;
        instance.last_error = None;
        self.events.emit(
            plugin_id,
            PluginEventType::Upgraded,
            Some(json!({ "new_version": new_version, "previous_version": previous_version })),
        );

        info!(
            plugin_id = %plugin_id,
            plugin_name = %instance.name,
            previous_version = %previous_version,
            new_version = %new_version,
            "插件升级成功"
        );

        Ok(instance.clone())
    }

    /// 卸载插件
    ///
    /// 运行中的插件先完整停止，停止失败则中止卸载；运行时卸载失败时实例以 Error 状态保留。
    pub async fn uninstall_plugin(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
    ) -> Result<(), PluginHostError> {
        let span = ctx.span(LifecycleOperation::Uninstall.as_str());
        self.uninstall_inner(ctx, plugin_id).instrument(span).await
    }

    async fn uninstall_inner(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
    ) -> Result<(), PluginHostError> {
        let mut plugins = self.registry.write().await;
        let instance = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::Uninstall))?;

        self.ensure_stopped(ctx, instance, LifecycleOperation::Uninstall)
            .await?;

        if let Err(e) = self.runtime.uninstall(ctx, plugin_id).await {
            let err = PluginHostError::runtime(plugin_id, LifecycleOperation::Uninstall, &e);
            instance.fail(format!("{:#}", e));
            self.emit_failure(plugin_id, PluginEventType::UninstallFailed, &err, None);
            error!(plugin_id = %plugin_id, "插件卸载失败: {}", err);
            return Err(err);
        }

        let plugin_name = instance.name.clone();
        plugins.remove(plugin_id);
        self.events.emit(plugin_id, PluginEventType::Uninstalled, None);

        info!(plugin_id = %plugin_id, plugin_name = %plugin_name, "插件卸载成功");

        Ok(())
    }

    /// 重启插件
    ///
    /// 重启计数在尝试停止/启动之前递增，无论后续结果如何都不会回退。
    pub async fn restart_plugin(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
    ) -> Result<PluginInstance, PluginHostError> {
        let span = ctx.span(LifecycleOperation::Restart.as_str());
        self.restart_inner(ctx, plugin_id).instrument(span).await
    }

    async fn restart_inner(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
    ) -> Result<PluginInstance, PluginHostError> {
        let mut plugins = self.registry.write().await;
        let instance = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::Restart))?;

        self.restart_locked(ctx, instance).await?;
        Ok(instance.clone())
    }

    /// 整体替换插件配置，不要求插件处于停止状态
    pub async fn update_plugin_config(
        &self,
        plugin_id: &str,
        config: HashMap<String, serde_json::Value>,
    ) -> Result<PluginInstance, PluginHostError> {
        let mut plugins = self.registry.write().await;
        let instance = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::UpdateConfig))?;

        let data = json!({ "config": &config });
        instance.config = config;
        self.events
            .emit(plugin_id, PluginEventType::ConfigUpdated, Some(data));

        info!(plugin_id = %plugin_id, "插件配置已更新");

        Ok(instance.clone())
    }

    /// 替换插件的健康检查配置块
    pub async fn update_health_check(
        &self,
        plugin_id: &str,
        health_check: HealthCheck,
    ) -> Result<PluginInstance, PluginHostError> {
        let mut plugins = self.registry.write().await;
        let instance = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::HealthCheck))?;

        instance.health_check = health_check;
        Ok(instance.clone())
    }

    /// 记录一次健康检查结果
    ///
    /// 成功时清零连续失败计数；失败时递增并发出 health_check_failed 事件。
    /// 不检查插件状态也不触发重启，周期检查请使用 `apply_health_result`。
    pub async fn record_health_check(
        &self,
        plugin_id: &str,
        healthy: bool,
        detail: Option<String>,
    ) -> Result<HealthCheck, PluginHostError> {
        let mut plugins = self.registry.write().await;
        let instance = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::HealthCheck))?;

        Ok(self.record_locked(instance, healthy, detail))
    }

    /// 在单次写锁内应用健康检查结果
    ///
    /// 检查期间插件可能已被停止、升级或卸载，此时结果作废并返回 `Skipped`；
    /// 仍在运行且连续失败达到阈值时就地重启。
    pub async fn apply_health_result(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
        healthy: bool,
        detail: Option<String>,
    ) -> Result<HealthResultOutcome, PluginHostError> {
        let span = ctx.span(LifecycleOperation::HealthCheck.as_str());
        self.apply_health_result_inner(ctx, plugin_id, healthy, detail)
            .instrument(span)
            .await
    }

    async fn apply_health_result_inner(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
        healthy: bool,
        detail: Option<String>,
    ) -> Result<HealthResultOutcome, PluginHostError> {
        let mut plugins = self.registry.write().await;
        let instance = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::HealthCheck))?;

        if !instance.is_running() {
            debug!(plugin_id = %plugin_id, state = %instance.state, "插件已不在运行，丢弃检查结果");
            return Ok(HealthResultOutcome::Skipped);
        }

        let check = self.record_locked(instance, healthy, detail);
        if healthy || !check.threshold_reached() {
            return Ok(HealthResultOutcome::Recorded(check));
        }

        warn!(
            plugin_id = %plugin_id,
            failure_count = check.failure_count,
            "连续健康检查失败达到阈值，重启插件"
        );
        self.restart_locked(ctx, instance).await?;
        Ok(HealthResultOutcome::Restarted(instance.clone()))
    }

    /// 获取插件实例快照
    pub async fn get_plugin_instance(&self, plugin_id: &str) -> Result<PluginInstance, PluginHostError> {
        self.registry
            .snapshot(plugin_id)
            .await
            .ok_or_else(|| PluginHostError::not_found(plugin_id, LifecycleOperation::Get))
    }

    /// 列出所有插件快照，按插件 ID 排序
    pub async fn list_plugins(&self) -> Vec<PluginInstance> {
        self.registry.snapshot_all().await
    }

    /// 插件统计
    pub async fn stats(&self) -> PluginStats {
        PluginStats::from_instances(&self.list_plugins().await)
    }

    /// 关闭生命周期管理器
    ///
    /// 尽力停止所有运行中的插件（单个失败只记录日志），随后关闭事件通道并等待
    /// 分发循环排空。上下文只约束排空等待；没有截止时间时使用配置的默认超时。
    pub async fn shutdown(&self, ctx: &OperationContext) -> Result<(), PluginHostError> {
        info!(request_id = %ctx.request_id, "关闭插件生命周期管理器");

        let stop_ctx = ctx.detached();
        let running: Vec<String> = self
            .list_plugins()
            .await
            .into_iter()
            .filter(PluginInstance::is_running)
            .map(|instance| instance.id)
            .collect();

        for plugin_id in running {
            if let Err(e) = self.stop_plugin(&stop_ctx, &plugin_id).await {
                error!(plugin_id = %plugin_id, "关闭时停止插件失败: {}", e);
            }
        }

        self.events.close();

        let drain_ctx = match ctx.deadline() {
            Some(_) => ctx.clone(),
            None => ctx
                .clone()
                .with_timeout(Duration::from_secs(self.config.shutdown_drain_timeout_seconds)),
        };

        tokio::select! {
            _ = self.events.join() => {
                info!("事件分发循环已排空，生命周期管理器已关闭");
                Ok(())
            }
            _ = drain_ctx.done() => {
                warn!("等待事件排空超时");
                Err(PluginHostError::timeout("shutdown"))
            }
        }
    }

    /// 在持有写锁的前提下启动实例
    async fn start_locked(
        &self,
        ctx: &OperationContext,
        instance: &mut PluginInstance,
    ) -> Result<(), PluginHostError> {
        let plugin_id = instance.id.clone();

        if instance.is_running() {
            return Err(PluginHostError::already_running(&plugin_id, LifecycleOperation::Start));
        }

        // 上次停止失败遗留的沙箱
        self.release_sandbox(ctx, instance).await;

        instance.state = PluginState::Starting;
        self.events.emit(&plugin_id, PluginEventType::Starting, None);

        let limits = instance
            .resource_limits
            .clone()
            .unwrap_or_else(|| self.default_limits.clone());

        let sandbox = match self.sandboxes.create_sandbox(ctx, &plugin_id, &limits).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                let err = PluginHostError::sandbox(&plugin_id, LifecycleOperation::Start, &e);
                instance.fail(format!("{:#}", e));
                self.emit_failure(&plugin_id, PluginEventType::StartFailed, &err, None);
                error!(plugin_id = %plugin_id, "创建沙箱失败: {}", err);
                return Err(err);
            }
        };
        instance.sandbox = Some(sandbox);

        if let Err(e) = self.runtime.start(ctx, &plugin_id).await {
            let err = PluginHostError::runtime(&plugin_id, LifecycleOperation::Start, &e);
            if self.config.destroy_sandbox_on_start_failure {
                self.release_sandbox(ctx, instance).await;
            }
            instance.fail(format!("{:#}", e));
            self.emit_failure(&plugin_id, PluginEventType::StartFailed, &err, None);
            error!(plugin_id = %plugin_id, "插件启动失败: {}", err);
            return Err(err);
        }

        instance.state = PluginState::Running;
        instance.start_time = Some(Utc::now());
        instance.last_error = None;
        self.events.emit(&plugin_id, PluginEventType::Started, None);

        info!(plugin_id = %plugin_id, plugin_name = %instance.name, "插件启动成功");

        Ok(())
    }

    /// 在持有写锁的前提下停止实例
    async fn stop_locked(
        &self,
        ctx: &OperationContext,
        instance: &mut PluginInstance,
    ) -> Result<(), PluginHostError> {
        let plugin_id = instance.id.clone();

        if !instance.is_running() {
            return Err(PluginHostError::not_running(&plugin_id, LifecycleOperation::Stop));
        }

        instance.state = PluginState::Stopping;
        self.events.emit(&plugin_id, PluginEventType::Stopping, None);

        if let Err(e) = self.runtime.stop(ctx, &plugin_id).await {
            let err = PluginHostError::runtime(&plugin_id, LifecycleOperation::Stop, &e);
            instance.fail(format!("{:#}", e));
            self.emit_failure(&plugin_id, PluginEventType::StopFailed, &err, None);
            error!(plugin_id = %plugin_id, "插件停止失败: {}", err);
            return Err(err);
        }

        self.release_sandbox(ctx, instance).await;

        instance.state = PluginState::Stopped;
        instance.stop_time = Some(Utc::now());
        instance.last_error = None;
        self.events.emit(&plugin_id, PluginEventType::Stopped, None);

        info!(plugin_id = %plugin_id, plugin_name = %instance.name, "插件停止成功");

        Ok(())
    }

    /// 在持有写锁的前提下重启实例
    ///
    /// 重启计数在尝试停止/启动之前递增，无论后续结果如何都不会回退。
    async fn restart_locked(
        &self,
        ctx: &OperationContext,
        instance: &mut PluginInstance,
    ) -> Result<(), PluginHostError> {
        let plugin_id = instance.id.clone();
        instance.restart_count = instance.restart_count.saturating_add(1);

        if instance.is_running() {
            self.stop_locked(ctx, instance).await.map_err(|e| {
                PluginHostError::step_failed(
                    &plugin_id,
                    LifecycleOperation::Restart,
                    LifecycleOperation::Stop,
                    e,
                )
            })?;
        }

        self.start_locked(ctx, instance).await.map_err(|e| {
            PluginHostError::step_failed(
                &plugin_id,
                LifecycleOperation::Restart,
                LifecycleOperation::Start,
                e,
            )
        })?;

        // 健康检查触发的重启成功后重新计数
        instance.health_check.failure_count = 0;

        self.events.emit(
            &plugin_id,
            PluginEventType::Restarted,
            Some(json!({ "restart_count": instance.restart_count })),
        );

        info!(
            plugin_id = %plugin_id,
            restart_count = instance.restart_count,
            "插件重启成功"
        );

        Ok(())
    }

    /// 写入一次健康检查结果，失败时发出 health_check_failed 事件
    fn record_locked(
        &self,
        instance: &mut PluginInstance,
        healthy: bool,
        detail: Option<String>,
    ) -> HealthCheck {
        let check = &mut instance.health_check;
        check.last_check = Some(Utc::now());

        if healthy {
            check.failure_count = 0;
        } else {
            check.failure_count = check.failure_count.saturating_add(1);
            warn!(
                plugin_id = %instance.id,
                failure_count = check.failure_count,
                max_failures = check.max_failures,
                "插件健康检查失败: {}",
                detail.as_deref().unwrap_or("unknown")
            );
            self.events.emit(
                &instance.id,
                PluginEventType::HealthCheckFailed,
                Some(json!({ "failure_count": check.failure_count, "error": detail })),
            );
        }

        check.clone()
    }

    /// 升级/卸载前的停止步骤：运行中则完整停止，否则释放遗留沙箱
    async fn ensure_stopped(
        &self,
        ctx: &OperationContext,
        instance: &mut PluginInstance,
        operation: LifecycleOperation,
    ) -> Result<(), PluginHostError> {
        if instance.is_running() {
            let plugin_id = instance.id.clone();
            self.stop_locked(ctx, instance).await.map_err(|e| {
                PluginHostError::step_failed(plugin_id, operation, LifecycleOperation::Stop, e)
            })
        } else {
            self.release_sandbox(ctx, instance).await;
            Ok(())
        }
    }

    /// 销毁实例持有的沙箱，错误只记录日志
    async fn release_sandbox(&self, ctx: &OperationContext, instance: &mut PluginInstance) {
        if let Some(sandbox) = instance.sandbox.take() {
            if let Err(e) = self.sandboxes.destroy_sandbox(ctx, &instance.id).await {
                error!(
                    plugin_id = %instance.id,
                    sandbox_id = %sandbox.sandbox_id(),
                    "销毁沙箱失败: {:#}",
                    e
                );
            }
        }
    }

    fn emit_failure(
        &self,
        plugin_id: &str,
        event_type: PluginEventType,
        err: &PluginHostError,
        extra: Option<(&str, &str)>,
    ) {
        let mut data = json!({ "error": err.to_string() });
        if let (Some((key, value)), Some(map)) = (extra, data.as_object_mut()) {
            map.insert(key.to_string(), json!(value));
        }
        self.events.emit(plugin_id, event_type, Some(data));
    }
}
