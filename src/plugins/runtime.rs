// 外部协作者接口
// 插件运行时与沙箱管理器由宿主之外的组件实现，这里只定义调用契约

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plugins::context::OperationContext;
use crate::plugins::instance::PluginDescriptor;

/// 插件运行时
/// 负责实际安装、启动、停止、升级、卸载插件代码。
/// 任何返回的错误都被视为生命周期失败，实例进入 Error 状态。
#[async_trait]
pub trait PluginRuntime: Send + Sync {
    /// 安装插件
    async fn install(&self, ctx: &OperationContext, plugin: &PluginDescriptor) -> anyhow::Result<()>;

    /// 启动插件
    async fn start(&self, ctx: &OperationContext, plugin_id: &str) -> anyhow::Result<()>;

    /// 停止插件
    async fn stop(&self, ctx: &OperationContext, plugin_id: &str) -> anyhow::Result<()>;

    /// 升级插件到新版本
    async fn upgrade(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
        new_version: &str,
    ) -> anyhow::Result<()>;

    /// 卸载插件
    async fn uninstall(&self, ctx: &OperationContext, plugin_id: &str) -> anyhow::Result<()>;
}

/// 沙箱管理器
/// 为每个插件实例创建/销毁隔离执行环境
#[async_trait]
pub trait SandboxManager: Send + Sync {
    /// 创建沙箱
    async fn create_sandbox(
        &self,
        ctx: &OperationContext,
        plugin_id: &str,
        limits: &ResourceLimits,
    ) -> anyhow::Result<SandboxHandle>;

    /// 销毁沙箱
    async fn destroy_sandbox(&self, ctx: &OperationContext, plugin_id: &str) -> anyhow::Result<()>;
}

/// 沙箱句柄，对宿主不透明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    sandbox_id: String,
    plugin_id: String,
    created_at: DateTime<Utc>,
}

impl SandboxHandle {
    pub fn new(sandbox_id: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            plugin_id: plugin_id.into(),
            created_at: Utc::now(),
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// 资源限制
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    /// 最大内存使用（MB）
    pub max_memory_mb: Option<u64>,
    /// 最大 CPU 使用率（百分比）
    pub max_cpu_percent: Option<f32>,
    /// 最大磁盘使用（MB）
    pub max_disk_mb: Option<u64>,
    /// 最大网络带宽（KB/s）
    pub max_network_kbps: Option<u64>,
    /// 最大执行时间（秒）
    pub max_execution_seconds: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: Some(512),
            max_cpu_percent: Some(50.0),
            max_disk_mb: Some(1024),
            max_network_kbps: Some(1024),
            max_execution_seconds: Some(300),
        }
    }
}

impl ResourceLimits {
    /// 不做任何限制
    pub fn unlimited() -> Self {
        Self {
            max_memory_mb: None,
            max_cpu_percent: None,
            max_disk_mb: None,
            max_network_kbps: None,
            max_execution_seconds: None,
        }
    }
}
