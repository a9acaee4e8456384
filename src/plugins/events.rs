// 插件生命周期事件
// 有界事件通道 + 单一分发循环，满时丢弃新事件（至多一次、尽力而为）

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::plugins::context::OperationContext;

/// 插件事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PluginEventType {
    Installed,
    InstallFailed,
    Starting,
    Started,
    StartFailed,
    Stopping,
    Stopped,
    StopFailed,
    Upgrading,
    Upgraded,
    UpgradeFailed,
    Uninstalled,
    UninstallFailed,
    Restarted,
    ConfigUpdated,
    HealthCheckFailed,
}

impl PluginEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::InstallFailed => "install_failed",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::StartFailed => "start_failed",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::StopFailed => "stop_failed",
            Self::Upgrading => "upgrading",
            Self::Upgraded => "upgraded",
            Self::UpgradeFailed => "upgrade_failed",
            Self::Uninstalled => "uninstalled",
            Self::UninstallFailed => "uninstall_failed",
            Self::Restarted => "restarted",
            Self::ConfigUpdated => "config_updated",
            Self::HealthCheckFailed => "health_check_failed",
        }
    }

    /// 是否为失败事件
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::InstallFailed
                | Self::StartFailed
                | Self::StopFailed
                | Self::UpgradeFailed
                | Self::UninstallFailed
                | Self::HealthCheckFailed
        )
    }
}

impl std::fmt::Display for PluginEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 插件事件，创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEvent {
    /// 事件 ID
    pub event_id: Uuid,
    /// 插件 ID
    pub plugin_id: String,
    /// 事件类型
    pub event_type: PluginEventType,
    /// 事件时间，由发出方填写
    pub timestamp: DateTime<Utc>,
    /// 事件数据
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// 插件事件处理器
#[async_trait]
pub trait PluginEventHandler: Send + Sync {
    /// 处理器名称，用于日志
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// 处理事件；返回的错误只会被记录
    async fn handle_event(&self, ctx: &OperationContext, event: &PluginEvent) -> anyhow::Result<()>;
}

type HandlerList = Arc<RwLock<Vec<Arc<dyn PluginEventHandler>>>>;

/// 事件总线
pub struct EventBus {
    sender: std::sync::RwLock<Option<mpsc::Sender<PluginEvent>>>,
    handlers: HandlerList,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl EventBus {
    /// 创建事件总线并启动分发循环，必须在 tokio 运行时内调用
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handlers: HandlerList = Arc::new(RwLock::new(Vec::new()));

        let dispatcher = tokio::spawn(Self::dispatch_loop(receiver, handlers.clone()));

        Self {
            sender: std::sync::RwLock::new(Some(sender)),
            handlers,
            dispatcher: Mutex::new(Some(dispatcher)),
            dropped: AtomicU64::new(0),
        }
    }

    /// 注册事件处理器，按注册顺序投递
    pub async fn add_handler(&self, handler: Arc<dyn PluginEventHandler>) {
        debug!("注册事件处理器: {}", handler.name());
        self.handlers.write().await.push(handler);
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// 发出事件
    ///
    /// 从不阻塞：通道已满或已关闭时丢弃事件并记录警告，返回是否入队成功。
    pub fn emit(
        &self,
        plugin_id: &str,
        event_type: PluginEventType,
        data: Option<serde_json::Value>,
    ) -> bool {
        let event = PluginEvent {
            event_id: Uuid::new_v4(),
            plugin_id: plugin_id.to_string(),
            event_type,
            timestamp: Utc::now(),
            data,
        };

        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let result = match sender.as_ref() {
            Some(sender) => sender.try_send(event),
            None => Err(TrySendError::Closed(event)),
        };

        match result {
            Ok(()) => {
                debug!(plugin_id = %plugin_id, event_type = %event_type, "插件事件已入队");
                true
            }
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    plugin_id = %event.plugin_id,
                    event_type = %event.event_type,
                    "事件通道已满，丢弃事件"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    plugin_id = %event.plugin_id,
                    event_type = %event.event_type,
                    "事件通道已关闭，丢弃事件"
                );
                false
            }
        }
    }

    /// 被丢弃的事件数量
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 关闭事件通道，分发循环排空已入队事件后退出
    pub fn close(&self) {
        let mut sender = self.sender.write().unwrap_or_else(PoisonError::into_inner);
        if sender.take().is_some() {
            debug!("事件通道已关闭");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// 等待分发循环退出，重复调用立即返回
    pub async fn join(&self) {
        let handle = self.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("事件分发循环异常退出: {}", e);
            }
        }
    }

    /// 事件分发循环
    async fn dispatch_loop(mut receiver: mpsc::Receiver<PluginEvent>, handlers: HandlerList) {
        debug!("事件分发循环已启动");

        while let Some(event) = receiver.recv().await {
            let handlers = handlers.read().await.clone();
            for handler in &handlers {
                Self::deliver(handler.as_ref(), &event).await;
            }
        }

        debug!("事件分发循环已停止");
    }

    /// 向单个处理器投递事件，隔离其错误和 panic
    async fn deliver(handler: &dyn PluginEventHandler, event: &PluginEvent) {
        let ctx = OperationContext::background();
        let outcome = AssertUnwindSafe(handler.handle_event(&ctx, event))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    handler = handler.name(),
                    plugin_id = %event.plugin_id,
                    event_type = %event.event_type,
                    "事件处理失败: {:#}",
                    e
                );
            }
            Err(_) => {
                error!(
                    handler = handler.name(),
                    plugin_id = %event.plugin_id,
                    event_type = %event.event_type,
                    "事件处理器 panic"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<PluginEvent>>,
    }

    #[async_trait]
    impl PluginEventHandler for Recorder {
        async fn handle_event(&self, _ctx: &OperationContext, event: &PluginEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl PluginEventHandler for Failing {
        async fn handle_event(&self, _ctx: &OperationContext, _event: &PluginEvent) -> anyhow::Result<()> {
            anyhow::bail!("handler failure")
        }
    }

    struct Panicking;

    #[async_trait]
    impl PluginEventHandler for Panicking {
        async fn handle_event(&self, _ctx: &OperationContext, _event: &PluginEvent) -> anyhow::Result<()> {
            panic!("handler panic")
        }
    }

    struct Blocking {
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl PluginEventHandler for Blocking {
        async fn handle_event(&self, _ctx: &OperationContext, _event: &PluginEvent) -> anyhow::Result<()> {
            self.release.notified().await;
            Ok(())
        }
    }

    #[test]
    fn test_event_type_tags() {
        assert_eq!(PluginEventType::StartFailed.as_str(), "start_failed");
        assert_eq!(
            serde_json::to_string(&PluginEventType::ConfigUpdated).unwrap(),
            "\"config_updated\""
        );
        assert!(PluginEventType::UninstallFailed.is_failure());
        assert!(!PluginEventType::Started.is_failure());
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let bus = EventBus::new(16);
        let recorder = Arc::new(Recorder::default());
        bus.add_handler(recorder.clone()).await;

        assert!(bus.emit("p1", PluginEventType::Starting, None));
        assert!(bus.emit("p1", PluginEventType::Started, None));

        bus.close();
        bus.join().await;

        let events = recorder.events.lock().unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![PluginEventType::Starting, PluginEventType::Started]);
        assert!(events[0].timestamp <= events[1].timestamp);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new(16);
        let recorder = Arc::new(Recorder::default());
        bus.add_handler(Arc::new(Failing)).await;
        bus.add_handler(Arc::new(Panicking)).await;
        bus.add_handler(recorder.clone()).await;
        assert_eq!(bus.handler_count().await, 3);

        bus.emit("p1", PluginEventType::Installed, None);
        bus.emit("p1", PluginEventType::Uninstalled, None);

        bus.close();
        bus.join().await;

        assert_eq!(recorder.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let bus = EventBus::new(1);
        let blocking = Arc::new(Blocking {
            release: tokio::sync::Notify::new(),
        });
        bus.add_handler(blocking.clone()).await;

        // 第一个事件被分发循环取走并阻塞在处理器中
        assert!(bus.emit("p1", PluginEventType::Starting, None));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(bus.emit("p1", PluginEventType::Started, None));
        assert!(!bus.emit("p1", PluginEventType::Stopping, None));
        assert_eq!(bus.dropped_events(), 1);

        blocking.release.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        blocking.release.notify_one();

        bus.close();
        bus.join().await;
    }

    #[tokio::test]
    async fn test_emit_after_close_is_dropped() {
        let bus = EventBus::new(4);
        bus.close();
        assert!(bus.is_closed());
        assert!(!bus.emit("p1", PluginEventType::Installed, None));
        assert_eq!(bus.dropped_events(), 1);

        bus.join().await;
        bus.join().await;
    }
}
