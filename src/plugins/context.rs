// 操作上下文
// 调用方提供的上下文，随生命周期操作转发给运行时、沙箱管理器和事件处理器

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 操作上下文
///
/// 管理器本身不对生命周期操作施加超时，截止时间和取消信号仅由协作者自行遵守；
/// `PluginLifecycleManager::shutdown` 只在等待事件排空时使用它。
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub request_id: String,
    pub trace_id: String,
    pub start_time: DateTime<Utc>,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl OperationContext {
    /// 创建新的操作上下文
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            trace_id: Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// 没有截止时间、不会被取消的后台上下文
    pub fn background() -> Self {
        Self::new()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// 保留请求标识，去掉截止时间与取消信号
    pub fn detached(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            trace_id: self.trace_id.clone(),
            start_time: Utc::now(),
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 距截止时间的剩余时长
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// 截止时间到达或被取消时完成
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = self.cancellation.cancelled() => {}
                }
            }
            None => self.cancellation.cancelled().await,
        }
    }

    /// 携带请求标识的追踪 span
    pub fn span(&self, operation: &str) -> tracing::Span {
        tracing::info_span!(
            "plugin_operation",
            operation = operation,
            request_id = %self.request_id,
            trace_id = %self.trace_id,
        )
    }

    /// 获取持续时间
    pub fn duration(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = OperationContext::new();
        assert!(!ctx.request_id.is_empty());
        assert!(!ctx.trace_id.is_empty());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_context_builders() {
        let ctx = OperationContext::new()
            .with_request_id("req-1")
            .with_trace_id("trace-1");
        assert_eq!(ctx.request_id, "req-1");
        assert_eq!(ctx.trace_id, "trace-1");
    }

    #[tokio::test]
    async fn test_timeout_expires() {
        let ctx = OperationContext::new().with_timeout(Duration::from_millis(20));
        assert!(ctx.remaining().is_some());
        ctx.done().await;
        assert!(ctx.is_expired());

        let detached = ctx.detached();
        assert!(!detached.is_expired());
        assert!(!detached.is_cancelled());
        assert_eq!(detached.request_id, ctx.request_id);
    }

    #[tokio::test]
    async fn test_cancellation_completes_done() {
        let token = CancellationToken::new();
        let ctx = OperationContext::new().with_cancellation(token.clone());
        token.cancel();
        ctx.done().await;
        assert!(ctx.is_cancelled());
    }
}
