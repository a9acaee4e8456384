// 错误响应格式化

use chrono::{DateTime, Utc};
use plugin_host_common::ApiResponse;
use serde::{Deserialize, Serialize};

use crate::errors::PluginHostError;
use crate::plugins::OperationContext;

/// 错误响应结构
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
}

/// 错误详情
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub status: u16,
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// 从 PluginHostError 创建错误响应
    pub fn from_error(error: &PluginHostError) -> Self {
        let details = match error {
            PluginHostError::StepFailed {
                plugin_id,
                operation,
                step,
                ..
            } => Some(serde_json::json!({
                "plugin_id": plugin_id,
                "operation": operation,
                "step": step,
                "cause": error.root_cause().to_string(),
            })),
            PluginHostError::Timeout { operation } => {
                Some(serde_json::json!({ "operation": operation }))
            }
            PluginHostError::Configuration { .. } => None,
            _ => match (error.plugin_id(), error.operation()) {
                (Some(plugin_id), Some(operation)) => Some(serde_json::json!({
                    "plugin_id": plugin_id,
                    "operation": operation,
                })),
                _ => None,
            },
        };

        Self {
            success: false,
            error: ErrorDetail {
                code: error.error_code().to_string(),
                message: error.to_string(),
                status: error.status_code(),
                details,
            },
            timestamp: Utc::now(),
            request_id: None,
            trace_id: None,
        }
    }

    /// 设置请求 ID
    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// 设置追踪 ID
    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// 附带操作上下文中的请求 ID 与追踪 ID
    pub fn with_context(self, ctx: &OperationContext) -> Self {
        self.with_request_id(ctx.request_id.clone())
            .with_trace_id(ctx.trace_id.clone())
    }

    /// 转换为通用 API 响应信封
    pub fn into_api_response<T>(self) -> ApiResponse<T> {
        let request_id = self.request_id.clone();
        let body = serde_json::to_value(&self.error).unwrap_or(serde_json::Value::Null);
        let response = ApiResponse::error(body);
        match request_id {
            Some(id) => response.with_request_id(id),
            None => response,
        }
    }
}
