// 通用类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API 响应结构
/// 供外层传输服务（HTTP/gRPC）包装插件实例快照或结构化错误
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    pub fn error(error: serde_json::Value) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(error),
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response() {
        let response = ApiResponse::success("p1".to_string()).with_request_id("req-1".to_string());
        assert!(response.success);
        assert_eq!(response.data.as_deref(), Some("p1"));
        assert_eq!(response.request_id.as_deref(), Some("req-1"));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_error_response() {
        let response: ApiResponse<()> = ApiResponse::error(serde_json::json!({ "code": "NOT_FOUND" }));
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.error.unwrap()["code"], "NOT_FOUND");
    }
}
