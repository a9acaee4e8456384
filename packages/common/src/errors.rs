// 通用错误类型定义

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 通用错误类型
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "error_type", content = "details")]
pub enum CommonError {
    /// 验证错误
    #[error("验证错误: {message}")]
    Validation { message: String },

    /// 资源未找到
    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    Configuration { message: String },

    /// 内部错误
    #[error("内部错误: {message}")]
    Internal { message: String },
}

impl CommonError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
