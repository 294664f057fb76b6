//! 错误类型
//!
//! 引擎内部的每个组件都在自己的边界上捕获异步错误，
//! 这里定义的类型只在需要向上汇报时使用（打开会话、手动保存、提交）。

use crate::models::SessionStatus;
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// API 调用错误
    #[error("API错误: {0}")]
    Api(#[from] ApiError),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 服务端返回的会话数据不完整（例如没有题目）
    #[error("会话数据异常: {0}")]
    MalformedSession(String),

    /// 会话已结束，不能再作答
    #[error("会话已结束 (状态: {status:?})")]
    SessionClosed { status: SessionStatus },

    /// 正在交卷，编辑已锁定
    #[error("正在交卷，暂时不能修改答案")]
    SubmissionInProgress,

    /// 状态只能单向流转
    #[error("非法的状态流转: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// 交卷失败，答案和本地缓存都已保留，可以重试
    #[error("交卷失败: {message}")]
    SubmitFailed { message: String, retryable: bool },

    /// 会话内部任务已经停止
    #[error("会话任务已停止")]
    EngineStopped,

    /// 文件错误
    #[error("文件错误: {0}")]
    Io(#[from] std::io::Error),
}

/// API 调用错误
#[derive(Debug, Error)]
pub enum ApiError {
    /// 网络请求失败
    #[error("API请求失败 ({endpoint}): {source}")]
    RequestFailed {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// 请求超时
    #[error("API请求超时 ({endpoint}), 超过 {seconds} 秒")]
    Timeout { endpoint: String, seconds: u64 },

    /// API 返回错误响应
    #[error("API返回错误响应 ({endpoint}): status={status}, message={message:?}")]
    BadResponse {
        endpoint: String,
        status: u16,
        message: Option<String>,
    },

    /// API 返回空结果
    #[error("API返回空结果: {endpoint}")]
    EmptyResponse { endpoint: String },

    /// JSON 解析失败
    #[error("JSON解析失败 ({endpoint}): {source}")]
    JsonParseFailed {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// 是否值得在下一次触发时重试
    ///
    /// 网络失败、超时与 5xx 都算临时错误；4xx 说明请求本身被拒绝。
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RequestFailed { .. } | ApiError::Timeout { .. } => true,
            ApiError::BadResponse { status, .. } => *status >= 500 || *status == 429,
            ApiError::EmptyResponse { .. } => true,
            ApiError::JsonParseFailed { .. } => false,
        }
    }

    /// 服务端返回的 HTTP 状态码（如果有）
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::BadResponse { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量不存在
    #[error("环境变量 {var_name} 不存在")]
    EnvVarNotFound { var_name: String },

    /// 配置文件读取失败
    #[error("无法读取配置文件 {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败
    #[error("配置文件解析失败 {path}: {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl AppError {
    /// 是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Api(e) => e.is_retryable(),
            AppError::Io(_) => true,
            AppError::SubmitFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
