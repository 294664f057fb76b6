//! 会话上下文
//!
//! 封装"我正在处理哪一场考试"这一信息，主要用作日志前缀

use std::fmt::Display;

/// 会话上下文
#[derive(Debug, Clone)]
pub struct SessionCtx {
    /// 考核结果 ID（即会话 ID）
    pub session_id: String,

    /// 考试名称（仅用于日志显示）
    pub exam_title: String,
}

impl SessionCtx {
    /// 创建新的会话上下文
    pub fn new(session_id: impl Into<String>, exam_title: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            exam_title: exam_title.into(),
        }
    }
}

impl Display for SessionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[会话 #{}]", self.session_id)
    }
}
