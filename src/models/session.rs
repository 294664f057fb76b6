//! 考试会话
//!
//! `SessionSnapshot` 是"获取会话状态"接口的原始返回；
//! `Session` 是校验后由引擎独占持有的会话。

use crate::error::{AppError, AppResult};
use crate::models::AnswerSet;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// 会话状态，只能单向流转
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Submitted,
    Graded,
    Expired,
}

impl SessionStatus {
    /// 合法的流转：in_progress → submitted → graded，过期只能从作答中进入
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (InProgress, Submitted)
                | (InProgress, Graded)
                | (InProgress, Expired)
                | (Submitted, Graded)
                | (Expired, Graded)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Submitted => "submitted",
            SessionStatus::Graded => "graded",
            SessionStatus::Expired => "expired",
        }
    }
}

/// 交卷触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    /// 考生主动交卷（需要确认）
    Manual,
    /// 倒计时归零
    Timeout,
    /// 长时间无操作
    Inactivity,
}

impl SubmitTrigger {
    pub fn is_timeout(self) -> bool {
        self == SubmitTrigger::Timeout
    }
}

impl std::fmt::Display for SubmitTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SubmitTrigger::Manual => "手动交卷",
            SubmitTrigger::Timeout => "时间到",
            SubmitTrigger::Inactivity => "长时间无操作",
        };
        f.write_str(label)
    }
}

/// 题目引用，渲染所需的其余字段原样保留在 `raw` 中
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuestionRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub question_type: Option<String>,
    #[serde(flatten)]
    pub raw: serde_json::Map<String, JsonValue>,
}

/// "获取会话状态"接口返回的数据
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub exam_id: Option<String>,
    #[serde(default)]
    pub exam_title: Option<String>,
    /// 考试时长（分钟）
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub questions: Vec<QuestionRef>,
    #[serde(default)]
    pub saved_answers: Option<AnswerSet>,
    pub status: SessionStatus,
}

/// 一次考试作答
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub exam_definition_id: Option<String>,
    pub exam_title: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub status: SessionStatus,
    pub questions: Vec<QuestionRef>,
}

impl Session {
    /// 校验快照并拆出会话与服务端已保存的答案
    ///
    /// 没有题目、缺少开始时间或时长的快照视为致命错误，调用方应退出答题流程。
    pub fn from_snapshot(id: &str, snapshot: SessionSnapshot) -> AppResult<(Session, AnswerSet)> {
        if snapshot.questions.is_empty() {
            return Err(AppError::MalformedSession(format!("会话 {} 没有题目", id)));
        }
        let start_time = snapshot
            .start_time
            .ok_or_else(|| AppError::MalformedSession(format!("会话 {} 缺少开始时间", id)))?;
        let minutes = snapshot
            .duration
            .filter(|m| *m > 0)
            .ok_or_else(|| AppError::MalformedSession(format!("会话 {} 缺少考试时长", id)))?;

        let session = Session {
            id: id.to_string(),
            exam_definition_id: snapshot.exam_id,
            exam_title: snapshot.exam_title.unwrap_or_default(),
            start_time,
            duration_seconds: minutes * 60,
            status: snapshot.status,
            questions: snapshot.questions,
        };
        Ok((session, snapshot.saved_answers.unwrap_or_default()))
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    /// 考试截止时间（服务端时钟）
    pub fn deadline(&self) -> DateTime<Utc> {
        self.start_time + Duration::seconds(self.duration_seconds as i64)
    }

    pub fn question_ids(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(|q| q.id.as_str())
    }

    /// 推进会话状态，拒绝回退
    pub fn transition(&mut self, next: SessionStatus) -> AppResult<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

// 题目 ID 既可能是数字也可能是 temp_ 前缀的字符串，统一成字符串
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("无效的ID: {}", other))),
    }
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => Ok(Some(s)),
        JsonValue::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!("无效的ID: {}", other))),
    }
}
