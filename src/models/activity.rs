//! 考试行为日志
//!
//! 只追加、只用于审计；除了本会话内的计数外不参与任何控制决策。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 行为类型，序列化名称与服务端 exam-logs 表一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    ExamStart,
    VisibilityChange,
    InactivityWarning,
    #[serde(rename = "EXAM_AUTO_SUBMIT_INACTIVITY")]
    InactivitySubmit,
    ManualSave,
    SaveFailure,
    ClipboardBlocked,
    TimeWarning,
    ExamSubmit,
    SubmitFailure,
}

/// 一条行为记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
    pub detail: JsonValue,
}

/// 按发生顺序排列的行为日志
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Vec<ActivityEntry>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: ActivityEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ActivityEntry] {
        &self.entries
    }

    pub fn count(&self, kind: ActivityKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
