//! 保存记录
//!
//! 记录"发出去的"与"服务端确认的"答案快照之间的差异。

use crate::models::AnswerSet;

/// 保存状态，供界面展示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Success,
    Error,
}

/// 保存记录
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveRecord {
    pub last_attempted: Option<AnswerSet>,
    pub last_confirmed: Option<AnswerSet>,
    /// 仅当服务端确认了 `last_attempted` 这份快照时为 true
    pub confirmed: bool,
    /// 最近一次保存失败且可以重试
    pub retryable_error: bool,
}

impl SaveRecord {
    /// 以服务端已保存的答案为起点
    pub fn baseline(server_answers: AnswerSet) -> Self {
        Self {
            last_attempted: Some(server_answers.clone()),
            last_confirmed: Some(server_answers),
            confirmed: true,
            retryable_error: false,
        }
    }

    /// 当前答案与最近确认的快照是否不同
    pub fn is_dirty(&self, current: &AnswerSet) -> bool {
        match &self.last_confirmed {
            Some(confirmed) => confirmed != current,
            None => !current.is_empty(),
        }
    }

    pub fn begin(&mut self, snapshot: AnswerSet) {
        self.last_attempted = Some(snapshot);
        self.confirmed = false;
    }

    pub fn acknowledge(&mut self, snapshot: AnswerSet) {
        self.confirmed = self.last_attempted.as_ref() == Some(&snapshot);
        self.last_confirmed = Some(snapshot);
        self.retryable_error = false;
    }

    pub fn fail(&mut self, retryable: bool) {
        self.confirmed = false;
        self.retryable_error = retryable;
    }
}
