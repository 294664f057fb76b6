//! 测试用的脚本化考试服务
//!
//! `ScriptedApi` 在内存里模拟考试服务端：记录每一次保存/交卷/日志请求，
//! 并可以按需注入失败或延迟。单元测试和 `tests/` 下的集成测试共用。

use crate::clients::{ExamApi, SubmitReceipt};
use crate::error::{ApiError, AppResult};
use crate::models::{ActivityEntry, AnswerSet, QuestionRef, SessionSnapshot, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// 构造一个作答中的会话快照
pub fn session_snapshot(
    start_time: DateTime<Utc>,
    minutes: u64,
    question_ids: &[&str],
) -> SessionSnapshot {
    SessionSnapshot {
        exam_id: Some("1".to_string()),
        exam_title: Some("模拟考试".to_string()),
        duration: Some(minutes),
        start_time: Some(start_time),
        questions: question_ids
            .iter()
            .map(|id| QuestionRef {
                id: id.to_string(),
                question_type: Some("single_choice".to_string()),
                raw: serde_json::Map::new(),
            })
            .collect(),
        saved_answers: None,
        status: SessionStatus::InProgress,
    }
}

#[derive(Default)]
struct Script {
    snapshot: Option<SessionSnapshot>,
    server_time: Option<DateTime<Utc>>,
    server_time_delay: Option<Duration>,
    saves: Vec<AnswerSet>,
    failing_saves: usize,
    save_delay: Option<Duration>,
    submits: Vec<bool>,
    failing_submits: usize,
    submit_delay: Option<Duration>,
    receipt: Option<SubmitReceipt>,
    events: Vec<ActivityEntry>,
}

/// 内存中的考试服务
#[derive(Default)]
pub struct ScriptedApi {
    script: Mutex<Script>,
}

impl ScriptedApi {
    pub fn new(snapshot: SessionSnapshot) -> Self {
        let api = Self::default();
        api.lock().snapshot = Some(snapshot);
        api
    }

    /// `None` 表示时间接口不可用
    pub fn set_server_time(&self, time: Option<DateTime<Utc>>) {
        self.lock().server_time = time;
    }

    /// 时间接口在返回前挂起的时长
    pub fn set_server_time_delay(&self, delay: Option<Duration>) {
        self.lock().server_time_delay = delay;
    }

    /// 接下来 `n` 次保存返回 503
    pub fn fail_next_saves(&self, n: usize) {
        self.lock().failing_saves = n;
    }

    pub fn set_save_delay(&self, delay: Option<Duration>) {
        self.lock().save_delay = delay;
    }

    /// 接下来 `n` 次交卷返回 503
    pub fn fail_next_submits(&self, n: usize) {
        self.lock().failing_submits = n;
    }

    pub fn set_submit_delay(&self, delay: Option<Duration>) {
        self.lock().submit_delay = delay;
    }

    /// 成功送达的保存请求（按顺序）
    pub fn saves(&self) -> Vec<AnswerSet> {
        self.lock().saves.clone()
    }

    pub fn save_count(&self) -> usize {
        self.lock().saves.len()
    }

    /// 每次交卷请求的 isTimeout 参数，包括失败的请求
    pub fn submits(&self) -> Vec<bool> {
        self.lock().submits.clone()
    }

    pub fn logged(&self) -> Vec<ActivityEntry> {
        self.lock().events.clone()
    }

    /// 服务端当前保存的答案
    pub fn stored_answers(&self) -> AnswerSet {
        self.lock()
            .snapshot
            .as_ref()
            .and_then(|s| s.saved_answers.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn unavailable(endpoint: &str) -> ApiError {
    ApiError::BadResponse {
        endpoint: endpoint.to_string(),
        status: 503,
        message: Some("service unavailable".to_string()),
    }
}

#[async_trait]
impl ExamApi for ScriptedApi {
    async fn get_session(&self, result_id: &str) -> AppResult<SessionSnapshot> {
        self.lock().snapshot.clone().ok_or_else(|| {
            ApiError::BadResponse {
                endpoint: format!("/api/assessment-results/{}", result_id),
                status: 404,
                message: Some("not found".to_string()),
            }
            .into()
        })
    }

    async fn save_answers(&self, _result_id: &str, answers: &AnswerSet) -> AppResult<()> {
        let delay = self.lock().save_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.lock();
        if script.failing_saves > 0 {
            script.failing_saves -= 1;
            return Err(unavailable("save-answers").into());
        }
        script.saves.push(answers.clone());
        if let Some(snapshot) = script.snapshot.as_mut() {
            snapshot.saved_answers = Some(answers.clone());
        }
        Ok(())
    }

    async fn submit(&self, result_id: &str, is_timeout: bool) -> AppResult<SubmitReceipt> {
        let delay = {
            let mut script = self.lock();
            script.submits.push(is_timeout);
            script.submit_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.lock();
        if script.failing_submits > 0 {
            script.failing_submits -= 1;
            return Err(unavailable("submit").into());
        }
        if let Some(previous) = &script.receipt {
            return Ok(SubmitReceipt {
                already_submitted: true,
                ..previous.clone()
            });
        }

        let receipt = SubmitReceipt {
            result_id: result_id.to_string(),
            score: None,
            passed: None,
            already_submitted: false,
            status: SessionStatus::Submitted,
        };
        script.receipt = Some(receipt.clone());
        if let Some(snapshot) = script.snapshot.as_mut() {
            snapshot.status = SessionStatus::Submitted;
        }
        Ok(receipt)
    }

    async fn server_time(&self) -> AppResult<DateTime<Utc>> {
        let delay = self.lock().server_time_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock()
            .server_time
            .ok_or_else(|| unavailable("server-time").into())
    }

    async fn log_event(&self, _result_id: &str, entry: &ActivityEntry) -> AppResult<()> {
        self.lock().events.push(entry.clone());
        Ok(())
    }
}
