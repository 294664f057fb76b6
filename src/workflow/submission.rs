//! 交卷状态机 - 流程层
//!
//! 核心职责：定义"交一次卷"的完整流程
//!
//! 流程顺序：
//! 1. 锁定编辑，刷新未确认的答案（失败也继续，评分读取的是服务端已存的答案）
//! 2. 调用交卷接口（isTimeout 取决于触发来源）
//! 3. 成功：会话置为 submitted，清本地缓存，关停所有后台任务
//! 4. 失败：恢复编辑，保留缓存，等待再次交卷
//!
//! 同一时刻只有一个调用者真正执行流程，其余调用者等待并拿到同一个结果。

use crate::clients::{bounded, SharedApi, SubmitReceipt};
use crate::error::{AppError, AppResult};
use crate::infrastructure::{LocalCache, Shutdown};
use crate::models::{ActivityKind, Session, SessionCtx, SessionStatus, SubmitTrigger};
use crate::services::{ActivityLogger, Notice, Notifier, SaveCoordinator, SaveOutcome};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 交卷阶段
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionPhase {
    InProgress,
    FlushingAnswers,
    Submitting,
    Submitted(SubmitReport),
    SubmitFailed { message: String, retryable: bool },
}

impl SubmissionPhase {
    /// 已有调用者在执行交卷流程
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SubmissionPhase::FlushingAnswers | SubmissionPhase::Submitting
        )
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, SubmissionPhase::Submitted(_))
    }

    fn is_settled(&self) -> bool {
        matches!(
            self,
            SubmissionPhase::Submitted(_) | SubmissionPhase::SubmitFailed { .. }
        )
    }
}

/// 一次成功交卷的结果
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReport {
    pub receipt: SubmitReceipt,
    pub trigger: SubmitTrigger,
    /// 交卷前刷新答案的结果
    pub flush: SaveOutcome,
}

/// 手动交卷前给考生看的确认信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitConfirmation {
    pub unanswered: usize,
    pub total: usize,
}

impl SubmitConfirmation {
    pub fn prompt(&self) -> String {
        if self.unanswered == 0 {
            format!("共 {} 题已全部作答，确认交卷？", self.total)
        } else {
            format!(
                "还有 {} 道题未作答（共 {} 题），确认交卷？",
                self.unanswered, self.total
            )
        }
    }
}

/// 交卷状态机
#[derive(Clone)]
pub struct SubmissionMachine {
    inner: Arc<MachineInner>,
}

struct MachineInner {
    ctx: SessionCtx,
    session: Arc<Mutex<Session>>,
    saver: SaveCoordinator,
    cache: LocalCache,
    api: SharedApi,
    timeout: Duration,
    activity: ActivityLogger,
    notifier: Notifier,
    shutdown: Shutdown,
    phase: watch::Sender<SubmissionPhase>,
}

impl SubmissionMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: SessionCtx,
        session: Arc<Mutex<Session>>,
        saver: SaveCoordinator,
        cache: LocalCache,
        api: SharedApi,
        timeout: Duration,
        activity: ActivityLogger,
        notifier: Notifier,
        shutdown: Shutdown,
    ) -> Self {
        let (phase, _) = watch::channel(SubmissionPhase::InProgress);
        Self {
            inner: Arc::new(MachineInner {
                ctx,
                session,
                saver,
                cache,
                api,
                timeout,
                activity,
                notifier,
                shutdown,
                phase,
            }),
        }
    }

    pub fn phase(&self) -> SubmissionPhase {
        self.inner.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SubmissionPhase> {
        self.inner.phase.subscribe()
    }

    /// 未作答题数与总题数
    pub fn confirmation(&self) -> SubmitConfirmation {
        let answers = self.inner.saver.answers();
        let session = self.lock_session();
        SubmitConfirmation {
            unanswered: answers.unanswered_count(session.question_ids()),
            total: session.questions.len(),
        }
    }

    /// 交卷
    ///
    /// 已交卷时直接返回已有结果；正在交卷时等待那一次的结果。
    /// 上一次失败后再调用会从刷新答案重新开始。
    ///
    /// 流程在独立任务里执行，调用方被取消（超时、abort）不会中断交卷。
    pub async fn submit(&self, trigger: SubmitTrigger) -> AppResult<SubmitReport> {
        let mut claimed = false;
        self.inner.phase.send_if_modified(|phase| match phase {
            SubmissionPhase::InProgress | SubmissionPhase::SubmitFailed { .. } => {
                *phase = SubmissionPhase::FlushingAnswers;
                claimed = true;
                true
            }
            _ => false,
        });

        if !claimed {
            info!("{} 交卷已在进行或已完成 ({})", self.inner.ctx, trigger);
            return self.wait_outcome().await;
        }

        info!("{} 📤 开始交卷 ({})", self.inner.ctx, trigger);
        self.inner.saver.lock_edits();
        let claim = Claim {
            machine: self.clone(),
        };
        tokio::spawn(self.clone().run(trigger, claim));

        self.wait_outcome().await
    }

    async fn run(self, trigger: SubmitTrigger, _claim: Claim) {
        let flush = self.inner.saver.flush().await;
        if let SaveOutcome::Failed { message, .. } = &flush {
            warn!(
                "{} ⚠️ 交卷前保存答案失败，继续交卷: {}",
                self.inner.ctx, message
            );
        }

        self.inner.phase.send_replace(SubmissionPhase::Submitting);
        let session_id = self.inner.ctx.session_id.clone();
        let submitted = bounded(
            self.inner.timeout,
            "submit",
            self.inner.api.submit(&session_id, trigger.is_timeout()),
        )
        .await;

        match submitted {
            Ok(receipt) => self.finish(trigger, flush, receipt),
            Err(e) => self.fail(trigger, e),
        }
    }

    /// 等待正在进行的交卷结束
    pub async fn wait_outcome(&self) -> AppResult<SubmitReport> {
        let mut rx = self.inner.phase.subscribe();
        let phase = match rx.wait_for(SubmissionPhase::is_settled).await {
            Ok(phase) => phase.clone(),
            Err(_) => return Err(AppError::EngineStopped),
        };
        match phase {
            SubmissionPhase::Submitted(report) => Ok(report),
            SubmissionPhase::SubmitFailed { message, retryable } => {
                Err(AppError::SubmitFailed { message, retryable })
            }
            _ => Err(AppError::EngineStopped),
        }
    }

    fn finish(&self, trigger: SubmitTrigger, flush: SaveOutcome, receipt: SubmitReceipt) {
        let ctx = &self.inner.ctx;
        {
            let mut session = self.lock_session();
            let next = match receipt.status {
                SessionStatus::Graded => SessionStatus::Graded,
                _ => SessionStatus::Submitted,
            };
            if let Err(e) = session.transition(next) {
                warn!("{} 会话状态未更新: {}", ctx, e);
            }
        }
        self.inner.cache.clear(&ctx.session_id);

        if receipt.already_submitted {
            info!("{} ✓ 服务端显示此前已交卷", ctx);
        } else {
            info!("{} ✓ 交卷成功 ({})", ctx, trigger);
        }
        self.inner.activity.record(
            ActivityKind::ExamSubmit,
            json!({
                "trigger": trigger,
                "is_timeout": trigger.is_timeout(),
                "already_submitted": receipt.already_submitted,
                "flush": &flush,
            }),
        );

        let report = SubmitReport {
            receipt: receipt.clone(),
            trigger,
            flush,
        };
        self.inner
            .phase
            .send_replace(SubmissionPhase::Submitted(report));
        self.inner.shutdown.trigger();
        self.inner
            .notifier
            .notify(Notice::Submitted { trigger, receipt });
    }

    fn fail(&self, trigger: SubmitTrigger, e: AppError) {
        let message = e.to_string();
        let retryable = e.is_retryable();
        error!("{} ❌ 交卷失败 ({}): {}", self.inner.ctx, trigger, message);

        self.inner.saver.unlock_edits();
        self.inner.activity.record(
            ActivityKind::SubmitFailure,
            json!({ "trigger": trigger, "error": &message }),
        );
        self.inner.notifier.notify(Notice::SubmitFailed {
            message: message.clone(),
        });
        self.inner
            .phase
            .send_replace(SubmissionPhase::SubmitFailed { message, retryable });
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 交卷流程的占用凭证
///
/// 流程任务没走到 `finish`/`fail` 就被丢弃（panic、运行时关闭）时，
/// 把阶段退回可重试的失败状态并恢复编辑。
struct Claim {
    machine: SubmissionMachine,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let inner = &self.machine.inner;
        let abandoned = inner.phase.send_if_modified(|phase| {
            if !phase.is_busy() {
                return false;
            }
            *phase = SubmissionPhase::SubmitFailed {
                message: "交卷流程被中断".to_string(),
                retryable: true,
            };
            true
        });
        if abandoned {
            warn!("{} ⚠️ 交卷流程被中断，可以重新交卷", inner.ctx);
            inner.saver.unlock_edits();
        }
    }
}
