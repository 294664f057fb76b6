//! 考试会话 - 编排层
//!
//! ## 职责
//!
//! 一次作答的完整生命周期：打开会话、装配各个服务、启动后台任务、
//! 把交卷触发路由给交卷状态机，最后确定性地关停。
//!
//! ## 后台任务
//!
//! - 保存 worker（防抖 + 定时同步）
//! - 时钟校准
//! - 倒计时
//! - 空闲检测
//! - 交卷触发路由
//!
//! 所有任务共用一个 `Shutdown`，交卷成功或会话关闭时一起退出。

use crate::clients::{bounded, SharedApi};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{LocalCache, SharedClock, Shutdown, ShutdownListener};
use crate::models::{
    ActivityKind, ActivityLog, AnswerSet, AnswerValue, SaveRecord, SaveStatus, Session,
    SessionCtx, SubmitTrigger,
};
use crate::services::{
    ActivityLogger, ClockReconciler, Countdown, IntegrityMonitor, Notice, Notifier,
    SaveCoordinator, SaveOutcome, SaveTimings,
};
use crate::utils::logging::log_session_start;
use crate::workflow::{SubmissionMachine, SubmissionPhase, SubmitConfirmation, SubmitReport};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 一次进行中的考试
pub struct ExamSession {
    ctx: SessionCtx,
    session: Arc<Mutex<Session>>,
    saver: SaveCoordinator,
    countdown: Countdown,
    monitor: IntegrityMonitor,
    submission: SubmissionMachine,
    activity: ActivityLogger,
    notices: mpsc::UnboundedReceiver<Notice>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl ExamSession {
    /// 打开（或恢复）会话
    ///
    /// 服务端已保存的答案与本地缓存合并，缓存中较新的编辑优先。
    /// 会话数据不完整或已经结束时返回错误，调用方应退出答题流程。
    pub async fn open(
        config: &Config,
        api: SharedApi,
        cache: LocalCache,
        clock: SharedClock,
    ) -> AppResult<Self> {
        let result_id = config.require_result_id()?.to_string();
        let timeout = config.request_timeout();

        let snapshot = bounded(timeout, "get-session", api.get_session(&result_id)).await?;
        let (session, saved) = Session::from_snapshot(&result_id, snapshot)?;
        if !session.is_open() {
            cache.clear(&result_id);
            return Err(AppError::SessionClosed {
                status: session.status,
            });
        }

        let ctx = SessionCtx::new(&result_id, &session.exam_title);
        let recovered = cache.get(&result_id);
        let mut answers = saved.clone();
        answers.merge_from(&recovered);
        if !recovered.is_empty() {
            info!("{} 从本地缓存恢复了 {} 题答案", ctx, recovered.len());
        }
        cache.put(&result_id, &answers);

        let (notifier, notices) = Notifier::channel();
        let activity = ActivityLogger::new(&result_id, api.clone(), clock.clone(), timeout);
        let shutdown = Shutdown::new();

        let reconciler = ClockReconciler::new(
            ctx.clone(),
            session.start_time,
            session.duration_seconds,
            clock,
            api.clone(),
            timeout,
            notifier.clone(),
        );

        let (saver, save_task) = SaveCoordinator::spawn(
            ctx.clone(),
            answers,
            SaveRecord::baseline(saved),
            api.clone(),
            cache.clone(),
            activity.clone(),
            notifier.clone(),
            SaveTimings {
                debounce: config.debounce(),
                periodic: config.periodic_sync(),
                request_timeout: timeout,
            },
            shutdown.listener(),
        );

        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let countdown = Countdown::new(
            ctx.clone(),
            reconciler.clone(),
            &config.time_warnings,
            activity.clone(),
            notifier.clone(),
            triggers.clone(),
            shutdown.listener(),
        );
        let monitor = IntegrityMonitor::new(ctx.clone(), activity.clone(), notifier.clone());

        let question_count = session.questions.len();
        let session = Arc::new(Mutex::new(session));
        let submission = SubmissionMachine::new(
            ctx.clone(),
            session.clone(),
            saver.clone(),
            cache,
            api,
            timeout,
            activity.clone(),
            notifier,
            shutdown.clone(),
        );

        let tasks = vec![
            save_task,
            tokio::spawn(reconciler.run(config.clock_sync(), shutdown.listener())),
            tokio::spawn(monitor.clone().watch_idle(
                config.idle_warning(),
                config.idle_submit(),
                triggers,
                shutdown.listener(),
            )),
            tokio::spawn(route_triggers(
                ctx.clone(),
                submission.clone(),
                trigger_rx,
                shutdown.listener(),
            )),
        ];

        let remaining = countdown.remaining();
        activity.record(
            ActivityKind::ExamStart,
            json!({
                "question_count": question_count,
                "remaining": remaining,
                "recovered": recovered.len(),
            }),
        );
        log_session_start(&result_id, &ctx.exam_title, question_count, remaining);
        countdown.start();

        Ok(Self {
            ctx,
            session,
            saver,
            countdown,
            monitor,
            submission,
            activity,
            notices,
            shutdown,
            tasks,
        })
    }

    pub fn ctx(&self) -> &SessionCtx {
        &self.ctx
    }

    /// 作答一题
    pub fn answer(
        &self,
        question_id: impl Into<String>,
        value: impl Into<AnswerValue>,
    ) -> AppResult<()> {
        if self.submission.phase().is_submitted() {
            return Err(AppError::SessionClosed {
                status: self.session().status,
            });
        }
        self.saver.edit(question_id, value)
    }

    /// 手动保存
    pub async fn save_now(&self) -> SaveOutcome {
        self.saver.save_now().await
    }

    /// 手动交卷前的确认信息
    pub fn confirm_submit(&self) -> SubmitConfirmation {
        self.submission.confirmation()
    }

    /// 考生确认后交卷
    pub async fn submit(&self) -> AppResult<SubmitReport> {
        self.submission.submit(SubmitTrigger::Manual).await
    }

    /// 等到会话交卷成功（包括自动交卷）
    pub async fn wait_submitted(&self) -> AppResult<SubmitReport> {
        let mut rx = self.submission.subscribe();
        let phase = match rx.wait_for(SubmissionPhase::is_submitted).await {
            Ok(phase) => phase.clone(),
            Err(_) => return Err(AppError::EngineStopped),
        };
        match phase {
            SubmissionPhase::Submitted(report) => Ok(report),
            _ => Err(AppError::EngineStopped),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.countdown.remaining()
    }

    pub fn subscribe_remaining(&self) -> watch::Receiver<u64> {
        self.countdown.subscribe()
    }

    /// 宿主环境上报切屏、剪贴板、交互事件的入口
    pub fn integrity(&self) -> &IntegrityMonitor {
        &self.monitor
    }

    pub fn phase(&self) -> SubmissionPhase {
        self.submission.phase()
    }

    pub fn session(&self) -> Session {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn answers(&self) -> AnswerSet {
        self.saver.answers()
    }

    pub fn save_status(&self) -> SaveStatus {
        self.saver.status()
    }

    pub fn save_record(&self) -> SaveRecord {
        self.saver.record()
    }

    pub fn activity_log(&self) -> ActivityLog {
        self.activity.snapshot()
    }

    /// 取出目前积压的提示
    pub fn take_notices(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }

    /// 等待下一条提示
    pub async fn next_notice(&mut self) -> Option<Notice> {
        self.notices.recv().await
    }

    /// 离开会话：未交卷时先刷新答案，然后关停所有后台任务
    pub async fn close(mut self) -> SaveOutcome {
        let outcome = if self.submission.phase().is_submitted() {
            SaveOutcome::Clean
        } else {
            self.saver.flush().await
        };
        self.saver.shutdown();
        self.shutdown.trigger();
        self.countdown.stop();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("{} 后台任务异常退出: {}", self.ctx, e);
                }
            }
        }
        debug!("{} 会话已关闭", self.ctx);
        outcome
    }
}

impl Drop for ExamSession {
    fn drop(&mut self) {
        self.shutdown.trigger();
        self.countdown.stop();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// 把倒计时与空闲检测发出的交卷触发交给交卷状态机
async fn route_triggers(
    ctx: SessionCtx,
    submission: SubmissionMachine,
    mut triggers: mpsc::UnboundedReceiver<SubmitTrigger>,
    mut shutdown: ShutdownListener,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.stopped() => break,
            trigger = triggers.recv() => {
                let Some(trigger) = trigger else { break };
                if let Err(e) = submission.submit(trigger).await {
                    error!("{} 自动交卷失败 ({}): {}", ctx, trigger, e);
                }
            }
        }
    }
    debug!("{} 交卷路由任务已停止", ctx);
}
