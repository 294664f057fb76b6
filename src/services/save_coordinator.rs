//! 答案保存协调器 - 业务能力层
//!
//! ## 职责
//!
//! 把"防抖保存"、"定时同步"、"手动保存"、"交卷前刷新"四种触发合并成
//! 一条有序的保存请求流。
//!
//! ## 设计
//!
//! - 每个会话一个后台 worker，所有请求经同一个 mpsc 队列进入，worker 是唯一的发送者
//! - worker 在一次保存返回前不会处理下一条命令，因此同一会话同时最多一个请求在途；
//!   在途期间到达的请求在队列里排队，返回后立即处理，既不丢弃也不交错
//! - 每次都发送完整答案集（不是增量），服务端保存接口幂等，重发安全
//! - 失败从不抛给调用方：只把 `confirmed` 置为 false、状态置为 Error，
//!   等下一次触发（防抖/定时/手动）重试

use crate::clients::{bounded, SharedApi};
use crate::error::{AppError, AppResult};
use crate::infrastructure::{LocalCache, ShutdownListener};
use crate::models::{
    ActivityKind, AnswerSet, AnswerValue, SaveRecord, SaveStatus, SessionCtx,
};
use crate::services::activity_logger::ActivityLogger;
use crate::services::notice::{Notice, Notifier};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 保存时序参数
#[derive(Debug, Clone, Copy)]
pub struct SaveTimings {
    /// 最后一次编辑后的静默期
    pub debounce: Duration,
    /// 定时同步间隔
    pub periodic: Duration,
    /// 单次请求超时
    pub request_timeout: Duration,
}

impl Default for SaveTimings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(3),
            periodic: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// 一次保存（或不需要保存）的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SaveOutcome {
    /// 服务端已确认
    Saved,
    /// 没有需要保存的内容，未发请求
    Clean,
    /// 保存失败，已记录，等待下一次触发
    Failed { message: String, retryable: bool },
}

impl SaveOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SaveOutcome::Failed { .. })
    }
}

/// 触发来源，只用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveTrigger {
    Debounce,
    Periodic,
    Manual,
    Flush,
}

impl SaveTrigger {
    fn label(self) -> &'static str {
        match self {
            SaveTrigger::Debounce => "debounce",
            SaveTrigger::Periodic => "periodic",
            SaveTrigger::Manual => "manual",
            SaveTrigger::Flush => "flush",
        }
    }
}

enum Command {
    /// 有新编辑，`at` 是编辑发生的时刻
    Edited { at: Instant },
    Manual(oneshot::Sender<SaveOutcome>),
    Flush(oneshot::Sender<SaveOutcome>),
    /// 处理完排在前面的命令后退出
    Stop,
}

/// 保存协调器（句柄，可克隆）
#[derive(Clone)]
pub struct SaveCoordinator {
    ctx: SessionCtx,
    answers: Arc<Mutex<AnswerSet>>,
    cache: LocalCache,
    tx: mpsc::UnboundedSender<Command>,
    record: watch::Receiver<SaveRecord>,
    status: watch::Receiver<SaveStatus>,
    locked: Arc<AtomicBool>,
}

impl SaveCoordinator {
    /// 启动保存 worker
    ///
    /// # 参数
    /// - `initial`: 打开会话时的答案（服务端答案叠加本地缓存）
    /// - `baseline`: 服务端已确认的保存记录
    ///
    /// 如果 `initial` 与 `baseline` 不一致（本地缓存里有没送达的编辑），
    /// worker 启动后会安排一次防抖保存。
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        ctx: SessionCtx,
        initial: AnswerSet,
        baseline: SaveRecord,
        api: SharedApi,
        cache: LocalCache,
        activity: ActivityLogger,
        notifier: Notifier,
        timings: SaveTimings,
        shutdown: ShutdownListener,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (record_tx, record) = watch::channel(baseline);
        let (status_tx, status) = watch::channel(SaveStatus::Idle);
        let answers = Arc::new(Mutex::new(initial));

        let worker = SaveWorker {
            ctx: ctx.clone(),
            answers: answers.clone(),
            api,
            activity,
            notifier,
            timings,
            rx,
            record_tx,
            status_tx,
            deadline: None,
            shutdown,
        };
        let handle = tokio::spawn(worker.run());

        let coordinator = Self {
            ctx,
            answers,
            cache,
            tx,
            record,
            status,
            locked: Arc::new(AtomicBool::new(false)),
        };
        (coordinator, handle)
    }

    /// 记录一次编辑：先同步写入本地缓存，再通知 worker 安排防抖保存
    pub fn edit(
        &self,
        question_id: impl Into<String>,
        value: impl Into<AnswerValue>,
    ) -> AppResult<()> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(AppError::SubmissionInProgress);
        }

        {
            let mut answers = self.lock_answers();
            answers.upsert(question_id, value);
            self.cache.put(&self.ctx.session_id, &answers);
        }

        self.tx
            .send(Command::Edited { at: Instant::now() })
            .map_err(|_| AppError::EngineStopped)
    }

    /// 手动保存：跳过防抖，立即发送完整答案集并等待结果
    pub async fn save_now(&self) -> SaveOutcome {
        self.request(Command::Manual).await
    }

    /// 交卷前的刷新屏障：取消待发的防抖，有未确认的修改就立刻发送
    pub async fn flush(&self) -> SaveOutcome {
        self.request(Command::Flush).await
    }

    /// 停止保存 worker；已经排队的命令会先处理完
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// 当前答案集的副本
    pub fn answers(&self) -> AnswerSet {
        self.lock_answers().clone()
    }

    pub fn record(&self) -> SaveRecord {
        self.record.borrow().clone()
    }

    pub fn status(&self) -> SaveStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.status.clone()
    }

    /// 交卷开始后拒绝新的编辑
    pub fn lock_edits(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    /// 交卷失败后恢复编辑
    pub fn unlock_edits(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<SaveOutcome>) -> Command,
    ) -> SaveOutcome {
        let (reply, response) = oneshot::channel();
        if self.tx.send(command(reply)).is_err() {
            return stopped_outcome();
        }
        response.await.unwrap_or_else(|_| stopped_outcome())
    }

    fn lock_answers(&self) -> MutexGuard<'_, AnswerSet> {
        self.answers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn stopped_outcome() -> SaveOutcome {
    SaveOutcome::Failed {
        message: AppError::EngineStopped.to_string(),
        retryable: false,
    }
}

/// 单写者保存 worker
struct SaveWorker {
    ctx: SessionCtx,
    answers: Arc<Mutex<AnswerSet>>,
    api: SharedApi,
    activity: ActivityLogger,
    notifier: Notifier,
    timings: SaveTimings,
    rx: mpsc::UnboundedReceiver<Command>,
    record_tx: watch::Sender<SaveRecord>,
    status_tx: watch::Sender<SaveStatus>,
    /// 待发防抖保存的截止时刻
    deadline: Option<Instant>,
    shutdown: ShutdownListener,
}

impl SaveWorker {
    async fn run(mut self) {
        let period = self.timings.periodic;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if self.is_dirty() {
            debug!("{} 本地有未同步的答案，安排一次保存", self.ctx);
            self.deadline = Some(Instant::now() + self.timings.debounce);
        }

        loop {
            let deadline = self.deadline;
            let debounce = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.shutdown.stopped() => break,
                command = self.rx.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = debounce => {
                    self.deadline = None;
                    self.persist(SaveTrigger::Debounce).await;
                }
                _ = ticker.tick() => {
                    if self.is_dirty() {
                        self.persist(SaveTrigger::Periodic).await;
                    } else {
                        debug!("{} 定时同步: 答案未变化，跳过", self.ctx);
                    }
                }
            }
        }
        debug!("{} 保存任务已停止", self.ctx);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Edited { at } => {
                self.deadline = Some(at + self.timings.debounce);
            }
            Command::Manual(reply) => {
                self.deadline = None;
                let outcome = if self.snapshot().is_empty() {
                    info!("{} 没有需要保存的答案", self.ctx);
                    SaveOutcome::Clean
                } else {
                    self.persist(SaveTrigger::Manual).await
                };
                self.activity
                    .record(ActivityKind::ManualSave, json!({ "outcome": &outcome }));
                let _ = reply.send(outcome);
            }
            Command::Flush(reply) => {
                self.deadline = None;
                let outcome = if self.is_dirty() {
                    self.persist(SaveTrigger::Flush).await
                } else {
                    SaveOutcome::Clean
                };
                let _ = reply.send(outcome);
            }
            Command::Stop => {}
        }
    }

    /// 发送当前完整答案集
    async fn persist(&mut self, trigger: SaveTrigger) -> SaveOutcome {
        let snapshot = self.snapshot();
        self.record_tx.send_modify(|r| r.begin(snapshot.clone()));
        self.status_tx.send_replace(SaveStatus::Saving);

        let saved = bounded(
            self.timings.request_timeout,
            "save-answers",
            self.api.save_answers(&self.ctx.session_id, &snapshot),
        )
        .await;

        match saved {
            Ok(()) => {
                debug!(
                    "{} ✓ 答案已保存 ({} 题, {})",
                    self.ctx,
                    snapshot.len(),
                    trigger.label()
                );
                self.record_tx.send_modify(|r| r.acknowledge(snapshot));
                self.status_tx.send_replace(SaveStatus::Success);
                SaveOutcome::Saved
            }
            Err(e) => {
                let retryable = e.is_retryable();
                warn!(
                    "{} ⚠️ 答案保存失败 ({}), 等待下次重试: {}",
                    self.ctx,
                    trigger.label(),
                    e
                );
                self.record_tx.send_modify(|r| r.fail(retryable));
                self.status_tx.send_replace(SaveStatus::Error);
                self.activity.record(
                    ActivityKind::SaveFailure,
                    json!({ "trigger": trigger.label(), "error": e.to_string() }),
                );
                self.notifier.notify(Notice::SaveFailed {
                    message: e.to_string(),
                });
                SaveOutcome::Failed {
                    message: e.to_string(),
                    retryable,
                }
            }
        }
    }

    fn snapshot(&self) -> AnswerSet {
        self.answers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_dirty(&self) -> bool {
        let current = self.snapshot();
        self.record_tx.borrow().is_dirty(&current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{Shutdown, SystemClock};
    use crate::testing::ScriptedApi;

    struct Fixture {
        api: Arc<ScriptedApi>,
        saver: SaveCoordinator,
        activity: ActivityLogger,
        shutdown: Shutdown,
        worker: JoinHandle<()>,
    }

    fn fixture(initial: AnswerSet, baseline: SaveRecord) -> Fixture {
        let api = Arc::new(ScriptedApi::default());
        let activity = ActivityLogger::local("42", Arc::new(SystemClock));
        let shutdown = Shutdown::new();
        let (saver, worker) = SaveCoordinator::spawn(
            SessionCtx::new("42", "测试"),
            initial,
            baseline,
            api.clone(),
            LocalCache::in_memory(),
            activity.clone(),
            Notifier::disabled(),
            SaveTimings::default(),
            shutdown.listener(),
        );
        Fixture {
            api,
            saver,
            activity,
            shutdown,
            worker,
        }
    }

    fn blank() -> Fixture {
        fixture(AnswerSet::new(), SaveRecord::default())
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_coalesce_into_one_save() {
        let f = blank();
        for (i, answer) in ["A", "B", "C", "D", "B"].into_iter().enumerate() {
            f.saver.edit(format!("Q{}", i % 2), answer).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(f.api.save_count(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(f.api.save_count(), 1);
        assert_eq!(f.api.saves()[0], f.saver.answers());
        assert_eq!(f.saver.status(), SaveStatus::Success);
        assert!(f.saver.record().confirmed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.api.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sync_retries_after_failure() {
        let f = blank();
        f.api.fail_next_saves(1);
        f.saver.edit("Q1", "A").unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(f.saver.status(), SaveStatus::Error);
        let record = f.saver.record();
        assert!(!record.confirmed);
        assert!(record.retryable_error);
        assert_eq!(f.activity.count(ActivityKind::SaveFailure), 1);

        tokio::time::sleep(Duration::from_secs(27)).await;
        assert_eq!(f.api.save_count(), 1);
        assert!(f.saver.record().confirmed);
        assert_eq!(f.saver.status(), SaveStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_save_times_out_and_periodic_sync_retries() {
        let f = blank();
        f.api.set_save_delay(Some(Duration::from_secs(15)));
        f.saver.edit("Q1", "A").unwrap();

        // 3 秒防抖 + 10 秒请求超时
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(f.saver.status(), SaveStatus::Error);
        let record = f.saver.record();
        assert!(!record.confirmed);
        assert!(record.retryable_error);
        assert_eq!(f.api.save_count(), 0);

        f.api.set_save_delay(None);
        tokio::time::sleep(Duration::from_secs(17)).await;
        assert_eq!(f.api.saves(), vec![f.saver.answers()]);
        assert_eq!(f.saver.status(), SaveStatus::Success);
        assert!(f.saver.record().confirmed);
        assert!(!f.saver.record().retryable_error);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_during_an_in_flight_save_are_sent_afterwards() {
        let f = blank();
        f.api.set_save_delay(Some(Duration::from_secs(5)));

        f.saver.edit("Q1", "A").unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        f.saver.edit("Q2", "B").unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        let saves = f.api.saves();
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[0].len(), 1);
        assert_eq!(saves[1].len(), 2);
        assert!(!f.saver.record().is_dirty(&f.saver.answers()));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_save_skips_debounce_and_ignores_empty_answers() {
        let f = blank();
        assert_eq!(f.saver.save_now().await, SaveOutcome::Clean);
        assert_eq!(f.api.save_count(), 0);

        f.saver.edit("Q1", true).unwrap();
        assert_eq!(f.saver.save_now().await, SaveOutcome::Saved);
        assert_eq!(f.api.save_count(), 1);
        assert_eq!(f.activity.count(ActivityKind::ManualSave), 2);

        // 手动保存已经取消了防抖
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.api.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_is_clean_when_nothing_changed() {
        let saved: AnswerSet = [("Q1", "A")].into_iter().collect();
        let f = fixture(saved.clone(), SaveRecord::baseline(saved));
        assert_eq!(f.saver.flush().await, SaveOutcome::Clean);

        f.saver.edit("Q1", "B").unwrap();
        assert_eq!(f.saver.flush().await, SaveOutcome::Saved);
        assert_eq!(f.api.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_answers_are_saved_on_start() {
        let saved: AnswerSet = [("Q1", "A")].into_iter().collect();
        let mut recovered = saved.clone();
        recovered.upsert("Q2", "B");
        let f = fixture(recovered.clone(), SaveRecord::baseline(saved));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(f.api.saves(), vec![recovered]);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_saves_finish_before_stop() {
        let f = blank();
        f.saver.edit("Q1", "A").unwrap();
        let (outcome, ()) = tokio::join!(f.saver.save_now(), async { f.saver.shutdown() });

        assert_eq!(outcome, SaveOutcome::Saved);
        f.worker.await.unwrap();
        assert_eq!(f.api.save_count(), 1);
        assert!(!f.shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn locked_saver_rejects_edits_and_stops_on_shutdown() {
        let f = blank();
        f.saver.lock_edits();
        assert!(matches!(
            f.saver.edit("Q1", "A"),
            Err(AppError::SubmissionInProgress)
        ));
        f.saver.unlock_edits();
        f.saver.edit("Q1", "A").unwrap();

        f.shutdown.trigger();
        f.worker.await.unwrap();
        assert_eq!(f.api.save_count(), 0);
        assert!(f.saver.save_now().await.is_failed());
    }
}
