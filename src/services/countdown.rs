//! 倒计时服务 - 业务能力层
//!
//! 每秒一次 tick，但剩余时间总是由墙上时钟差值重新计算，
//! 页面被挂起或切到后台都不会多算或少算。

use crate::infrastructure::ShutdownListener;
use crate::models::{ActivityKind, SessionCtx, SubmitTrigger};
use crate::services::activity_logger::ActivityLogger;
use crate::services::clock_reconciler::ClockReconciler;
use crate::services::notice::{Notice, Notifier};
use crate::utils::logging::format_remaining;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 倒计时状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running,
    Expired,
}

/// 倒计时服务
#[derive(Clone)]
pub struct Countdown {
    inner: Arc<CountdownInner>,
}

struct CountdownInner {
    ctx: SessionCtx,
    reconciler: ClockReconciler,
    activity: ActivityLogger,
    notifier: Notifier,
    triggers: mpsc::UnboundedSender<SubmitTrigger>,
    shutdown: ShutdownListener,
    remaining_tx: watch::Sender<u64>,
    state: Mutex<CountdownState>,
}

struct CountdownState {
    timer: TimerState,
    /// 已经显示过的剩余时间，只减不增
    displayed: Option<u64>,
    /// 提醒点（从大到小）及是否已提醒
    warnings: Vec<(u64, bool)>,
    task: Option<JoinHandle<()>>,
}

impl Countdown {
    pub fn new(
        ctx: SessionCtx,
        reconciler: ClockReconciler,
        warnings: &[u64],
        activity: ActivityLogger,
        notifier: Notifier,
        triggers: mpsc::UnboundedSender<SubmitTrigger>,
        shutdown: ShutdownListener,
    ) -> Self {
        let mut thresholds: Vec<u64> = warnings.to_vec();
        thresholds.sort_unstable_by(|a, b| b.cmp(a));
        thresholds.dedup();

        let (remaining_tx, _) = watch::channel(reconciler.remaining_seconds());
        Self {
            inner: Arc::new(CountdownInner {
                ctx,
                reconciler,
                activity,
                notifier,
                triggers,
                shutdown,
                remaining_tx,
                state: Mutex::new(CountdownState {
                    timer: TimerState::Stopped,
                    displayed: None,
                    warnings: thresholds.into_iter().map(|t| (t, false)).collect(),
                    task: None,
                }),
            }),
        }
    }

    pub fn state(&self) -> TimerState {
        self.lock().timer
    }

    /// 最近一次显示的剩余秒数
    pub fn remaining(&self) -> u64 {
        *self.inner.remaining_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.remaining_tx.subscribe()
    }

    /// 开始计时；已经在运行或已过期时什么也不做
    ///
    /// 返回是否真的启动了。
    pub fn start(&self) -> bool {
        let mut state = self.lock();
        if state.timer != TimerState::Stopped {
            return false;
        }
        state.timer = TimerState::Running;

        let countdown = self.clone();
        let mut shutdown = self.inner.shutdown.clone();
        state.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.stopped() => break,
                    _ = ticker.tick() => {
                        countdown.tick();
                        if countdown.state() != TimerState::Running {
                            break;
                        }
                    }
                }
            }
            debug!("{} 倒计时任务已停止", countdown.inner.ctx);
        }));
        true
    }

    /// 暂停计时（不会触发交卷）
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.timer == TimerState::Running {
            state.timer = TimerState::Stopped;
        }
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }

    /// 处理一次 tick，返回显示的剩余秒数
    pub fn tick(&self) -> u64 {
        let computed = self.inner.reconciler.remaining_seconds();

        let mut state = self.lock();
        if state.timer != TimerState::Running {
            return state.displayed.unwrap_or(computed);
        }

        let previous = state.displayed;
        let shown = previous.map_or(computed, |p| p.min(computed));
        state.displayed = Some(shown);

        // 越过提醒点才提醒；一次越过多个提醒点时只报最紧的那个
        let mut announce = None;
        if shown > 0 {
            for (threshold, fired) in state.warnings.iter_mut() {
                let crossed = shown <= *threshold && previous.map_or(true, |p| p > *threshold);
                if crossed && !*fired {
                    *fired = true;
                    announce = Some(*threshold);
                }
            }
        }

        let expired = shown == 0;
        if expired {
            state.timer = TimerState::Expired;
        }
        drop(state);

        self.inner.remaining_tx.send_replace(shown);

        if let Some(threshold) = announce {
            warn!(
                "{} ⏰ 距离考试结束还有 {}",
                self.inner.ctx,
                format_remaining(shown)
            );
            self.inner.activity.record(
                ActivityKind::TimeWarning,
                json!({ "threshold": threshold, "remaining": shown }),
            );
            self.inner
                .notifier
                .notify(Notice::TimeWarning { remaining: shown });
        }

        if expired {
            info!("{} ⏰ 考试时间到，自动交卷", self.inner.ctx);
            let _ = self.inner.triggers.send(SubmitTrigger::Timeout);
        }
        shown
    }

    fn lock(&self) -> MutexGuard<'_, CountdownState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
