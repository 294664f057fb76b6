//! 考试纪律监控 - 业务能力层
//!
//! ## 职责
//!
//! - 切屏计数与警告
//! - 拦截复制、剪切、粘贴、右键
//! - 空闲检测：5 分钟警告，10 分钟自动交卷
//!
//! 所有行为都写入行为日志。只有空闲超时会产生交卷触发。

use crate::infrastructure::ShutdownListener;
use crate::models::{ActivityKind, SessionCtx, SubmitTrigger};
use crate::services::activity_logger::ActivityLogger;
use crate::services::notice::{Notice, Notifier};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

/// 被拦截的剪贴板类操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardAction {
    Copy,
    Cut,
    Paste,
    ContextMenu,
}

impl std::fmt::Display for ClipboardAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ClipboardAction::Copy => "复制",
            ClipboardAction::Cut => "剪切",
            ClipboardAction::Paste => "粘贴",
            ClipboardAction::ContextMenu => "右键菜单",
        };
        f.write_str(label)
    }
}

/// 宿主收到的处理意见
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    /// 阻止默认行为
    PreventDefault,
}

/// 会重置空闲计时的用户操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
}

/// 宿主环境向引擎报告事件的入口
pub trait IntegrityHooks {
    /// 页面可见性变化，`hidden` 为 true 表示切走
    fn on_visibility_change(&self, hidden: bool);

    /// 剪贴板类操作，总是返回阻止
    fn on_clipboard_attempt(&self, action: ClipboardAction) -> Interception;

    /// 任意交互，重置空闲计时
    fn on_interaction(&self, kind: InteractionKind);
}

/// 考试纪律监控
#[derive(Clone)]
pub struct IntegrityMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    ctx: SessionCtx,
    activity: ActivityLogger,
    notifier: Notifier,
    switches: AtomicU32,
    last_interaction: watch::Sender<Instant>,
}

impl IntegrityMonitor {
    pub fn new(ctx: SessionCtx, activity: ActivityLogger, notifier: Notifier) -> Self {
        let (last_interaction, _) = watch::channel(Instant::now());
        Self {
            inner: Arc::new(MonitorInner {
                ctx,
                activity,
                notifier,
                switches: AtomicU32::new(0),
                last_interaction,
            }),
        }
    }

    /// 本会话累计切屏次数
    pub fn switch_count(&self) -> u32 {
        self.inner.switches.load(Ordering::SeqCst)
    }

    /// 距最后一次交互的时长
    pub fn idle_for(&self) -> Duration {
        self.inner.last_interaction.borrow().elapsed()
    }

    /// 空闲检测，直到会话关停
    ///
    /// 无操作满 `warning` 时警告一次（再有操作后重新计），满 `submit` 时发出
    /// 空闲交卷触发。交卷成功会关停本任务；交卷失败则从触发时刻重新计时。
    pub async fn watch_idle(
        self,
        warning: Duration,
        submit: Duration,
        triggers: mpsc::UnboundedSender<SubmitTrigger>,
        mut shutdown: ShutdownListener,
    ) {
        let mut activity = self.inner.last_interaction.subscribe();
        let mut since = *activity.borrow_and_update();
        let mut warned = false;

        loop {
            let next = if warned { since + submit } else { since + warning };

            tokio::select! {
                biased;
                _ = shutdown.stopped() => return,
                changed = activity.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    since = *activity.borrow_and_update();
                    warned = false;
                }
                _ = tokio::time::sleep_until(next) => {
                    if !warned {
                        warned = true;
                        warn!("{} ⚠️ 已 {} 秒无操作", self.inner.ctx, warning.as_secs());
                        self.inner.activity.record(
                            ActivityKind::InactivityWarning,
                            json!({ "idle_secs": warning.as_secs() }),
                        );
                        self.inner.notifier.notify(Notice::InactivityWarning {
                            idle_secs: warning.as_secs(),
                        });
                    } else {
                        info!("{} ⏰ {} 秒无操作，自动交卷", self.inner.ctx, submit.as_secs());
                        self.inner.activity.record(
                            ActivityKind::InactivitySubmit,
                            json!({ "idle_secs": submit.as_secs() }),
                        );
                        if triggers.send(SubmitTrigger::Inactivity).is_err() {
                            return;
                        }
                        since = Instant::now();
                        warned = false;
                    }
                }
            }
        }
    }
}

impl IntegrityHooks for IntegrityMonitor {
    fn on_visibility_change(&self, hidden: bool) {
        if !hidden {
            return;
        }
        let switches = self.inner.switches.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("{} ⚠️ 第 {} 次切出考试页面", self.inner.ctx, switches);
        self.inner
            .activity
            .record(ActivityKind::VisibilityChange, json!({ "switches": switches }));
        self.inner
            .notifier
            .notify(Notice::VisibilityWarning { switches });
    }

    fn on_clipboard_attempt(&self, action: ClipboardAction) -> Interception {
        self.inner
            .activity
            .record(ActivityKind::ClipboardBlocked, json!({ "action": action }));
        self.inner.notifier.notify(Notice::ClipboardBlocked { action });
        Interception::PreventDefault
    }

    fn on_interaction(&self, _kind: InteractionKind) {
        self.inner.last_interaction.send_replace(Instant::now());
    }
}
