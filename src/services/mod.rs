//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，彼此之间通过通道和共享句柄协作，
//! 不直接决定交卷：需要交卷时只发出 `SubmitTrigger`，由流程层统一处理。
//!
//! - `ClockReconciler` - 服务器时钟偏移
//! - `Countdown` - 倒计时与时间提醒
//! - `SaveCoordinator` - 防抖/定时/手动保存
//! - `IntegrityMonitor` - 切屏、剪贴板、空闲检测
//! - `ActivityLogger` - 行为日志
//! - `Notifier` - 向宿主推送提示

pub mod activity_logger;
pub mod clock_reconciler;
pub mod countdown;
pub mod integrity_monitor;
pub mod notice;
pub mod save_coordinator;

pub use activity_logger::ActivityLogger;
pub use clock_reconciler::ClockReconciler;
pub use countdown::{Countdown, TimerState};
pub use integrity_monitor::{
    ClipboardAction, IntegrityHooks, IntegrityMonitor, Interception, InteractionKind,
};
pub use notice::{Notice, Notifier};
pub use save_coordinator::{SaveCoordinator, SaveOutcome, SaveTimings};
