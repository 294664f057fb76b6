//! 提示消息 - 业务能力层
//!
//! 引擎向宿主（界面）推送的提示：时间提醒、切屏警告、保存失败等。
//! 发送永不阻塞；宿主不接收时直接丢弃。

use crate::clients::SubmitReceipt;
use crate::models::SubmitTrigger;
use crate::services::integrity_monitor::ClipboardAction;
use tokio::sync::mpsc;

/// 推送给宿主的提示
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// 剩余时间提醒（只在越过提醒点时发一次）
    TimeWarning { remaining: u64 },
    /// 切出考试页面
    VisibilityWarning { switches: u32 },
    /// 长时间无操作
    InactivityWarning { idle_secs: u64 },
    /// 拦截了复制/剪切/粘贴/右键
    ClipboardBlocked { action: ClipboardAction },
    /// 保存失败，下次触发时自动重试
    SaveFailed { message: String },
    /// 服务器时间不可用，倒计时改用本地时钟
    ClockFallback,
    /// 交卷成功
    Submitted {
        trigger: SubmitTrigger,
        receipt: SubmitReceipt,
    },
    /// 交卷失败，可以重试
    SubmitFailed { message: String },
}

/// 提示发送端
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notice>>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// 不向任何人推送
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn notify(&self, notice: Notice) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(notice);
        }
    }
}
