//! 会话级关停信号
//!
//! 会话持有唯一的 `Shutdown`；所有后台任务（倒计时、定时同步、时钟校准、空闲检测）
//! 都持有一个 `ShutdownListener`，交卷或离开会话时一起确定性地退出。

use tokio::sync::watch;

/// 关停信号的发送端
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// 通知所有监听者退出，重复调用无副作用
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// 关停信号的接收端
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等到关停信号触发；发送端被丢弃也视为关停
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
