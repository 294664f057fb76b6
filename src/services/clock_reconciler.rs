//! 时钟校准服务 - 业务能力层
//!
//! 定期测量服务器与本地时钟的偏差，只修正倒计时对"现在"的认知，不碰答案数据。
//! 拿不到服务器时间时保留上一次的偏移继续走（fail-open），绝不阻塞倒计时。

use crate::clients::{bounded, SharedApi};
use crate::infrastructure::{SharedClock, ShutdownListener};
use crate::models::SessionCtx;
use crate::services::notice::{Notice, Notifier};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 时钟校准服务
#[derive(Clone)]
pub struct ClockReconciler {
    inner: Arc<ReconcilerInner>,
}

struct ReconcilerInner {
    ctx: SessionCtx,
    start_time: DateTime<Utc>,
    duration_seconds: u64,
    clock: SharedClock,
    api: SharedApi,
    timeout: Duration,
    notifier: Notifier,
    /// serverTime − localTime
    offset: Mutex<ChronoDuration>,
    fallback_reported: AtomicBool,
}

impl ClockReconciler {
    pub fn new(
        ctx: SessionCtx,
        start_time: DateTime<Utc>,
        duration_seconds: u64,
        clock: SharedClock,
        api: SharedApi,
        timeout: Duration,
        notifier: Notifier,
    ) -> Self {
        Self {
            inner: Arc::new(ReconcilerInner {
                ctx,
                start_time,
                duration_seconds,
                clock,
                api,
                timeout,
                notifier,
                offset: Mutex::new(ChronoDuration::zero()),
                fallback_reported: AtomicBool::new(false),
            }),
        }
    }

    /// 当前偏移量
    pub fn offset(&self) -> ChronoDuration {
        *self.inner.offset.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 校正后的"现在"
    pub fn corrected_now(&self) -> DateTime<Utc> {
        self.inner.clock.now() + self.offset()
    }

    /// 剩余秒数 = 时长 − (本地时间 + 偏移 − 开始时间)，向上取整并夹在 [0, 时长]
    pub fn remaining_seconds(&self) -> u64 {
        let elapsed_ms = (self.corrected_now() - self.inner.start_time).num_milliseconds();
        let total_ms = self.inner.duration_seconds as i64 * 1000;
        let remaining_ms = (total_ms - elapsed_ms).clamp(0, total_ms);
        ((remaining_ms + 999) / 1000) as u64
    }

    /// 用服务器时间戳更新偏移，本地时间取当前时钟
    pub fn reconcile(&self, server_time: DateTime<Utc>) {
        let local = self.inner.clock.now();
        self.reconcile_at(server_time, local);
    }

    /// 用一对 (服务器时间, 对应的本地时间) 更新偏移
    pub fn reconcile_at(&self, server_time: DateTime<Utc>, local_time: DateTime<Utc>) {
        let offset = server_time - local_time;
        let previous = std::mem::replace(
            &mut *self.inner.offset.lock().unwrap_or_else(|e| e.into_inner()),
            offset,
        );
        if (offset - previous).num_seconds().abs() >= 1 {
            info!(
                "{} 🕒 时钟偏移更新: {}ms -> {}ms",
                self.inner.ctx,
                previous.num_milliseconds(),
                offset.num_milliseconds()
            );
        } else {
            debug!("{} 时钟偏移: {}ms", self.inner.ctx, offset.num_milliseconds());
        }
    }

    /// 拉取服务器时间并校准，失败时保留旧偏移
    ///
    /// 本地时间取请求往返的中点，抵消对称的网络延迟。
    pub async fn sync(&self) -> bool {
        let sent = self.inner.clock.now();
        let fetched = bounded(self.inner.timeout, "server-time", self.inner.api.server_time()).await;
        match fetched {
            Ok(server_time) => {
                let received = self.inner.clock.now();
                let local = sent + (received - sent) / 2;
                self.reconcile_at(server_time, local);
                true
            }
            Err(e) => {
                if !self.inner.fallback_reported.swap(true, Ordering::SeqCst) {
                    warn!(
                        "{} ⚠️ 服务器时间同步失败，倒计时继续使用本地时钟: {}",
                        self.inner.ctx, e
                    );
                    self.inner.notifier.notify(Notice::ClockFallback);
                } else {
                    debug!("{} 服务器时间同步失败，保留上次偏移: {}", self.inner.ctx, e);
                }
                false
            }
        }
    }

    /// 定时校准，直到会话关停
    ///
    /// 启动后立即校准一次；在此之前倒计时按本地时钟走。
    pub async fn run(self, period: Duration, mut shutdown: ShutdownListener) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.stopped() => break,
                _ = ticker.tick() => {}
            }
            // 挂起的请求不能拖住关停
            tokio::select! {
                biased;
                _ = shutdown.stopped() => break,
                _ = self.sync() => {}
            }
        }
        debug!("{} 时钟校准任务已停止", self.inner.ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{ManualClock, Shutdown};
    use crate::testing::ScriptedApi;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn reconciler(clock: &ManualClock, api: Arc<ScriptedApi>) -> ClockReconciler {
        ClockReconciler::new(
            SessionCtx::new("42", "测试"),
            at(0),
            600,
            Arc::new(clock.clone()),
            api,
            Duration::from_secs(10),
            Notifier::disabled(),
        )
    }

    #[test]
    fn remaining_uses_wall_clock_and_offset() {
        let clock = ManualClock::new(at(100));
        let reconciler = reconciler(&clock, Arc::new(ScriptedApi::default()));
        assert_eq!(reconciler.remaining_seconds(), 500);

        // 服务器比本地快 30 秒
        reconciler.reconcile(at(130));
        assert_eq!(reconciler.offset(), ChronoDuration::seconds(30));
        assert_eq!(reconciler.remaining_seconds(), 470);

        clock.advance(ChronoDuration::seconds(1000));
        assert_eq!(reconciler.remaining_seconds(), 0);
    }

    #[test]
    fn partial_seconds_round_up() {
        let clock = ManualClock::new(at(0) + ChronoDuration::milliseconds(1500));
        let reconciler = reconciler(&clock, Arc::new(ScriptedApi::default()));
        assert_eq!(reconciler.remaining_seconds(), 599);
    }

    #[tokio::test(start_paused = true)]
    async fn run_syncs_immediately_and_stops_during_a_hung_request() {
        let clock = ManualClock::new(at(100));
        let api = Arc::new(ScriptedApi::default());
        api.set_server_time(Some(at(160)));
        let reconciler = reconciler(&clock, api.clone());
        let shutdown = Shutdown::new();
        let task = tokio::spawn(
            reconciler
                .clone()
                .run(Duration::from_secs(60), shutdown.listener()),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(reconciler.offset(), ChronoDuration::seconds(60));

        api.set_server_time_delay(Some(Duration::from_secs(3600)));
        tokio::time::sleep(Duration::from_secs(61)).await;
        shutdown.trigger();
        task.await.unwrap();
        assert_eq!(reconciler.offset(), ChronoDuration::seconds(60));
    }

    #[tokio::test]
    async fn failed_sync_keeps_previous_offset() {
        let clock = ManualClock::new(at(100));
        let api = Arc::new(ScriptedApi::default());
        let reconciler = reconciler(&clock, api.clone());
        reconciler.reconcile(at(110));

        api.set_server_time(None);
        assert!(!reconciler.sync().await);
        assert_eq!(reconciler.offset(), ChronoDuration::seconds(10));

        api.set_server_time(Some(at(95)));
        assert!(reconciler.sync().await);
        assert_eq!(reconciler.offset(), ChronoDuration::seconds(-5));
    }
}
