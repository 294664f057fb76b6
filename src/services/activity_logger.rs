//! 行为日志服务 - 业务能力层
//!
//! 只负责"记一笔"：追加到本地 ActivityLog，再异步上报审计接口。
//! 上报失败一律吞掉，绝不影响答题。

use crate::clients::{bounded, SharedApi};
use crate::infrastructure::SharedClock;
use crate::models::{ActivityEntry, ActivityKind, ActivityLog};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// 行为日志服务
#[derive(Clone)]
pub struct ActivityLogger {
    session_id: String,
    log: Arc<Mutex<ActivityLog>>,
    api: Option<SharedApi>,
    clock: SharedClock,
    timeout: Duration,
}

impl ActivityLogger {
    /// 创建会上报审计接口的日志服务
    pub fn new(
        session_id: impl Into<String>,
        api: SharedApi,
        clock: SharedClock,
        timeout: Duration,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            log: Arc::default(),
            api: Some(api),
            clock,
            timeout,
        }
    }

    /// 只记本地、不上报
    pub fn local(session_id: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            session_id: session_id.into(),
            log: Arc::default(),
            api: None,
            clock,
            timeout: Duration::from_secs(10),
        }
    }

    /// 记录一条行为
    pub fn record(&self, kind: ActivityKind, detail: JsonValue) {
        let entry = ActivityEntry {
            kind,
            timestamp: self.clock.now(),
            detail,
        };
        self.lock().append(entry.clone());

        let Some(api) = self.api.clone() else {
            return;
        };
        // 没有运行时（例如同步测试）时只记本地
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session_id = self.session_id.clone();
        let timeout = self.timeout;
        runtime.spawn(async move {
            let sent = bounded(timeout, "/api/exam-logs", api.log_event(&session_id, &entry)).await;
            if let Err(e) = sent {
                debug!("行为日志上报失败（已忽略）: {:?} {}", entry.kind, e);
            }
        });
    }

    /// 当前日志的副本
    pub fn snapshot(&self) -> ActivityLog {
        self.lock().clone()
    }

    pub fn count(&self, kind: ActivityKind) -> usize {
        self.lock().count(kind)
    }

    fn lock(&self) -> MutexGuard<'_, ActivityLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ManualClock;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    #[test]
    fn entries_keep_order_and_clock_time() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(at);
        let logger = ActivityLogger::local("42", Arc::new(clock.clone()));

        logger.record(ActivityKind::ExamStart, json!({}));
        clock.advance(chrono::Duration::seconds(5));
        logger.record(ActivityKind::VisibilityChange, json!({ "switches": 1 }));

        let log = logger.snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].kind, ActivityKind::ExamStart);
        assert_eq!(log.entries()[1].timestamp, at + chrono::Duration::seconds(5));
        assert_eq!(logger.count(ActivityKind::VisibilityChange), 1);
    }
}
