use chrono::{DateTime, Duration as ChronoDuration, Utc};
use exam_session::models::{ActivityKind, SaveStatus};
use exam_session::services::{ClipboardAction, IntegrityHooks, Interception, InteractionKind};
use exam_session::testing::{session_snapshot, ScriptedApi};
use exam_session::{
    AnswerSet, AnswerValue, AppError, Config, ExamSession, LocalCache, ManualClock, Notice,
    SessionStatus, SubmissionPhase, SubmitTrigger,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_test::{assert_err, assert_ok};

fn start() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_800_000_000, 0).unwrap()
}

fn config() -> Config {
    Config {
        result_id: "42".to_string(),
        cache_dir: None,
        ..Config::default()
    }
}

fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

/// 30 分钟、三道题的考试，本地时钟停在开始后 `elapsed` 秒
fn exam(elapsed: i64) -> (Arc<ScriptedApi>, ManualClock) {
    let api = Arc::new(ScriptedApi::new(session_snapshot(
        start(),
        30,
        &["Q1", "Q2", "Q3"],
    )));
    (api, ManualClock::new(start() + ChronoDuration::seconds(elapsed)))
}

async fn open(api: &Arc<ScriptedApi>, cache: &LocalCache, clock: &ManualClock) -> ExamSession {
    assert_ok!(ExamSession::open(&config(), api.clone(), cache.clone(), Arc::new(clock.clone())).await)
}

fn answers(pairs: &[(&str, &str)]) -> AnswerSet {
    pairs.iter().map(|(q, a)| (*q, *a)).collect()
}

#[tokio::test(start_paused = true)]
async fn reload_before_save_restores_latest_edit_from_cache() {
    let dir = temp_dir("exam-session-reload");
    let (api, clock) = exam(60);

    let session = open(&api, &LocalCache::with_dir(&dir), &clock).await;
    session.answer("Q1", "A").unwrap();
    session.answer("Q1", "C").unwrap();
    drop(session);
    assert_eq!(api.save_count(), 0);

    // 页面刷新：新的缓存实例从磁盘读回
    let session = open(&api, &LocalCache::with_dir(&dir), &clock).await;
    assert_eq!(
        session.answers().get("Q1"),
        Some(&AnswerValue::Text("C".into()))
    );

    // 恢复出来的编辑会被补发
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(api.saves(), vec![answers(&[("Q1", "C")])]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_send_one_full_answer_set() {
    let mut snapshot = session_snapshot(start(), 30, &["Q1", "Q2", "Q3"]);
    snapshot.saved_answers = Some(answers(&[("Q1", "A")]));
    let api = Arc::new(ScriptedApi::new(snapshot));
    let clock = ManualClock::new(start() + ChronoDuration::seconds(60));

    let session = open(&api, &LocalCache::in_memory(), &clock).await;
    for _ in 0..3 {
        session.answer("Q2", "B").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(api.saves(), vec![answers(&[("Q1", "A"), ("Q2", "B")])]);
    assert_eq!(session.save_status(), SaveStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_only_sends_changes_and_recovers_from_failure() {
    let (api, clock) = exam(60);
    let mut session = open(&api, &LocalCache::in_memory(), &clock).await;

    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(api.save_count(), 0);

    api.fail_next_saves(1);
    session.answer("Q3", "D").unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(session.save_status(), SaveStatus::Error);
    assert!(!session.save_record().confirmed);
    assert!(session
        .take_notices()
        .iter()
        .any(|n| matches!(n, Notice::SaveFailed { .. })));

    // 下一个定时同步点（90 秒）补发成功
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(api.save_count(), 1);
    assert_eq!(session.save_status(), SaveStatus::Success);
    assert!(session.save_record().confirmed);
}

#[tokio::test(start_paused = true)]
async fn double_submit_grades_once() {
    let (api, clock) = exam(60);
    api.set_submit_delay(Some(Duration::from_millis(500)));
    let session = open(&api, &LocalCache::in_memory(), &clock).await;
    session.answer("Q1", "A").unwrap();

    let confirmation = session.confirm_submit();
    assert_eq!((confirmation.unanswered, confirmation.total), (2, 3));

    let (first, second) = tokio::join!(session.submit(), session.submit());
    assert_eq!(assert_ok!(first), assert_ok!(second));
    assert_eq!(api.submits(), vec![false]);
    assert_eq!(api.stored_answers(), answers(&[("Q1", "A")]));

    assert!(session.phase().is_submitted());
    assert_eq!(session.session().status, SessionStatus::Submitted);
    assert!(matches!(
        assert_err!(session.answer("Q2", "B")),
        AppError::SessionClosed { .. }
    ));
    assert_eq!(session.activity_log().count(ActivityKind::ExamSubmit), 1);
}

#[tokio::test(start_paused = true)]
async fn countdown_expiry_submits_once_after_wall_clock_jump() {
    let (api, clock) = exam(60);
    let session = open(&api, &LocalCache::in_memory(), &clock).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.remaining(), 1740);

    // 电脑休眠了两个小时
    clock.advance(ChronoDuration::hours(2));
    tokio::time::sleep(Duration::from_secs(3)).await;

    let report = assert_ok!(session.wait_submitted().await);
    assert_eq!(report.trigger, SubmitTrigger::Timeout);
    assert_eq!(api.submits(), vec![true]);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.submits().len(), 1);
    assert_eq!(session.remaining(), 0);
}

#[tokio::test(start_paused = true)]
async fn ten_minutes_idle_submits_once_and_interaction_resets() {
    let (api, clock) = exam(60);
    let session = open(&api, &LocalCache::in_memory(), &clock).await;

    tokio::time::sleep(Duration::from_secs(250)).await;
    session.integrity().on_interaction(InteractionKind::Click);

    tokio::time::sleep(Duration::from_secs(500)).await;
    assert!(api.submits().is_empty());
    assert_eq!(
        session.activity_log().count(ActivityKind::InactivityWarning),
        1
    );

    tokio::time::sleep(Duration::from_secs(110)).await;
    assert_eq!(api.submits(), vec![false]);
    match session.phase() {
        SubmissionPhase::Submitted(report) => {
            assert_eq!(report.trigger, SubmitTrigger::Inactivity)
        }
        other => panic!("unexpected phase: {:?}", other),
    }
    assert_eq!(
        session.activity_log().count(ActivityKind::InactivitySubmit),
        1
    );

    tokio::time::sleep(Duration::from_secs(1200)).await;
    assert_eq!(api.submits().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_server_time_falls_back_to_local_clock() {
    let (api, clock) = exam(600);
    let mut session = open(&api, &LocalCache::in_memory(), &clock).await;
    assert_eq!(session.remaining(), 1200);

    clock.advance(ChronoDuration::seconds(10));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.remaining(), 1190);

    let notices = session.take_notices();
    assert_eq!(
        notices
            .iter()
            .filter(|n| matches!(n, Notice::ClockFallback))
            .count(),
        1
    );
    assert!(session.phase() == SubmissionPhase::InProgress);
}

#[tokio::test(start_paused = true)]
async fn server_offset_corrects_the_countdown() {
    let (api, clock) = exam(600);
    // 服务器比本地快一分钟
    api.set_server_time(Some(start() + ChronoDuration::seconds(660)));
    let session = open(&api, &LocalCache::in_memory(), &clock).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(session.remaining(), 1140);
}

#[tokio::test(start_paused = true)]
async fn hung_server_time_does_not_delay_opening() {
    let (api, clock) = exam(600);
    api.set_server_time(Some(start() + ChronoDuration::seconds(660)));
    api.set_server_time_delay(Some(Duration::from_secs(3600)));

    let began = tokio::time::Instant::now();
    let mut session = open(&api, &LocalCache::in_memory(), &clock).await;
    assert!(began.elapsed() < Duration::from_secs(1));
    assert_eq!(session.remaining(), 1200);

    // 时间请求挂着，作答和保存照常
    session.answer("Q1", "A").unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(api.saves(), vec![answers(&[("Q1", "A")])]);

    clock.advance(ChronoDuration::seconds(5));
    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(session.remaining(), 1195);
    assert!(session.take_notices().contains(&Notice::ClockFallback));
}

#[tokio::test(start_paused = true)]
async fn crossing_five_minutes_warns_exactly_once() {
    let (api, clock) = exam(1499);
    let mut session = open(&api, &LocalCache::in_memory(), &clock).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.remaining(), 301);

    clock.advance(ChronoDuration::seconds(1));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.remaining(), 300);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let warnings: Vec<_> = session
        .take_notices()
        .into_iter()
        .filter(|n| matches!(n, Notice::TimeWarning { .. }))
        .collect();
    assert_eq!(warnings, vec![Notice::TimeWarning { remaining: 300 }]);
}

#[tokio::test(start_paused = true)]
async fn integrity_events_are_logged_without_touching_answers() {
    let (api, clock) = exam(60);
    let mut session = open(&api, &LocalCache::in_memory(), &clock).await;
    session.answer("Q1", "A").unwrap();

    let monitor = session.integrity();
    monitor.on_visibility_change(true);
    monitor.on_visibility_change(false);
    assert_eq!(
        monitor.on_clipboard_attempt(ClipboardAction::Paste),
        Interception::PreventDefault
    );
    assert_eq!(monitor.switch_count(), 1);

    let log = session.activity_log();
    assert_eq!(log.count(ActivityKind::VisibilityChange), 1);
    assert_eq!(log.count(ActivityKind::ClipboardBlocked), 1);
    assert_eq!(session.answers(), answers(&[("Q1", "A")]));
    assert!(session
        .take_notices()
        .contains(&Notice::VisibilityWarning { switches: 1 }));

    // 审计日志是异步上报的
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(api
        .logged()
        .iter()
        .any(|e| e.kind == ActivityKind::ExamStart));
}

#[tokio::test(start_paused = true)]
async fn submit_failure_keeps_cache_and_allows_retry() {
    let (api, clock) = exam(60);
    let cache = LocalCache::in_memory();
    let session = open(&api, &cache, &clock).await;
    session.answer("Q1", "A").unwrap();
    api.fail_next_submits(1);

    let err = assert_err!(session.submit().await);
    assert!(err.is_retryable());
    assert_eq!(cache.get("42"), answers(&[("Q1", "A")]));

    assert_ok!(session.submit().await);
    assert!(cache.get("42").is_empty());
    assert_eq!(api.submits(), vec![false, false]);
}

#[tokio::test(start_paused = true)]
async fn abandoned_submit_call_still_finishes_and_frees_retries() {
    let (api, clock) = exam(60);
    let cache = LocalCache::in_memory();
    let session = open(&api, &cache, &clock).await;
    session.answer("Q1", "A").unwrap();
    api.set_submit_delay(Some(Duration::from_secs(3)));
    api.fail_next_submits(1);

    assert_err!(tokio::time::timeout(Duration::from_secs(1), session.submit()).await);
    assert!(matches!(
        assert_err!(session.answer("Q2", "B")),
        AppError::SubmissionInProgress
    ));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(matches!(session.phase(), SubmissionPhase::SubmitFailed { .. }));
    session.answer("Q2", "B").unwrap();

    api.set_submit_delay(None);
    let report = assert_ok!(
        assert_ok!(tokio::time::timeout(Duration::from_secs(60), session.submit()).await)
    );
    assert_eq!(report.trigger, SubmitTrigger::Manual);
    assert_eq!(api.submits(), vec![false, false]);
    assert_eq!(api.stored_answers(), answers(&[("Q1", "A"), ("Q2", "B")]));
    assert!(cache.get("42").is_empty());
}

#[tokio::test(start_paused = true)]
async fn close_flushes_pending_edits() {
    let (api, clock) = exam(60);
    let session = open(&api, &LocalCache::in_memory(), &clock).await;
    session.answer("Q2", "B").unwrap();

    let outcome = session.close().await;
    assert_eq!(outcome, exam_session::SaveOutcome::Saved);
    assert_eq!(api.stored_answers(), answers(&[("Q2", "B")]));
}

#[tokio::test]
async fn session_without_questions_cannot_be_opened() {
    let api = Arc::new(ScriptedApi::new(session_snapshot(start(), 30, &[])));
    let clock = ManualClock::new(start());
    let err = ExamSession::open(&config(), api, LocalCache::in_memory(), Arc::new(clock))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AppError::MalformedSession(_)));
}

#[tokio::test]
async fn already_submitted_session_clears_stale_cache() {
    let mut snapshot = session_snapshot(start(), 30, &["Q1"]);
    snapshot.status = SessionStatus::Submitted;
    let api = Arc::new(ScriptedApi::new(snapshot));
    let cache = LocalCache::in_memory();
    cache.put("42", &answers(&[("Q1", "A")]));

    let err = ExamSession::open(
        &config(),
        api,
        cache.clone(),
        Arc::new(ManualClock::new(start())),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(
        err,
        AppError::SessionClosed {
            status: SessionStatus::Submitted
        }
    ));
    assert!(cache.get("42").is_empty());
}

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_open_real_session() {
    exam_session::utils::logging::init(true);

    // 需要 EXAM_API_BASE_URL / EXAM_AUTH_TOKEN / EXAM_RESULT_ID
    let config = Config::from_env();
    let api = Arc::new(exam_session::HttpExamClient::new(&config).expect("创建客户端失败"));

    let session = ExamSession::open(
        &config,
        api,
        LocalCache::in_memory(),
        Arc::new(exam_session::SystemClock),
    )
    .await
    .expect("打开会话失败");

    assert!(session.remaining() > 0, "会话应该还有剩余时间");
    session.close().await;
}
