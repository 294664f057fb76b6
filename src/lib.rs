//! # Exam Session
//!
//! 在线考试答题引擎：保证考生的答案不丢、计时准确、交卷恰好一次
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有时钟、本地缓存、关停信号，只暴露能力
//! - `clients/` - 考试服务接口（`ExamApi`）及其 HTTP 实现
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，各自在边界上吞掉异步错误
//! - `SaveCoordinator` - 防抖、定时、手动保存，单写者串行发送
//! - `ClockReconciler` - 服务器时钟偏移
//! - `Countdown` - 倒计时与时间提醒
//! - `IntegrityMonitor` - 切屏、剪贴板、空闲检测
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"交一次卷"的完整流程
//! - `SubmissionMachine` - 刷新答案 → 交卷 → 收尾，幂等
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/exam_session` - 一次作答的装配与生命周期
//! - `orchestrator/app` - 命令行应用
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{ExamApi, HttpExamClient, SharedApi, SubmitReceipt};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{Clock, LocalCache, ManualClock, SystemClock};
pub use models::{AnswerSet, AnswerValue, Session, SessionStatus, SubmitTrigger};
pub use orchestrator::{App, ExamSession};
pub use services::{IntegrityHooks, Notice, SaveOutcome};
pub use workflow::{SubmissionPhase, SubmitConfirmation, SubmitReport};
