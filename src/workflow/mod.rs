//! 流程层（Workflow）
//!
//! 定义"交一次卷"的完整流程。各个服务只发出交卷触发，真正的交卷只在这里发生。

pub mod submission;

pub use submission::{SubmissionMachine, SubmissionPhase, SubmitConfirmation, SubmitReport};
