//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责会话装配与生命周期管理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `exam_session` - 单次考试会话
//! - 打开/恢复会话，合并本地缓存
//! - 装配保存、倒计时、时钟校准、纪律监控、交卷状态机
//! - 持有唯一的 `Shutdown`，交卷或关闭时停止所有后台任务
//!
//! ### `app` - 命令行应用
//! - 加载配置、创建 HTTP 客户端与本地缓存
//! - 把标准输入翻译成会话操作，显示提示
//!
//! ## 层次关系
//!
//! ```text
//! app (命令行)
//!     ↓
//! exam_session (一次作答)
//!     ↓
//! workflow::SubmissionMachine (交卷流程)
//!     ↓
//! services (保存 / 倒计时 / 时钟 / 纪律 / 日志)
//!     ↓
//! infrastructure + clients (时钟、缓存、关停信号、考试服务)
//! ```

pub mod app;
pub mod exam_session;

pub use app::App;
pub use exam_session::ExamSession;
