//! 基础设施层
//!
//! 持有时钟、本地存储、关停信号这类底层资源，只暴露能力，不认识考试流程。

pub mod clock;
pub mod local_cache;
pub mod shutdown;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use local_cache::LocalCache;
pub use shutdown::{Shutdown, ShutdownListener};
