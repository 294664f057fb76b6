pub mod activity;
pub mod answer;
pub mod save_record;
pub mod session;
pub mod session_ctx;

pub use activity::{ActivityEntry, ActivityKind, ActivityLog};
pub use answer::{AnswerSet, AnswerValue};
pub use save_record::{SaveRecord, SaveStatus};
pub use session::{QuestionRef, Session, SessionSnapshot, SessionStatus, SubmitTrigger};
pub use session_ctx::SessionCtx;
