pub mod exam_client;

pub use exam_client::{bounded, ExamApi, HttpExamClient, SharedApi, SubmitReceipt};
