//! Exam session orchestration: question draws, the per-call session cycle,
//! client-facing views and post-commit events.

mod events;
mod manager;
mod selector;
mod view;

pub use events::{ExamEvent, ExamEventSink, TemplateStatsSink};
pub use manager::{AnswerSubmission, ExamSource, SessionManager};
pub use selector::{QuestionSelector, Selection};
pub use view::{
    AnswerSnapshot, CancelAck, OptionView, QuestionDisplay, QuestionView, ResultView,
    SessionStatusView, SubmitAck,
};
