#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod exam;
pub mod history;
pub mod identity;
pub mod template_service;

pub use exam_core::Clock;

pub use app_services::AppServices;
pub use error::{AppServicesError, ExamError, SinkError, TemplateServiceError};
pub use exam::{
    AnswerSubmission, ExamEvent, ExamEventSink, ExamSource, QuestionSelector, QuestionView,
    ResultView, SessionManager, SessionStatusView, SubmitAck,
};
pub use history::{ExamHistoryService, ExamStatistics, SessionSummaryItem};
pub use identity::{OwnershipVerifier, SameUserVerifier};
pub use template_service::{Paged, TemplateService};
