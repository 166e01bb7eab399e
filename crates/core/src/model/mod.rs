mod ids;
mod question;
mod session;
mod template;

pub use ids::{CategoryId, ParseIdError, QuestionId, SectionId, SessionId, TemplateId, UserId};

pub use question::{
    Difficulty, OptionLetter, Question, QuestionError, QuestionFilter, QuestionOption, QuestionRef,
};
pub use session::{
    ExamResult, ExamSession, QuestionAnswer, QuestionIds, SessionCounters, SessionModelError,
    SessionParts, SessionState,
};
pub use template::{
    DifficultyQuota, ExamConfig, ExamMode, ExamParams, ExamTemplate, TemplateDraft, TemplateError,
    Timing, MAX_AD_HOC_QUESTIONS, MAX_TEMPLATE_QUESTIONS, MIN_PER_QUESTION_BUDGET_SECS,
    MIN_QUESTION_COUNT, MIN_TOTAL_BUDGET_SECS,
};
