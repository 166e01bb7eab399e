use thiserror::Error;

use crate::model::{QuestionError, SessionModelError, TemplateError};
use crate::navigation::NavigationError;
use crate::transition::TransitionError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Session(#[from] SessionModelError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
}
