use thiserror::Error;

use crate::model::buffer::BufferConfigError;
use crate::model::ids::IdError;
use crate::model::question::QuestionValidationError;
use crate::model::session::SessionStateError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Question(#[from] QuestionValidationError),
    #[error(transparent)]
    Session(#[from] SessionStateError),
    #[error(transparent)]
    BufferConfig(#[from] BufferConfigError),
}
