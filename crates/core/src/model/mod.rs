pub mod buffer;
pub mod ids;
pub mod material;
pub mod question;
pub mod session;
pub mod solved;

pub use buffer::{BufferConfig, BufferConfigError, BufferEntry};
pub use ids::{IdError, MaterialId, QuestionId, UserId};
pub use material::{ContextSource, Material, ResolvedContext};
pub use question::{
    Answer, Fingerprint, Origin, Question, QuestionDraft, QuestionValidationError, ResponseType,
};
pub use session::{Session, SessionItem, SessionPhase, SessionStateError};
pub use solved::SolvedSet;
