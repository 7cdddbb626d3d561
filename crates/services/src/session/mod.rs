mod controller;

// Public API of the session subsystem.
pub use controller::{AnswerEvent, SessionController};
pub use review_core::model::{Session, SessionItem, SessionPhase};
