//! Session state for Parley
//!
//! Sessions carry the conversation history and the routing state that each
//! request builds on. They live only in process memory.

pub mod model;
pub mod store;

pub use model::{Blob, CloseReason, Message, RequestKind, Session, SessionContext};
pub use store::{Clock, ManualClock, SessionStats, SessionStore, SessionUpdate, SystemClock};
