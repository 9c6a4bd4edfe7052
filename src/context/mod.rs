//! Conversation Context
//!
//! Per-session bounded turn history and the follow-up reference resolver.

pub mod resolver;
pub mod sessions;
pub mod window;

pub use resolver::{is_follow_up, resolve_reference};
pub use sessions::{Session, SessionStore};
pub use window::{ConversationTurn, ConversationWindow};
