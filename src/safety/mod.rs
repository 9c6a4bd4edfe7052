//! Safety
//!
//! Two independent gates: the SQL validator every candidate must pass before
//! it reaches the engine, and the optional LLM moderation of incoming messages.

pub mod guardrail;
pub mod validator;

pub use guardrail::{BlockCategory, GuardVerdict, InputGuard};
pub use validator::{SqlValidator, MUTATING_KEYWORDS};
