pub mod bootstrap;
pub mod candidate;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod generation;
pub mod llm;
pub mod planner;
pub mod safety;
pub mod schema;
pub mod templates;

pub use bootstrap::{assemble, build_dispatcher};
pub use candidate::{AcceptedQuery, Origin, QueryCandidate, RowCap};
pub use config::AppConfig;
pub use dispatcher::{classify_message, ChatReply, MessageClass, ReplyKind, RequestDispatcher};
pub use error::{AssistantError, Result};
pub use execution::{PolarsEngine, QueryExecutor, QueryResult};
pub use planner::{PlannedQuery, QueryPlanner};
pub use schema::SchemaRegistry;
