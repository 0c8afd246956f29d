//! Conversation-side orchestration: tool visibility and the bounded
//! tool-calling loop.

mod dispatcher;
mod visibility;

pub use dispatcher::{
    FALLBACK_REPLY, TRUNCATION_MARKER, ToolLoop, ToolUsage, TurnOptions, TurnOutcome,
};
pub use visibility::VisibilityPolicy;
