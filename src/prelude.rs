//! Convenience re-exports for common use.

pub use crate::config::WeaverConfig;
pub use crate::engine::{AgentEngine, EngineProvider, MultiAgentEngine, RawEvent, RawEventStream};
pub use crate::error::{Result, WeaverError};
pub use crate::plan::{ExecutionPlan, PlanResolver, ProfilePlanResolver};
pub use crate::turn::{ChunkStream, TurnRequest, TurnRunner};
pub use crate::types::{
    AgentEventPart, AgentEventType, Chunk, ContentPart, ConversationMessage, ExecutionMode,
    InvocationState, ReasoningPart, Role, RunContext, RunMetadata, ToolCallPart, ToolCallStatus,
};
