mod session;
mod tool;

pub use session::{Message, NewSession, Role, SessionMeta, TurnMarker, TurnOutcome};
pub use tool::{ToolCall, ToolResult};
