pub mod client;
pub mod events;
pub mod models;
pub mod streaming;

pub use client::{ChatBackend, ChatClient};
pub use events::{EventStream, StreamEvent, EVENT_CHANNEL_CAPACITY};
pub use models::{ChatRequest, ModelOptions, ToolSpec};
pub use streaming::{pump_events, ChunkDecoder};
