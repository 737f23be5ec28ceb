//! Agent turn stream: wire decoding and message reconstruction

pub mod decoder;
pub mod events;
pub mod reconstruct;
pub mod snapshot;
pub mod tool_names;

pub use decoder::{EventDecoder, RawEvent};
pub use events::{Citation, StreamEvent};
pub use reconstruct::StreamReconstructor;
pub use snapshot::{
    ContentPart, Progress, ProgressStage, Snapshot, SourceRecord, ToolCallRecord, TurnSummary,
};
pub use tool_names::{public_tool_name, PublicTool, ASK_USER_TOOL};
