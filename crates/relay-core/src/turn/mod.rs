//! Turn processing: request composition, transport and orchestration

pub mod documents;
pub mod orchestrator;
pub mod request;
pub mod transport;

pub use documents::{DocumentReferenceStore, InMemoryDocumentStore};
pub use orchestrator::{
    CompletionCallback, EndpointMode, TurnInput, TurnOrchestrator, TurnSettings, TurnStream,
};
pub use request::{Attachment, ChatMessage, ChatRequest, MessagePart, ResumeRequest, Role};
pub use transport::{ByteStream, HttpTransport, Transport};
