//! relay core
//!
//! Client-side engine between a chat UI and an agent backend:
//! - `mentions`: `@alias` / `/alias` routing directives
//! - `stream`: event decoding and message reconstruction
//! - `interrupt`: human-in-the-loop pause/resume tracking
//! - `turn`: request composition and turn orchestration

pub mod config;
pub mod error;
pub mod interrupt;
pub mod mentions;
pub mod paths;
pub mod stream;
pub mod turn;

pub use config::ClientConfig;
pub use error::{TurnError, TurnResult};
pub use interrupt::{InterruptController, TurnDecision};
pub use mentions::{MentionParser, MentionRegistry, ParsedMentions};
pub use stream::{Snapshot, StreamReconstructor};
pub use turn::{TurnInput, TurnOrchestrator};
