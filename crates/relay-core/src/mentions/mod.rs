//! Inline `@` / `/` mentions: alias registry and parser

pub mod builtin;
pub mod parser;
pub mod registry;

pub use builtin::{builtin_mentionables, DEFAULT_AGENT_ID};
pub use parser::{ActiveMention, MentionParser, MentionSpan, ParsedMentions};
pub use registry::{
    DocumentReference, DocumentSourceKind, MentionKind, MentionRegistry, Mentionable, Trigger,
};
