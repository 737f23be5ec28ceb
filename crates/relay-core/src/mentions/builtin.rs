//! Built-in mentionable catalog
//!
//! Always available, independent of the catalog APIs. Entries here take
//! priority over anything registered dynamically.

use super::registry::Mentionable;

/// Agent used when a turn carries no agent directive.
pub const DEFAULT_AGENT_ID: &str = "default";

pub fn builtin_mentionables() -> Vec<Mentionable> {
    vec![
        // Agents
        Mentionable::agent("press", "presse")
            .with_description("Pressemitteilungen und Öffentlichkeitsarbeit"),
        Mentionable::agent("social-media", "social")
            .with_description("Beiträge für soziale Netzwerke"),
        Mentionable::agent("research", "recherche")
            .with_description("Gründliche Recherche mit Quellen"),
        Mentionable::agent(DEFAULT_AGENT_ID, "standard").with_description("Allgemeiner Assistent"),
        // Tools
        Mentionable::tool("web_search", "websuche").with_description("Websuche erzwingen"),
        Mentionable::tool("web_search", "web"),
        Mentionable::tool("image_generation", "bild").with_description("Bild generieren"),
        Mentionable::tool("document_search", "dokumente")
            .with_description("In hochgeladenen Dokumenten suchen"),
    ]
}
