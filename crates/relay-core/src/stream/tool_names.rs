//! Internal → public tool vocabulary
//!
//! The backend reports thinking steps with its internal tool identifiers.
//! Consumers only know the public names below. The table is an explicit
//! match: a new internal tool needs a new arm here.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Public name of the human-in-the-loop question tool.
pub const ASK_USER_TOOL: &str = "ask_user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicTool {
    WebSearch,
    WebFetch,
    DocumentSearch,
    NotebookSearch,
    ReadDocument,
    ImageGeneration,
    Summarize,
    AskUser,
}

impl PublicTool {
    pub fn as_str(self) -> &'static str {
        match self {
            PublicTool::WebSearch => "web_search",
            PublicTool::WebFetch => "web_fetch",
            PublicTool::DocumentSearch => "document_search",
            PublicTool::NotebookSearch => "notebook_search",
            PublicTool::ReadDocument => "read_document",
            PublicTool::ImageGeneration => "image_generation",
            PublicTool::Summarize => "summarize",
            PublicTool::AskUser => ASK_USER_TOOL,
        }
    }

    pub fn from_internal(internal: &str) -> Option<PublicTool> {
        let tool = match internal {
            "web_search" | "tavily_search" | "searxng_search" => PublicTool::WebSearch,
            "web_fetch" | "fetch_url" | "crawl_url" => PublicTool::WebFetch,
            "document_search" | "search_documents" | "vector_search" => {
                PublicTool::DocumentSearch
            }
            "notebook_search" | "search_notebooks" => PublicTool::NotebookSearch,
            "read_document" | "get_document" => PublicTool::ReadDocument,
            "image_generation" | "generate_image" => PublicTool::ImageGeneration,
            "summarize" | "summarize_documents" => PublicTool::Summarize,
            "ask_user" | "ask_human" | "human_input" => PublicTool::AskUser,
            _ => return None,
        };
        Some(tool)
    }

    /// Tools whose results carry citable sources.
    pub fn is_retrieval(self) -> bool {
        matches!(
            self,
            PublicTool::WebSearch | PublicTool::DocumentSearch | PublicTool::NotebookSearch
        )
    }
}

/// Public name for an internal tool; unmapped tools keep their internal name.
pub fn public_tool_name(internal: &str) -> String {
    match PublicTool::from_internal(internal) {
        Some(tool) => tool.as_str().to_string(),
        None => {
            warn!(tool = internal, "No public mapping for internal tool");
            internal.to_string()
        }
    }
}

/// Whether a (public) tool name refers to a retrieval tool.
pub fn is_retrieval_tool(name: &str) -> bool {
    PublicTool::from_internal(name).is_some_and(PublicTool::is_retrieval)
}

/// Tool that serves a retrieval source named in a fan-out intent.
pub fn tool_for_source(source: &str) -> Option<PublicTool> {
    match source {
        "web" => Some(PublicTool::WebSearch),
        "documents" => Some(PublicTool::DocumentSearch),
        "notebooks" => Some(PublicTool::NotebookSearch),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_names_map_to_public() {
        assert_eq!(public_tool_name("tavily_search"), "web_search");
        assert_eq!(public_tool_name("search_documents"), "document_search");
        assert_eq!(public_tool_name("ask_human"), ASK_USER_TOOL);
        assert_eq!(public_tool_name("human_input"), ASK_USER_TOOL);
    }

    #[test]
    fn test_unmapped_tool_keeps_name() {
        assert_eq!(public_tool_name("experimental_tool"), "experimental_tool");
    }

    #[test]
    fn test_public_names_are_fixed_points() {
        for tool in [
            PublicTool::WebSearch,
            PublicTool::WebFetch,
            PublicTool::DocumentSearch,
            PublicTool::NotebookSearch,
            PublicTool::ReadDocument,
            PublicTool::ImageGeneration,
            PublicTool::Summarize,
            PublicTool::AskUser,
        ] {
            assert_eq!(PublicTool::from_internal(tool.as_str()), Some(tool));
        }
    }

    #[test]
    fn test_retrieval_classification() {
        assert!(is_retrieval_tool("web_search"));
        assert!(is_retrieval_tool("notebook_search"));
        assert!(!is_retrieval_tool("ask_user"));
        assert_eq!(tool_for_source("documents"), Some(PublicTool::DocumentSearch));
        assert_eq!(tool_for_source("fax"), None);
    }
}
