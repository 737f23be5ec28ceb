//! Client configuration
//!
//! Loaded from `~/.relay/config.toml`; every field has a default so the file
//! is optional. A few environment variables override the file:
//! `RELAY_BASE_URL`, `RELAY_API_TOKEN`, `RELAY_MODEL`, `RELAY_AGENT`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mentions::{MentionKind, Mentionable, Trigger, DEFAULT_AGENT_ID};
use crate::paths;
use crate::turn::TurnSettings;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_EVENT_BUFFER: usize = 32;

/// Backend paths, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub chat: String,
    pub agent: String,
    pub resume: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            chat: "/api/chat/stream".to_string(),
            agent: "/api/agent/stream".to_string(),
            resume: "/api/agent/resume".to_string(),
        }
    }
}

/// A dynamic mentionable declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MentionableConfig {
    pub kind: MentionKind,
    pub id: String,
    pub alias: String,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub context_prefix: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl MentionableConfig {
    pub fn into_mentionable(self) -> Mentionable {
        let trigger = self.trigger.unwrap_or(match self.kind {
            MentionKind::Agent => Trigger::Slash,
            _ => Trigger::At,
        });
        Mentionable {
            kind: self.kind,
            trigger,
            id: self.id,
            alias: self.alias,
            context_prefix: self.context_prefix,
            description: self.description,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub endpoints: Endpoints,
    pub default_agent_id: String,
    pub model_id: Option<String>,
    pub enabled_tools: Vec<String>,
    pub event_buffer: usize,
    pub mentionables: Vec<MentionableConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            endpoints: Endpoints::default(),
            default_agent_id: DEFAULT_AGENT_ID.to_string(),
            model_id: None,
            enabled_tools: Vec::new(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            mentionables: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_file())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        tracing::info!(
            "Loaded config from {} ({} mentionables)",
            path.display(),
            config.mentionables.len()
        );
        Ok(config)
    }

    /// Apply `RELAY_*` overrides using `lookup` to read variables.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup("RELAY_BASE_URL") {
            self.base_url = url;
        }
        if let Some(token) = lookup("RELAY_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(model) = lookup("RELAY_MODEL") {
            self.model_id = Some(model);
        }
        if let Some(agent) = lookup("RELAY_AGENT") {
            self.default_agent_id = agent;
        }
    }

    pub fn dynamic_mentionables(&self) -> Vec<Mentionable> {
        self.mentionables
            .iter()
            .cloned()
            .map(MentionableConfig::into_mentionable)
            .collect()
    }

    pub fn turn_settings(&self) -> TurnSettings {
        TurnSettings {
            endpoints: self.endpoints.clone(),
            default_agent_id: self.default_agent_id.clone(),
            model_id: self.model_id.clone(),
            enabled_tools: self.enabled_tools.clone(),
            event_buffer: self.event_buffer,
        }
    }
}
