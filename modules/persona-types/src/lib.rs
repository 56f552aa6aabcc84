//! Shared types for the multibot backend and its administrative consumers.

use serde::{Deserialize, Serialize};

// =====================================================
// Domain Types
// =====================================================

/// Behaviour mode a conversation runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Chat,
    Agent,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Chat => "chat",
            ChatMode::Agent => "agent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Some(ChatMode::Chat),
            "agent" => Some(ChatMode::Agent),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a preset comes from. The prefix doubles as the namespace in
/// `source:name` preset names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresetSourceKind {
    /// Regular prompt presets rendered by the host chat pipeline
    #[default]
    Chatluna,
    /// Character personas; messages for these bypass the host chat pipeline
    Character,
}

impl PresetSourceKind {
    pub fn all() -> &'static [PresetSourceKind] {
        &[PresetSourceKind::Chatluna, PresetSourceKind::Character]
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            PresetSourceKind::Chatluna => "chatluna",
            PresetSourceKind::Character => "character",
        }
    }

    pub fn from_prefix(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|kind| kind.prefix() == s)
    }

    /// Human-readable label for UI display
    pub fn label(&self) -> &'static str {
        match self {
            PresetSourceKind::Chatluna => "Preset",
            PresetSourceKind::Character => "Character",
        }
    }
}

impl std::fmt::Display for PresetSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// One entry of the namespaced preset catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetDescriptor {
    /// Globally unique `source:rawName`
    pub name: String,
    pub label: String,
    pub source: PresetSourceKind,
}

fn default_enabled() -> bool {
    true
}

/// A declared bot identity and the persona it should run with.
/// Empty `preset` / `model` mean "use the host default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// `platform:selfId`
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub preset: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub chat_mode: ChatMode,
}

impl Identity {
    pub fn new(id: impl Into<String>, preset: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            preset: preset.into(),
            model: model.into(),
            chat_mode: ChatMode::default(),
        }
    }

    pub fn with_chat_mode(mut self, chat_mode: ChatMode) -> Self {
        self.chat_mode = chat_mode;
        self
    }

    /// True when the identity overrides at least one of preset or model
    pub fn declares_persona(&self) -> bool {
        !self.preset.trim().is_empty() || !self.model.trim().is_empty()
    }

    /// Split `platform:selfId`. The self id may itself contain colons.
    pub fn platform_and_self_id(&self) -> Option<(&str, &str)> {
        self.id.split_once(':')
    }
}

/// Live state of one identity, rebuilt every process start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStatus {
    pub identity_id: String,
    pub initialized: bool,
    pub conversation_record_id: Option<i64>,
    pub current_preset: Option<String>,
    pub current_model: Option<String>,
    pub last_error: Option<String>,
}

impl IdentityStatus {
    pub fn new(identity_id: impl Into<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            ..Default::default()
        }
    }
}

// =====================================================
// Admin Surface Types
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub identity: Identity,
    pub status: Option<IdentityStatus>,
}

/// Read-only view handed to the administrative console
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSnapshot {
    pub isolation_enabled: bool,
    pub identities: Vec<IdentitySnapshot>,
    pub presets: Vec<PresetDescriptor>,
    pub presets_refreshed_at: Option<String>,
}

/// Update one identity's declared persona. `None` leaves a field unchanged;
/// `Some("")` clears it back to the host default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateIdentityRequest {
    pub identity_id: String,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub chat_mode: Option<ChatMode>,
}
