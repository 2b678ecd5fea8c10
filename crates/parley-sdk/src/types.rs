use crate::SdkError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::str::FromStr;

/// How the remote service gates tool execution for a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionMode {
    /// Ask a human before running tools.
    #[default]
    #[serde(rename = "default")]
    Ask,
    #[serde(rename = "acceptEdits")]
    AcceptEdits,
    /// Approve every tool without consulting anyone.
    #[serde(rename = "bypassPermissions")]
    BypassAll,
    #[serde(rename = "plan")]
    Plan,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ask => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassAll => "bypassPermissions",
            Self::Plan => "plan",
        }
    }
}

impl Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = SdkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "default" | "ask" => Ok(Self::Ask),
            "acceptEdits" | "accept-edits" | "accept_edits" => Ok(Self::AcceptEdits),
            "bypassPermissions" | "bypass" | "bypass-all" => Ok(Self::BypassAll),
            "plan" => Ok(Self::Plan),
            other => Err(SdkError::InvalidArgument(format!(
                "unknown permission mode '{other}'"
            ))),
        }
    }
}

/// A local plugin made available to the remote service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn base64_image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }
}

/// One user turn sent to the remote service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundTurn {
    Text(String),
    Structured(Vec<ContentBlock>),
}

impl OutboundTurn {
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    /// Concatenated text content, images omitted.
    pub fn text_content(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_mode_wire_names_and_aliases_parse() {
        assert_eq!(
            serde_json::to_string(&PermissionMode::BypassAll).expect("serialize"),
            "\"bypassPermissions\""
        );
        assert_eq!(
            "accept-edits".parse::<PermissionMode>().expect("alias"),
            PermissionMode::AcceptEdits
        );
        assert_eq!("ask".parse::<PermissionMode>().expect("alias"), PermissionMode::Ask);
        assert!("yolo".parse::<PermissionMode>().is_err());
    }

    #[test]
    fn structured_turn_serializes_as_block_array() {
        let turn = OutboundTurn::Structured(vec![
            ContentBlock::text("look"),
            ContentBlock::base64_image("image/png", "AAAA"),
        ]);
        let value = serde_json::to_value(&turn).expect("serialize");
        assert_eq!(value[0]["type"], "text");
        assert_eq!(value[1]["source"]["type"], "base64");
        assert_eq!(value[1]["source"]["media_type"], "image/png");
        assert_eq!(turn.text_content(), "look");
    }
}
