use base64::Engine;
use parley_sdk::{ContentBlock, OutboundTurn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A file the user attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub path: PathBuf,
    /// Overrides the media type guessed from the file extension.
    #[serde(default)]
    pub media_type: Option<String>,
}

impl Attachment {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            media_type: None,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn media_type(&self) -> Option<String> {
        self.media_type.clone().or_else(|| {
            mime_guess::from_path(&self.path)
                .first_raw()
                .map(str::to_string)
        })
    }

    pub fn is_image(&self) -> bool {
        self.media_type()
            .is_some_and(|media_type| media_type.starts_with("image/"))
    }
}

/// Build the outbound turn for one queued message.
///
/// Plain text when there are no attachments. Otherwise a leading text block,
/// one base64 image block per readable image, and a trailing text block that
/// lists every other attachment by path. Images that cannot be read are
/// listed there as well.
pub async fn compose_turn(text: String, attachments: Vec<Attachment>) -> OutboundTurn {
    if attachments.is_empty() {
        return OutboundTurn::Text(text);
    }

    let mut blocks = Vec::new();
    if !text.is_empty() {
        blocks.push(ContentBlock::text(text));
    }

    let mut references = Vec::new();
    for attachment in attachments {
        if !attachment.is_image() {
            references.push(attachment.path);
            continue;
        }
        match read_image_block(&attachment).await {
            Ok(block) => blocks.push(block),
            Err(error) => {
                warn!(
                    path = %attachment.path.display(),
                    error = %error,
                    "image attachment unreadable; sending as file reference"
                );
                references.push(attachment.path);
            }
        }
    }

    if !references.is_empty() {
        blocks.push(ContentBlock::text(file_reference_text(&references)));
    }
    OutboundTurn::Structured(blocks)
}

async fn read_image_block(attachment: &Attachment) -> std::io::Result<ContentBlock> {
    let bytes = tokio::fs::read(&attachment.path).await?;
    let media_type = attachment
        .media_type()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(ContentBlock::base64_image(media_type, data))
}

fn file_reference_text(paths: &[PathBuf]) -> String {
    let mut text = String::from("Attached files:");
    for path in paths {
        text.push_str("\n- ");
        text.push_str(&display_path(path));
    }
    text
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
