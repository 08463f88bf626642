//! Local media cache for reassembled attachments.
//!
//! Files are named `{kind}_{message_id}.{ext}`, so repeated writes for the
//! same message are idempotent and an existence check short-circuits
//! re-downloads. Durability across restarts comes from re-download on
//! demand, not a sync manifest.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::{debug, info};

use banter_shared::model::MessageKind;

use crate::error::{MediaError, Result};

#[derive(Debug, Clone)]
pub struct MediaCache {
    root: PathBuf,
}

impl MediaCache {
    /// Open (and create) the cache directory. `dir` overrides the platform
    /// default location.
    pub fn open(dir: Option<PathBuf>) -> Result<Self> {
        let root = match dir {
            Some(d) => d,
            None => ProjectDirs::from("chat", "Banter", "banter")
                .ok_or(MediaError::NoCacheDir)?
                .cache_dir()
                .join("media"),
        };
        std::fs::create_dir_all(&root)?;
        debug!(path = %root.display(), "Media cache ready");
        Ok(Self { root })
    }

    /// Deterministic on-disk location for a message's media.
    pub fn path_for(&self, kind: MessageKind, message_id: &str, file_name: &str) -> PathBuf {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(default_extension(kind));
        self.root
            .join(format!("{}_{}.{}", kind.as_str(), sanitize(message_id), ext))
    }

    pub fn contains(&self, kind: MessageKind, message_id: &str, file_name: &str) -> bool {
        self.path_for(kind, message_id, file_name).exists()
    }

    /// Write reassembled bytes. A no-op returning the existing path when the
    /// file is already cached.
    pub async fn store(
        &self,
        kind: MessageKind,
        message_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let path = self.path_for(kind, message_id, file_name);
        if path.exists() {
            debug!(path = %path.display(), "Media already cached, skipping write");
            return Ok(path);
        }

        tokio::fs::write(&path, bytes).await?;
        info!(
            msg_id = %message_id,
            path = %path.display(),
            size = bytes.len(),
            "Media cached"
        );
        Ok(path)
    }
}

fn default_extension(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Image => "jpg",
        MessageKind::Video => "mp4",
        MessageKind::Audio => "m4a",
        MessageKind::Text | MessageKind::File => "bin",
    }
}

/// Message ids come from the server; strip anything that could escape the
/// cache directory.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
