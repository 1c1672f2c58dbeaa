//! On-disk staging for downloaded captures.
//!
//! The spool is not the upload queue: the core writes completed downloads
//! here and the external sink consumes and deletes them. Everything lives
//! under `<caches>/sabaipics/capture-spool/<session>/` so one `delete_session`
//! removes a session's leftovers wholesale.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::SpoolItem;

const SPOOL_SUBDIR: &str = "sabaipics/capture-spool";
const DEFAULT_FILENAME: &str = "photo.jpg";

#[derive(Debug)]
pub struct CaptureSpool {
    session_dir: PathBuf,
    session_token: String,
    /// Guards lazy directory creation.
    dir_ready: Mutex<bool>,
}

impl CaptureSpool {
    /// A spool for one session under the caller-provided caches root.
    pub fn new(caches_root: &Path) -> Self {
        let mut token_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let session_token = hex::encode(token_bytes);
        let session_dir = caches_root.join(SPOOL_SUBDIR).join(&session_token);
        Self {
            session_dir,
            session_token,
            dir_ready: Mutex::new(false),
        }
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Stage one download atomically (temp write, then rename).
    pub async fn store(
        &self,
        bytes: &[u8],
        preferred_filename: &str,
        handle_hex: Option<&str>,
        content_type: &'static str,
    ) -> Result<SpoolItem> {
        self.ensure_dir().await?;

        let created_at = Utc::now();
        let filename = sanitize_filename(preferred_filename);
        let stamp = created_at.format("%Y%m%d-%H%M%S");
        let base = match handle_hex {
            Some(h) => format!("{stamp}-{h}-{filename}"),
            None => format!("{stamp}-{filename}"),
        };

        let final_name = self.unique_name(&base).await;
        let path = self.session_dir.join(&final_name);
        let tmp = self.session_dir.join(format!("{final_name}.part"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        let mut id_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut id_bytes);

        debug!("💾 spooled {} ({} bytes)", path.display(), bytes.len());
        Ok(SpoolItem {
            id: hex::encode(id_bytes),
            absolute_path: path,
            filename,
            content_type,
            created_at,
            bytes: bytes.len() as u64,
        })
    }

    /// Remove this session's entire staging directory.
    pub async fn delete_session(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.session_dir).await {
            Ok(()) => {
                info!("🗑️ removed spool session {}", self.session_token);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_dir(&self) -> Result<()> {
        let mut ready = self.dir_ready.lock().await;
        if !*ready {
            tokio::fs::create_dir_all(&self.session_dir).await?;
            *ready = true;
        }
        Ok(())
    }

    /// Append a numeric suffix while the target name is taken (bursts can
    /// land inside one timestamp second).
    async fn unique_name(&self, base: &str) -> String {
        if tokio::fs::try_exists(self.session_dir.join(base)).await.ok() != Some(true) {
            return base.to_string();
        }
        for n in 1u32.. {
            let candidate = format!("{n}-{base}");
            if tokio::fs::try_exists(self.session_dir.join(&candidate)).await.ok() != Some(true) {
                return candidate;
            }
        }
        unreachable!()
    }
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '-' } else { c })
        .collect();
    if cleaned.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        cleaned
    }
}
