//! Blob relay-through, folder browsing and the odd one-shot requests.
//!
//! These handlers never block the dispatch loop: anything that touches the
//! filesystem or a subprocess runs on a detached task that replies through
//! the transport on its own.

use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::*;
use serde_json::json;
use tracing::{debug, warn};

use tether_id::{ConversationId, DeviceId};
use tether_protocol::{FolderEntry, OutboundEnvelope, PendingFile, ServerMessage};

use super::{now_ms, Hub, StoredFile};

/// Post-upload thumbnail generation seam.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    /// Produce a base64 thumbnail for an uploaded blob, or `None` when the
    /// format has no preview.
    async fn thumbnail(&self, file_name: &str, data: &[u8]) -> anyhow::Result<Option<String>>;
}

/// Thumbnailer that produces nothing; uploads still complete.
pub struct NoopThumbnailer;

#[async_trait]
impl Thumbnailer for NoopThumbnailer {
    async fn thumbnail(&self, _file_name: &str, _data: &[u8]) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

impl Hub {
    /// Hold an uploaded blob until a send references it. The reply comes
    /// from a detached task so thumbnailing never blocks dispatch; a failed
    /// thumbnail degrades to a reply without one.
    pub(super) fn file_upload(
        &mut self,
        sender: DeviceId,
        id: ConversationId,
        file_name: String,
        data: String,
        mime_type: Option<String>,
    ) {
        if self.state.conversation(id).is_none() {
            debug!("upload for unknown conversation {id} dropped");
            return;
        }
        let bytes = match BASE64_STANDARD.decode(&data) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("upload for {id} with invalid base64 dropped: {e}");
                return;
            }
        };
        let meta = PendingFile {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.clone(),
            mime_type,
            size: bytes.len() as u64,
            uploaded_at: now_ms(),
            thumbnail: None,
        };
        self.pending_files.entry(id).or_default().insert(
            meta.id.clone(),
            StoredFile {
                meta: meta.clone(),
                data,
            },
        );

        let thumbnailer = Arc::clone(&self.deps.thumbnailer);
        let transport = Arc::clone(&self.deps.transport);
        tokio::spawn(async move {
            let thumbnail = match thumbnailer.thumbnail(&file_name, &bytes).await {
                Ok(thumbnail) => thumbnail,
                Err(e) => {
                    warn!("thumbnail for {file_name} failed: {e}");
                    None
                }
            };
            let mut file = meta;
            file.thumbnail = thumbnail;
            let reply = OutboundEnvelope::to(
                sender,
                ServerMessage::FileUploadResult {
                    conversation_id: id,
                    file,
                },
            );
            if let Err(e) = transport.send(reply).await {
                warn!("upload reply failed: {e}");
            }
        });
    }

    pub(super) async fn file_fetch(&self, sender: DeviceId, id: ConversationId, file_id: String) {
        let data = self
            .pending_files
            .get(&id)
            .and_then(|files| files.get(&file_id))
            .map(|stored| stored.data.clone());
        self.reply(
            sender,
            ServerMessage::FileFetchResult {
                conversation_id: id,
                file_id,
                data,
            },
        )
        .await;
    }

    pub(super) fn folder_list(&self, sender: DeviceId, path: String) {
        let transport = Arc::clone(&self.deps.transport);
        tokio::spawn(async move {
            let entries = match list_folder(&path).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("folder list for {path} failed: {e}");
                    Vec::new()
                }
            };
            let reply =
                OutboundEnvelope::to(sender, ServerMessage::FolderListResult { path, entries });
            if let Err(e) = transport.send(reply).await {
                warn!("folder list reply failed: {e}");
            }
        });
    }

    pub(super) async fn drive_list(&self, sender: DeviceId) {
        self.reply(
            sender,
            ServerMessage::DriveListResult {
                drives: vec!["/".to_string()],
            },
        )
        .await;
    }

    pub(super) fn worker_start(&self, sender: DeviceId, task: String, working_dir: Option<String>) {
        let driver = Arc::clone(&self.deps.driver);
        let transport = Arc::clone(&self.deps.transport);
        tokio::spawn(async move {
            let message = match driver.start_worker(&task, working_dir.as_deref()).await {
                Ok(worker_id) => ServerMessage::WorkerStartResult {
                    worker_id: Some(worker_id),
                    ok: true,
                },
                Err(e) => {
                    warn!("worker start failed: {e}");
                    ServerMessage::WorkerStartResult {
                        worker_id: None,
                        ok: false,
                    }
                }
            };
            if let Err(e) = transport.send(OutboundEnvelope::to(sender, message)).await {
                warn!("worker start reply failed: {e}");
            }
        });
    }

    pub(super) async fn usage_request(&self, sender: DeviceId) {
        self.reply(
            sender,
            ServerMessage::UsageResult {
                usage: json!({
                    "turns": self.usage.turns,
                    "costUsd": self.usage.cost_usd,
                    "lastUsage": self.usage.last_usage,
                }),
            },
        )
        .await;
    }

    pub(super) fn account_switch(&self, sender: DeviceId, account_id: String) {
        let driver = Arc::clone(&self.deps.driver);
        let transport = Arc::clone(&self.deps.transport);
        tokio::spawn(async move {
            let ok = match driver.switch_account(&account_id).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("account switch failed: {e}");
                    false
                }
            };
            let message = ServerMessage::AccountSwitchResult { account_id, ok };
            if let Err(e) = transport.send(OutboundEnvelope::to(sender, message)).await {
                warn!("account switch reply failed: {e}");
            }
        });
    }
}

/// List a directory, folders first, case-insensitive within each group.
async fn list_folder(path: &str) -> std::io::Result<Vec<FolderEntry>> {
    let mut dir = tokio::fs::read_dir(path).await?;
    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry
            .file_type()
            .await
            .map(|file_type| file_type.is_dir())
            .unwrap_or(false);
        entries.push(FolderEntry { name, is_dir });
    }
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_folder_dirs_first() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("b.txt"), b"x").await.unwrap();
        tokio::fs::create_dir(dir.path().join("src")).await.unwrap();
        tokio::fs::write(dir.path().join("A.md"), b"x").await.unwrap();

        let entries = list_folder(dir.path().to_str().unwrap()).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["src", "A.md", "b.txt"]);
        assert!(entries[0].is_dir);
    }

    #[tokio::test]
    async fn test_list_folder_missing_path_errors() {
        assert!(list_folder("/definitely/not/here").await.is_err());
    }
}
