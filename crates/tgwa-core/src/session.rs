//! Session continuity: snapshot the outbound client's auth directory into a
//! single base64 string and unpack it again on the next start, so a restarted
//! process can skip the pairing challenge.
//!
//! Snapshot format: base64(JSON object of `relative/path -> {encoding, data}`),
//! where text files are stored as UTF-8 and everything else as base64.

use std::{
    collections::BTreeMap,
    fs,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{errors::Error, ports::SettingsStore, Result};

/// Settings key under which snapshots are stored.
pub const SESSION_SETTING_KEY: &str = "whatsapp_session";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
enum FileContent {
    Utf8(String),
    Base64(String),
}

/// Encode every regular file under `root` into a snapshot string.
pub fn encode_dir(root: &Path) -> Result<String> {
    let mut files = BTreeMap::new();
    collect_files(root, root, &mut files)?;
    let json = serde_json::to_vec(&files)?;
    Ok(STANDARD.encode(json))
}

/// Recreate the files of a snapshot under `root`. Returns the number of files written.
///
/// Entries that would escape `root` (absolute paths, `..`) are skipped.
pub fn decode_into(snapshot: &str, root: &Path) -> Result<usize> {
    let json = STANDARD
        .decode(snapshot.trim())
        .map_err(|e| Error::Persistence(format!("session snapshot is not valid base64: {e}")))?;
    let files: BTreeMap<String, FileContent> = serde_json::from_slice(&json)?;

    let mut written = 0usize;
    for (name, content) in files {
        let Some(rel) = safe_relative(&name) else {
            tracing::warn!(entry = %name, "skipping unsafe session snapshot entry");
            continue;
        };
        let bytes = match content {
            FileContent::Utf8(s) => s.into_bytes(),
            FileContent::Base64(b) => STANDARD.decode(b).map_err(|e| {
                Error::Persistence(format!("session entry {name} is not valid base64: {e}"))
            })?,
        };

        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        written += 1;
    }
    Ok(written)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut BTreeMap<String, FileContent>,
) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        // Sockets, lock symlinks and the like are process-local.
        if !file_type.is_file() {
            continue;
        }

        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let bytes = fs::read(&path)?;
        let content = match String::from_utf8(bytes) {
            Ok(text) => FileContent::Utf8(text),
            Err(e) => FileContent::Base64(STANDARD.encode(e.into_bytes())),
        };
        out.insert(name, content);
    }
    Ok(())
}

fn safe_relative(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn fingerprint(snapshot: &str) -> String {
    let digest = Sha256::digest(snapshot.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Best-effort save/restore of the auth directory through the settings store.
///
/// Every failure is logged and swallowed; startup and shutdown never depend on it.
pub struct SessionBridge {
    settings: Option<Arc<dyn SettingsStore>>,
    /// Snapshot supplied out of band (e.g. an environment variable); wins over the store.
    seed: Option<String>,
    last_saved: Mutex<Option<String>>,
}

impl SessionBridge {
    pub fn new(settings: Option<Arc<dyn SettingsStore>>, seed: Option<String>) -> Self {
        Self {
            settings,
            seed: seed.filter(|s| !s.trim().is_empty()),
            last_saved: Mutex::new(None),
        }
    }

    /// Snapshot `dir` and hand it to the settings store. Returns the snapshot
    /// so callers can also export it as a configuration value.
    pub async fn save(&self, dir: &Path) -> Option<String> {
        let root = dir.to_path_buf();
        let encoded = tokio::task::spawn_blocking(move || encode_dir(&root)).await;
        let snapshot = match encoded {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                tracing::warn!(dir = %dir.display(), "session snapshot failed: {e}");
                return None;
            }
            Err(e) => {
                tracing::warn!("session snapshot task failed: {e}");
                return None;
            }
        };

        let print = fingerprint(&snapshot);
        let unchanged = self
            .last_saved
            .lock()
            .map(|g| g.as_deref() == Some(print.as_str()))
            .unwrap_or(false);
        if unchanged {
            tracing::debug!("session snapshot unchanged; skipping save");
            return Some(snapshot);
        }

        if let Some(store) = &self.settings {
            match store.set_setting(SESSION_SETTING_KEY, &snapshot).await {
                Ok(()) => {
                    if let Ok(mut g) = self.last_saved.lock() {
                        *g = Some(print);
                    }
                    tracing::info!(bytes = snapshot.len(), "session snapshot saved");
                }
                Err(e) => tracing::warn!("failed to persist session snapshot: {e}"),
            }
        }
        Some(snapshot)
    }

    /// Unpack the seed (or the stored snapshot) into `dir`. Returns true if anything was restored.
    pub async fn restore(&self, dir: &Path) -> bool {
        let snapshot = match &self.seed {
            Some(s) => Some(s.clone()),
            None => match &self.settings {
                Some(store) => match store.get_setting(SESSION_SETTING_KEY).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("failed to load session snapshot: {e}");
                        None
                    }
                },
                None => None,
            },
        };
        let Some(snapshot) = snapshot else {
            tracing::info!("no saved session to restore");
            return false;
        };

        let root = dir.to_path_buf();
        let print = fingerprint(&snapshot);
        match tokio::task::spawn_blocking(move || decode_into(&snapshot, &root)).await {
            Ok(Ok(n)) => {
                if let Ok(mut g) = self.last_saved.lock() {
                    *g = Some(print);
                }
                tracing::info!(files = n, dir = %dir.display(), "session restored");
                n > 0
            }
            Ok(Err(e)) => {
                tracing::warn!("session restore failed: {e}");
                false
            }
            Err(e) => {
                tracing::warn!("session restore task failed: {e}");
                false
            }
        }
    }
}
