//! Offline store (component D) — a bounded FIFO of pending telemetry items,
//! mirrored to an AES-256-GCM-encrypted file on every enqueue.
//!
//! Grounded on the teacher's `persistence.rs` best-effort load/save pattern
//! (missing-or-corrupt file -> empty, never fatal), generalized to a queue
//! and to at-rest encryption under a key generated on first start
//! (SPEC_FULL.md §3.1/§4.D).

use std::collections::VecDeque;
use std::path::Path;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::OfflineConfig;
use crate::domain::OfflineItem;

const NONCE_LEN: usize = 12;

pub struct OfflineStore {
    config: OfflineConfig,
    key: [u8; 32],
    items: Mutex<VecDeque<OfflineItem>>,
}

impl OfflineStore {
    /// Loads (or generates) the encryption key, then loads the persisted
    /// queue. Never fails startup: a missing/corrupt file yields an empty
    /// queue, exactly like the teacher's `load_state`.
    pub async fn open(config: OfflineConfig) -> Self {
        let key = match load_or_create_key(&config.key_file).await {
            Ok(k) => k,
            Err(e) => {
                warn!("failed to load/create offline-store key: {e}, using a fresh in-memory key");
                let mut k = [0u8; 32];
                use aes_gcm::aead::rand_core::RngCore;
                OsRng.fill_bytes(&mut k);
                k
            }
        };

        let items = load_queue(&config.queue_file, &key).await;
        info!(count = items.len(), "offline store ready");

        Self {
            config,
            key,
            items: Mutex::new(items),
        }
    }

    pub async fn enqueue(&self, item: OfflineItem) {
        let mut items = self.items.lock().await;
        items.push_back(item);
        while items.len() > self.config.max_queue_len {
            items.pop_front();
        }
        if let Err(e) = save_queue(&self.config.queue_file, &self.key, &items).await {
            warn!("failed to persist offline queue: {e}");
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Pops and returns the front item without removing it permanently —
    /// the caller must call `ack_front` on success or `fail_front` on
    /// failure, matching the source's single-item-per-cycle retry policy.
    pub async fn peek_front(&self) -> Option<OfflineItem> {
        self.items.lock().await.front().cloned()
    }

    pub async fn ack_front(&self) {
        let mut items = self.items.lock().await;
        items.pop_front();
        if let Err(e) = save_queue(&self.config.queue_file, &self.key, &items).await {
            warn!("failed to persist offline queue after ack: {e}");
        }
    }

    /// Increments the front item's retry counter; drops it entirely once it
    /// exceeds `max_retries`. Either way the retry cycle for this tick ends
    /// here (the source aborts the cycle on failure to avoid hammering).
    pub async fn fail_front(&self) {
        let mut items = self.items.lock().await;
        let drop_item = if let Some(item) = items.front_mut() {
            item.retry_count += 1;
            item.retry_count >= self.config.max_retries
        } else {
            false
        };
        if drop_item {
            warn!("dropping offline item after exceeding max_retries");
            items.pop_front();
        }
        if let Err(e) = save_queue(&self.config.queue_file, &self.key, &items).await {
            warn!("failed to persist offline queue after fail: {e}");
        }
    }
}

async fn load_or_create_key(path: &str) -> anyhow::Result<[u8; 32]> {
    if Path::new(path).exists() {
        let data = tokio::fs::read(path).await?;
        if data.len() == 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&data);
            return Ok(key);
        }
        warn!("offline-store key file {path} has unexpected length, regenerating");
    }

    let key = Aes256Gcm::generate_key(OsRng);
    tokio::fs::write(path, key.as_slice()).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = tokio::fs::metadata(path).await {
            let mut perms = meta.permissions();
            perms.set_mode(0o600);
            let _ = tokio::fs::set_permissions(path, perms).await;
        }
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(key.as_slice());
    Ok(out)
}

async fn load_queue(path: &str, key: &[u8; 32]) -> VecDeque<OfflineItem> {
    if !Path::new(path).exists() {
        return VecDeque::new();
    }
    match tokio::fs::read(path).await {
        Ok(data) => match decrypt(key, &data).and_then(|plain| {
            serde_json::from_slice::<Vec<OfflineItem>>(&plain).map_err(|e| e.to_string())
        }) {
            Ok(items) => VecDeque::from(items),
            Err(e) => {
                warn!("failed to parse offline queue file: {e}, starting empty");
                VecDeque::new()
            }
        },
        Err(e) => {
            warn!("failed to read offline queue file: {e}, starting empty");
            VecDeque::new()
        }
    }
}

async fn save_queue(path: &str, key: &[u8; 32], items: &VecDeque<OfflineItem>) -> anyhow::Result<()> {
    let plain = serde_json::to_vec(&Vec::from_iter(items.iter().cloned()))?;
    let cipher = encrypt(key, &plain).map_err(|e| anyhow::anyhow!(e))?;
    tokio::fs::write(path, cipher).await?;
    Ok(())
}

fn encrypt(key: &[u8; 32], plain: &[u8]) -> Result<Vec<u8>, String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(OsRng);
    let mut ct = cipher.encrypt(&nonce, plain).map_err(|e| e.to_string())?;
    let mut out = nonce.to_vec();
    out.append(&mut ct);
    Ok(out)
}

fn decrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, String> {
    if data.len() < NONCE_LEN {
        return Err("ciphertext shorter than nonce".to_string());
    }
    let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ct).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OfflineKind;

    fn tmp_config(dir: &std::path::Path) -> OfflineConfig {
        OfflineConfig {
            queue_file: dir.join("queue.bin").to_string_lossy().to_string(),
            key_file: dir.join("queue.key").to_string_lossy().to_string(),
            max_retries: 3,
            max_queue_len: 10_000,
        }
    }

    #[tokio::test]
    async fn enqueue_then_retry_removes_exactly_one() {
        let dir = tempdir();
        let store = OfflineStore::open(tmp_config(dir.path())).await;

        for i in 0..5 {
            store
                .enqueue(OfflineItem {
                    enqueue_time_ms: 1000 + i,
                    kind: OfflineKind::Event,
                    payload: serde_json::json!({"i": i}),
                    retry_count: 0,
                })
                .await;
        }
        assert_eq!(store.len().await, 5);

        store.ack_front().await;
        assert_eq!(store.len().await, 4);
    }

    #[tokio::test]
    async fn drops_item_after_max_retries() {
        let dir = tempdir();
        let store = OfflineStore::open(tmp_config(dir.path())).await;
        store
            .enqueue(OfflineItem {
                enqueue_time_ms: 1,
                kind: OfflineKind::Gps,
                payload: serde_json::json!({}),
                retry_count: 0,
            })
            .await;

        for _ in 0..3 {
            store.fail_front().await;
        }
        assert_eq!(store.len().await, 0);
    }

    fn tempdir() -> tempfile_shim::TempDir {
        tempfile_shim::TempDir::new()
    }

    /// Minimal temp-dir helper so tests don't need an extra dev-dependency
    /// beyond what the rest of the workspace already pulls in indirectly.
    mod tempfile_shim {
        use std::path::{Path, PathBuf};

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let mut p = std::env::temp_dir();
                let unique = format!("fatigue-controller-test-{:?}", std::thread::current().id());
                p.push(unique);
                let _ = std::fs::create_dir_all(&p);
                Self(p)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }
}
