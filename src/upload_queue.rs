//! Disk-backed, at-least-once media upload queue.
//!
//! A process-wide FIFO of [`MediaUpload`] records. Enqueueing writes nothing new to disk
//! (the Store already wrote the file); this queue only tracks *which* files are pending and
//! drives the single upload worker.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::relay::{Outcome, RelayClient};
use crate::shutdown::ShutdownSignal;
use crate::types::MediaUpload;

pub struct UploadQueue {
    relay: Option<Arc<RelayClient>>,
    queue: Mutex<VecDeque<MediaUpload>>,
    notify: Notify,
}

impl UploadQueue {
    /// Build the queue, performing the startup BFS recovery scan over each configured key's
    /// `queue/` directory: each key's pending files are sorted by line id, then interleaved
    /// round-robin across keys so no single key's backlog can starve the others.
    pub fn new(data_dir: PathBuf, keys: Vec<String>, relay: Option<Arc<RelayClient>>) -> Self {
        let mut per_key: BTreeMap<String, Vec<(i64, PathBuf)>> = BTreeMap::new();

        for key in &keys {
            let dir = data_dir.join(key).join("queue");
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };

            let mut files = Vec::new();
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Some(line_id) = parse_media_filename(name) {
                    files.push((line_id, entry.path()));
                }
            }

            if !files.is_empty() {
                files.sort_by_key(|(id, _)| *id);
                per_key.insert(key.clone(), files);
            }
        }

        let mut queue = VecDeque::new();
        let max_len = per_key.values().map(|v| v.len()).max().unwrap_or(0);
        for i in 0..max_len {
            for (key, files) in &per_key {
                if let Some((line_id, path)) = files.get(i) {
                    queue.push_back(MediaUpload {
                        key: key.clone(),
                        stream_id: String::new(),
                        line_id: *line_id,
                        path: path.clone(),
                    });
                }
            }
        }

        Self {
            relay,
            queue: Mutex::new(queue),
            notify: Notify::new(),
        }
    }

    pub async fn enqueue(&self, item: MediaUpload) {
        let mut queue = self.queue.lock().await;
        queue.push_back(item);
        self.notify.notify_one();
    }

    /// Drop every pending upload for `key` (the in-memory side of a stream reset; the caller
    /// is responsible for recreating the on-disk queue directory).
    pub async fn drain_key(&self, key: &str) {
        let mut queue = self.queue.lock().await;
        queue.retain(|item| item.key != key);
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run the single upload worker until `stop` fires and the queue drains.
    pub async fn run_worker(&self, mut stop: ShutdownSignal) {
        loop {
            let item = {
                let mut queue = self.queue.lock().await;
                queue.pop_front()
            };

            match item {
                Some(item) => self.upload_one(item).await,
                None => {
                    if stop.is_set() {
                        return;
                    }
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = stop.cancelled() => {}
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                    }
                }
            }
        }
    }

    async fn upload_one(&self, item: MediaUpload) {
        if !tokio::fs::try_exists(&item.path).await.unwrap_or(false) {
            return;
        }

        if let Some(relay) = &self.relay {
            match tokio::fs::read(&item.path).await {
                Ok(bytes) => {
                    let outcome = relay.upload_media(&item.key, item.line_id, bytes).await;
                    match outcome {
                        Outcome::Ok => {}
                        Outcome::Conflict => {
                            warn!(key = %item.key, line_id = item.line_id, "relay reported conflict for media upload")
                        }
                        Outcome::Rejected(status) => {
                            warn!(key = %item.key, line_id = item.line_id, status, "relay rejected media upload")
                        }
                        Outcome::Unreachable => {
                            warn!(key = %item.key, line_id = item.line_id, "relay unreachable for media upload")
                        }
                    }
                }
                Err(err) => warn!(key = %item.key, line_id = item.line_id, %err, "failed to read queued media file"),
            }
        }

        // At-least-once, best-effort: the file is removed regardless of HTTP outcome. The
        // transcript line is the system of record; a lost upload is logged, not retried.
        if let Err(err) = tokio::fs::remove_file(&item.path).await {
            warn!(key = %item.key, line_id = item.line_id, %err, "failed to remove uploaded media file");
        }
    }

    /// Give in-flight enqueues a moment to settle, then poll until the queue drains or the
    /// deadline elapses.
    pub async fn wait_for_uploads(&self, timeout: Duration) {
        tokio::time::sleep(Duration::from_secs(3)).await;

        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_empty().await {
            if tokio::time::Instant::now() > deadline {
                warn!("timed out waiting for uploads to finish");
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

fn parse_media_filename(name: &str) -> Option<i64> {
    name.strip_prefix("media_")?
        .strip_suffix(".bin")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_media_filenames() {
        assert_eq!(parse_media_filename("media_10.bin"), Some(10));
        assert_eq!(parse_media_filename("media_0.bin"), Some(0));
        assert_eq!(parse_media_filename("not_media.bin"), None);
        assert_eq!(parse_media_filename("media_abc.bin"), None);
    }

    #[tokio::test]
    async fn bfs_startup_recovery_interleaves_across_keys() {
        let dir = tempfile::tempdir().unwrap();
        for (key, ids) in [("A", vec![10, 11, 12]), ("B", vec![5])] {
            let queue_dir = dir.path().join(key).join("queue");
            std::fs::create_dir_all(&queue_dir).unwrap();
            for id in ids {
                std::fs::write(queue_dir.join(format!("media_{id}.bin")), b"x").unwrap();
            }
        }

        let queue = UploadQueue::new(
            dir.path().to_path_buf(),
            vec!["A".to_owned(), "B".to_owned()],
            None,
        );

        let mut order = Vec::new();
        {
            let mut q = queue.queue.lock().await;
            while let Some(item) = q.pop_front() {
                order.push((item.key.clone(), item.line_id));
            }
        }

        assert_eq!(
            order,
            vec![
                ("A".to_owned(), 10),
                ("B".to_owned(), 5),
                ("A".to_owned(), 11),
                ("A".to_owned(), 12),
            ]
        );
    }

    #[tokio::test]
    async fn drain_key_removes_only_matching_items() {
        let dir = tempfile::tempdir().unwrap();
        let queue = UploadQueue::new(dir.path().to_path_buf(), vec![], None);
        queue
            .enqueue(MediaUpload {
                key: "A".into(),
                stream_id: "s".into(),
                line_id: 1,
                path: dir.path().join("a.bin"),
            })
            .await;
        queue
            .enqueue(MediaUpload {
                key: "B".into(),
                stream_id: "s".into(),
                line_id: 2,
                path: dir.path().join("b.bin"),
            })
            .await;

        queue.drain_key("A").await;
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn upload_worker_deletes_file_after_best_effort_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media_1.bin");
        tokio::fs::write(&path, b"payload").await.unwrap();

        let queue = UploadQueue::new(dir.path().to_path_buf(), vec![], None);
        queue
            .enqueue(MediaUpload {
                key: "A".into(),
                stream_id: "s".into(),
                line_id: 1,
                path: path.clone(),
            })
            .await;

        let (shutdown, signal) = crate::shutdown::Shutdown::new();
        shutdown.trigger();
        queue.run_worker(signal).await;

        assert!(!tokio::fs::try_exists(&path).await.unwrap());
    }
}
