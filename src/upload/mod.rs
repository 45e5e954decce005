//! The chunk cache / upload engine (design doc §4.6): stages client
//! writes into a local cache store and pipelines multipart uploads to
//! the object backend.

mod chunk;
mod reader;

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use chunk::Chunk;
use reader::ChunkReader;

use crate::backend::{MultipartUpload, ObjectStore, Part};
use crate::cache::CacheStore;
use crate::error::{Error, Result};

/// The multipart-crossover threshold: once a chunk has staged at least
/// this many unpersisted bytes, the coordinator promotes it to a
/// multipart upload (design doc §4.6).
pub const DEFAULT_PART_SIZE_THRESHOLD: u64 = 64 * 1024 * 1024;

/// The fixed worker-pool size draining part uploads (design doc §4.6,
/// §5).
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Depth of the coordinator's notification channel and the worker
/// pool's task channel. Bounded so a slow backend applies backpressure
/// to writers, per design doc §5.
const CHANNEL_CAPACITY: usize = 1024;

/// Tuning knobs for the upload engine (design doc §10.3).
#[derive(Debug, Clone, Copy)]
pub struct UploadEngineConfig {
    /// Bytes staged before a chunk is promoted to multipart.
    pub part_size_threshold: u64,
    /// Number of upload worker threads.
    pub worker_count: usize,
}

impl Default for UploadEngineConfig {
    fn default() -> Self {
        UploadEngineConfig {
            part_size_threshold: DEFAULT_PART_SIZE_THRESHOLD,
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }
}

/// One write frame's arrival, delivered from a writer thread to the
/// coordinator (design doc §4.6).
struct Notification {
    handle_id: u64,
    size: u64,
}

/// A snapshot of work for one upload worker: stream frames `[start,
/// end)` into part `part_number` of `upload`.
struct UploadTask {
    chunk: Arc<Chunk>,
    upload: MultipartUpload,
    start: u64,
    end: u64,
    size: u64,
    part_number: u64,
}

/// Stages writes into a cache store and pipelines multipart uploads to
/// the backend, bridging POSIX-style sequential `write(2)` calls to the
/// backend's whole-object or multipart upload primitives.
pub struct UploadEngine {
    chunks: Arc<Mutex<HashMap<u64, Arc<Chunk>>>>,
    notify_tx: Mutex<Option<Sender<Notification>>>,
    task_tx: Mutex<Option<Sender<UploadTask>>>,
    coordinator: Mutex<Option<thread::JoinHandle<()>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    backend: Arc<dyn ObjectStore>,
    cache: Arc<dyn CacheStore>,
    part_size_threshold: u64,
}

impl UploadEngine {
    /// Start the coordinator thread and the fixed-size worker pool.
    pub fn new(backend: Arc<dyn ObjectStore>, cache: Arc<dyn CacheStore>, config: UploadEngineConfig) -> Arc<Self> {
        let chunks: Arc<Mutex<HashMap<u64, Arc<Chunk>>>> = Arc::new(Mutex::new(HashMap::new()));
        let (notify_tx, notify_rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let (task_tx, task_rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);

        let coordinator = spawn_coordinator(
            notify_rx,
            task_tx.clone(),
            chunks.clone(),
            backend.clone(),
            config.part_size_threshold,
        );

        let workers = (0..config.worker_count)
            .map(|_| spawn_worker(task_rx.clone(), backend.clone(), cache.clone()))
            .collect();

        Arc::new(UploadEngine {
            chunks,
            notify_tx: Mutex::new(Some(notify_tx)),
            task_tx: Mutex::new(Some(task_tx)),
            coordinator: Mutex::new(Some(coordinator)),
            workers: Mutex::new(workers),
            backend,
            cache,
            part_size_threshold: config.part_size_threshold,
        })
    }

    /// Register a new chunk keyed on `handle_id` (design doc §4.6, step
    /// "On `prepare_write`").
    pub fn prepare_write(&self, handle_id: u64, path: String) {
        self.chunks.lock().insert(handle_id, Arc::new(Chunk::new(handle_id, path)));
    }

    /// Stage one write frame: store it in the cache store, then notify
    /// the coordinator.
    pub fn write_frame(&self, handle_id: u64, frame_idx: u64, buf: &[u8]) -> Result<()> {
        let key = format!("{handle_id}-{frame_idx}");
        self.cache.write(&key, &mut Cursor::new(buf.to_vec()), buf.len() as u64)?;

        let guard = self.notify_tx.lock();
        let tx = guard.as_ref().ok_or_else(|| Error::transient(EngineStopped))?;
        tx.send(Notification {
            handle_id,
            size: buf.len() as u64,
        })
        .map_err(|_| Error::transient(EngineStopped))
    }

    /// Finalize the chunk for `handle_id` (design doc §4.6, "Close
    /// path") and remove it from the table. `frame_count` is the total
    /// number of frames the write handle submitted; the coordinator
    /// runs asynchronously off a channel, so this call first waits for
    /// it to catch up before reading the chunk's state.
    pub fn close_for_write(&self, handle_id: u64, frame_count: u64) -> Result<()> {
        let chunk = self
            .chunks
            .lock()
            .remove(&handle_id)
            .ok_or(Error::NotFound)?;

        chunk.wait_for_frame_count(frame_count);

        let (upload, whole_object_range) = {
            let inner = chunk.inner.lock();
            match &inner.upload {
                None => (None, Some((0u64, inner.next_idx, inner.current_size))),
                Some(upload) => (Some(upload.clone()), None),
            }
        };

        let Some(upload) = upload else {
            let (start, end, size) = whole_object_range.unwrap();
            let mut reader = ChunkReader::new(self.cache.clone(), handle_id, start, end);
            self.backend.write(&chunk.path, &mut reader, size)?;
            return Ok(());
        };

        // Submit the tail, if any, synchronously before waiting.
        let tail = {
            let mut inner = chunk.inner.lock();
            if inner.persisted_idx < inner.next_idx {
                let start = inner.persisted_idx;
                let end = inner.next_idx;
                let size = inner.current_size - inner.persisted_size;
                let part_number = inner.next_part_number;
                inner.persisted_idx = end;
                inner.persisted_size = inner.current_size;
                inner.next_part_number += 1;
                Some((start, end, size, part_number))
            } else {
                None
            }
        };
        if let Some((start, end, size, part_number)) = tail {
            chunk.wait_group.add(1);
            let task = UploadTask {
                chunk: chunk.clone(),
                upload: upload.clone(),
                start,
                end,
                size,
                part_number,
            };
            let guard = self.task_tx.lock();
            match guard.as_ref() {
                Some(tx) if tx.send(task).is_ok() => {}
                _ => chunk.wait_group.done(),
            }
        }

        chunk.wait_group.wait();

        let mut parts: Vec<Part> = {
            let inner = chunk.inner.lock();
            if let Some(reason) = &inner.failed {
                log::error!("close_for_write({}): upload worker failed: {reason}", chunk.path);
                return Err(Error::transient(UploadPartFailed(reason.clone())));
            }
            inner.parts.values().cloned().collect()
        };
        parts.sort_by_key(|p| p.part_number);

        let multipart = self.backend.as_multipart().ok_or_else(|| {
            log::warn!("close_for_write({}): backend has no multipart capability", chunk.path);
            Error::Unsupported("multipart")
        })?;
        multipart.complete_multipart(&upload, &parts)?;
        Ok(())
    }

    /// Best-effort drain (design doc §9): block until the coordinator
    /// has accounted for at least `frame_count` frames of `handle_id`.
    /// Does not wait for any in-flight part upload to finish, and is a
    /// no-op if the chunk has already been closed.
    pub fn drain(&self, handle_id: u64, frame_count: u64) {
        if let Some(chunk) = self.chunks.lock().get(&handle_id).cloned() {
            chunk.wait_for_frame_count(frame_count);
        }
    }

    /// Gracefully stop the coordinator and worker pool, draining any
    /// in-flight tasks. Safe to call more than once.
    pub fn shutdown(&self) {
        self.notify_tx.lock().take();
        self.task_tx.lock().take();
        if let Some(handle) = self.coordinator.lock().take() {
            let _ = handle.join();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Part-size threshold this engine was configured with.
    pub fn part_size_threshold(&self) -> u64 {
        self.part_size_threshold
    }
}

impl Drop for UploadEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marker error for engine methods invoked after [`UploadEngine::shutdown`].
#[derive(Debug)]
struct EngineStopped;

impl std::fmt::Display for EngineStopped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upload engine has been shut down")
    }
}

impl std::error::Error for EngineStopped {}

/// Recorded on a chunk when an upload worker's `write_multipart` call
/// fails (design doc §4.6 "Upload worker" step 3, §7). Surfaced by
/// `close_for_write` instead of completing the multipart upload with a
/// gap in its parts.
#[derive(Debug)]
struct UploadPartFailed(String);

impl std::fmt::Display for UploadPartFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upload part failed: {}", self.0)
    }
}

impl std::error::Error for UploadPartFailed {}

fn spawn_coordinator(
    notify_rx: Receiver<Notification>,
    task_tx: Sender<UploadTask>,
    chunks: Arc<Mutex<HashMap<u64, Arc<Chunk>>>>,
    backend: Arc<dyn ObjectStore>,
    part_size_threshold: u64,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("objectfs-upload-coordinator".into())
        .spawn(move || {
            for note in notify_rx.iter() {
                let chunk = { chunks.lock().get(&note.handle_id).cloned() };
                let Some(chunk) = chunk else {
                    log::debug!("notification for unknown handle {}, dropping", note.handle_id);
                    continue;
                };

                let mut inner = chunk.inner.lock();
                inner.next_idx += 1;
                inner.current_size += note.size;
                chunk.advanced.notify_all();

                if inner.current_size - inner.persisted_size < part_size_threshold {
                    continue;
                }

                if inner.upload.is_none() {
                    match backend.as_multipart() {
                        Some(mp) => match mp.create_multipart(&chunk.path) {
                            Ok(upload) => {
                                log::debug!("opened multipart upload for handle {}", chunk.handle_id);
                                inner.upload = Some(upload);
                            }
                            Err(err) => {
                                log::error!("create_multipart({}): {err}", chunk.path);
                                continue;
                            }
                        },
                        None => {
                            // Backend has no multipart capability: keep
                            // accumulating. close_for_write will perform
                            // a single whole-object write instead.
                            continue;
                        }
                    }
                }

                let start = inner.persisted_idx;
                let end = inner.next_idx;
                let size = inner.current_size - inner.persisted_size;
                let part_number = inner.next_part_number;
                inner.persisted_idx = end;
                inner.persisted_size = inner.current_size;
                inner.next_part_number += 1;
                let upload = inner.upload.clone().expect("just set above");
                drop(inner);

                chunk.wait_group.add(1);
                let task = UploadTask {
                    chunk: chunk.clone(),
                    upload,
                    start,
                    end,
                    size,
                    part_number,
                };
                if task_tx.send(task).is_err() {
                    chunk.wait_group.done();
                }
            }
            log::debug!("upload coordinator stopped");
        })
        .expect("spawn coordinator thread")
}

fn spawn_worker(task_rx: Receiver<UploadTask>, backend: Arc<dyn ObjectStore>, cache: Arc<dyn CacheStore>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("objectfs-upload-worker".into())
        .spawn(move || {
            for task in task_rx.iter() {
                let mut reader = ChunkReader::new(cache.clone(), task.chunk.handle_id, task.start, task.end);
                let Some(multipart) = backend.as_multipart() else {
                    log::error!("upload task submitted but backend has no multipart capability");
                    task.chunk.wait_group.done();
                    continue;
                };
                match multipart.write_multipart(&task.upload, &mut reader, task.size, task.part_number) {
                    Ok(part) => {
                        task.chunk.inner.lock().parts.insert(task.part_number, part);
                    }
                    Err(err) => {
                        log::error!(
                            "write_multipart({}, part {}): {err}",
                            task.chunk.path,
                            task.part_number
                        );
                        task.chunk.inner.lock().failed.get_or_insert(err.to_string());
                    }
                }
                task.chunk.wait_group.done();
            }
        })
        .expect("spawn upload worker thread")
}
