//! An in-memory [`ObjectStore`], used by the integration test suite and
//! as a worked reference for a real driver (local directory, S3, ...).
//!
//! Paths are canonicalized without a trailing slash; whether a stat
//! targets a file or a directory is decided by whether the caller asked
//! with a trailing slash, mirroring the two-probe convention
//! [`crate::fs::Fs::stat`] uses against a real object store.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;

use super::{DirCreator, Multipart, MultipartUpload, Object, ObjectIterator, ObjectMode, ObjectStore, Part};
use crate::error::{Error, Result};

struct Entry {
    content: Vec<u8>,
    mode: ObjectMode,
    last_modified: SystemTime,
}

/// An in-memory object store, useful for tests and local experimentation.
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, Entry>>,
    uploads: Mutex<BTreeMap<String, BTreeMap<u64, Vec<u8>>>>,
    next_upload_id: AtomicU64,
}

impl MemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        MemoryBackend {
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(BTreeMap::new()),
            next_upload_id: AtomicU64::new(1),
        }
    }

    fn canonicalize(path: &str) -> (String, bool) {
        match path.strip_suffix('/') {
            Some(stripped) => (stripped.to_string(), true),
            None => (path.to_string(), false),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryBackend {
    fn stat(&self, path: &str) -> Result<Object> {
        let (canonical, want_dir) = Self::canonicalize(path);
        let objects = self.objects.lock();
        match objects.get(&canonical) {
            Some(entry) if (entry.mode == ObjectMode::Dir) == want_dir => Ok(Object {
                path: canonical,
                content_length: entry.content.len() as u64,
                last_modified: Some(entry.last_modified),
                mode: entry.mode,
            }),
            _ => Err(Error::NotFound),
        }
    }

    fn read(&self, path: &str, writer: &mut dyn Write, offset: u64, size: u64) -> Result<u64> {
        let objects = self.objects.lock();
        let entry = objects.get(path).ok_or(Error::NotFound)?;
        let start = (offset as usize).min(entry.content.len());
        let end = ((offset + size) as usize).min(entry.content.len());
        let slice = &entry.content[start..end];
        writer.write_all(slice)?;
        Ok(slice.len() as u64)
    }

    fn write(&self, path: &str, reader: &mut dyn Read, size: u64) -> Result<u64> {
        let mut buf = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut buf)?;
        let n = buf.len() as u64;
        self.objects.lock().insert(
            path.to_string(),
            Entry {
                content: buf,
                mode: ObjectMode::File,
                last_modified: SystemTime::now(),
            },
        );
        Ok(n)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let (canonical, _) = Self::canonicalize(path);
        self.objects.lock().remove(&canonical);
        Ok(())
    }

    fn list(&self, path: &str) -> Result<Box<dyn ObjectIterator>> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let objects = self.objects.lock();
        let mut names: Vec<Object> = objects
            .iter()
            .filter_map(|(p, entry)| {
                let rest = p.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    return None;
                }
                Some(Object {
                    path: p.clone(),
                    content_length: entry.content.len() as u64,
                    last_modified: Some(entry.last_modified),
                    mode: entry.mode,
                })
            })
            .collect();
        names.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Box::new(MemoryListing { entries: names.into_iter() }))
    }

    fn as_multipart(&self) -> Option<&dyn Multipart> {
        Some(self)
    }

    fn as_dir_creator(&self) -> Option<&dyn DirCreator> {
        Some(self)
    }
}

impl DirCreator for MemoryBackend {
    fn create_dir(&self, path: &str) -> Result<Object> {
        let (canonical, _) = MemoryBackend::canonicalize(path);
        let now = SystemTime::now();
        self.objects.lock().insert(
            canonical.clone(),
            Entry {
                content: Vec::new(),
                mode: ObjectMode::Dir,
                last_modified: now,
            },
        );
        Ok(Object {
            path: canonical,
            content_length: 0,
            last_modified: Some(now),
            mode: ObjectMode::Dir,
        })
    }
}

impl Multipart for MemoryBackend {
    fn create_multipart(&self, path: &str) -> Result<MultipartUpload> {
        let id = self.next_upload_id.fetch_add(1, Ordering::SeqCst);
        let upload_id = id.to_string();
        self.uploads.lock().insert(upload_id.clone(), BTreeMap::new());
        Ok(MultipartUpload {
            path: path.to_string(),
            upload_id,
        })
    }

    fn write_multipart(
        &self,
        upload: &MultipartUpload,
        reader: &mut dyn Read,
        size: u64,
        part_number: u64,
    ) -> Result<Part> {
        let mut buf = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut buf)?;
        let mut uploads = self.uploads.lock();
        let parts = uploads.get_mut(&upload.upload_id).ok_or(Error::NotFound)?;
        parts.insert(part_number, buf);
        Ok(Part {
            part_number,
            etag: format!("etag-{}-{}", upload.upload_id, part_number),
        })
    }

    fn complete_multipart(&self, upload: &MultipartUpload, parts: &[Part]) -> Result<()> {
        let mut uploads = self.uploads.lock();
        let staged = uploads.remove(&upload.upload_id).ok_or(Error::NotFound)?;
        let mut content = Vec::new();
        for part in parts {
            let bytes = staged.get(&part.part_number).ok_or(Error::NotFound)?;
            content.extend_from_slice(bytes);
        }
        drop(uploads);
        self.objects.lock().insert(
            upload.path.clone(),
            Entry {
                content,
                mode: ObjectMode::File,
                last_modified: SystemTime::now(),
            },
        );
        Ok(())
    }
}

struct MemoryListing {
    entries: std::vec::IntoIter<Object>,
}

impl ObjectIterator for MemoryListing {
    fn next_object(&mut self) -> Result<Option<Object>> {
        Ok(self.entries.next())
    }
}
