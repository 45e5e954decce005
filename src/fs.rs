//! The FS façade (design doc §4.1): the operation surface a kernel
//! adapter calls into.

use std::sync::Arc;

use crate::backend::{Object, ObjectMode, ObjectStore};
use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::handle::{DirHandle, FileHandle, HandleTable, IdAllocator};
use crate::inode::{Inode, ROOT_ID};
use crate::key;
use crate::kv::KvIndex;
use crate::upload::{UploadEngine, UploadEngineConfig};

/// Fixed, nominal `statfs` values (design doc §6). Object backends do
/// not report real free space, so these numbers are constants rather
/// than measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    /// Filesystem block size, in bytes.
    pub block_size: u64,
    /// Total space, in blocks.
    pub blocks: u64,
    /// Free space, in blocks. Always equal to `blocks`.
    pub blocks_free: u64,
}

const STATFS_BLOCK_SIZE: u64 = 4096;
const STATFS_TOTAL_BYTES: u64 = 1024 * 1024 * 1024 * 1024 * 1024; // 1 PiB

/// Attribute changes accepted by [`Fs::setattr`]. `size` changes are
/// rejected with [`Error::Unsupported`] (design doc §9): this core
/// never supports truncation or in-place extension, only append writes
/// through a write handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttrChanges {
    /// New mode bits, if the caller is changing them.
    pub mode: Option<u32>,
    /// New access time, if the caller is changing it.
    pub atime: Option<crate::inode::Timestamp>,
    /// New modification time, if the caller is changing it.
    pub mtime: Option<crate::inode::Timestamp>,
    /// A requested size change. Always rejected; present so the
    /// façade can distinguish "no change requested" from "rejected".
    pub size: Option<u64>,
}

/// Everything [`Fs`] needs to do its job, assembled by the embedder
/// (design doc §10.3). The core never parses a connection string or an
/// environment variable itself; that belongs to whatever binary wires
/// this crate up.
pub struct Config {
    /// The metadata index.
    pub kv: Arc<dyn KvIndex>,
    /// The object-storage backend, already constructed.
    pub backend: Arc<dyn ObjectStore>,
    /// The local cache store used to stage writes.
    pub cache: Arc<dyn CacheStore>,
    /// Upload engine tuning knobs.
    pub upload: UploadEngineConfig,
}

/// The virtual filesystem core: owns the metadata index, the backend,
/// the handle tables, and the upload engine, and exposes the narrow
/// operation surface a kernel-protocol adapter drives (design doc
/// §4.1).
pub struct Fs {
    kv: Arc<dyn KvIndex>,
    backend: Arc<dyn ObjectStore>,
    upload_engine: Arc<UploadEngine>,
    /// Process-wide monotonic inode-id counter (design doc §5). Kept
    /// distinct from `handle_ids`: the two are disjoint namespaces, per
    /// `examples/original_source/vfs/fs.go`'s own `nextInode`/`nextHandle`.
    ids: IdAllocator,
    /// Process-wide monotonic handle-id counter (design doc §5).
    handle_ids: IdAllocator,
    files: HandleTable<FileHandle>,
    dirs: HandleTable<DirHandle>,
}

impl Fs {
    /// Assemble a filesystem from its configured dependencies. Ensures
    /// the root inode exists in the index.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let upload_engine = UploadEngine::new(config.backend.clone(), config.cache.clone(), config.upload);
        let fs = Arc::new(Fs {
            kv: config.kv,
            backend: config.backend,
            upload_engine,
            ids: IdAllocator::starting_at(ROOT_ID + 1),
            handle_ids: IdAllocator::starting_at(1),
            files: HandleTable::new(),
            dirs: HandleTable::new(),
        });
        fs.ensure_root()?;
        Ok(fs)
    }

    fn ensure_root(&self) -> Result<()> {
        if self.kv.get(&key::inode_key(ROOT_ID))?.is_some() {
            return Ok(());
        }
        let root = Inode::root();
        self.kv.set(&key::inode_key(ROOT_ID), &root.encode()?)?;
        Ok(())
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ObjectStore> {
        &self.backend
    }

    pub(crate) fn upload_engine(&self) -> &Arc<UploadEngine> {
        &self.upload_engine
    }

    /// Load an inode by identifier.
    pub fn get_inode(&self, id: u64) -> Result<Option<Inode>> {
        match self.kv.get(&key::inode_key(id))? {
            Some(bytes) => Ok(Some(Inode::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a child inode by parent and name, falling back to a
    /// backend `stat` (and repairing the `d:` entry) on a KV miss
    /// (design doc §4.1, §8 "`get_entry` repair").
    pub fn get_entry(&self, parent_id: u64, name: &str) -> Result<Option<Inode>> {
        match self.kv.get(&key::entry_key(parent_id, name))? {
            Some(bytes) => Ok(Some(Inode::decode(&bytes)?)),
            None => self.stat(parent_id, name),
        }
    }

    /// Stat `name` under `parent_id` against the backend directly,
    /// allocating and persisting a fresh inode on success. Tries the
    /// plain path first, then the directory-marker path (design doc
    /// §4.1).
    pub fn stat(&self, parent_id: u64, name: &str) -> Result<Option<Inode>> {
        let parent_path = self.path_for(parent_id)?;
        let child_path = join_path(&parent_path, name);

        let object = match self.backend.stat(&child_path) {
            Ok(object) => object,
            Err(Error::NotFound) => match self.backend.stat(&format!("{child_path}/")) {
                Ok(object) => object,
                Err(Error::NotFound) => return Ok(None),
                Err(err) => return Err(err),
            },
            Err(err) => return Err(err),
        };

        Ok(Some(self.entry_for_object(parent_id, name, &object)?))
    }

    /// Allocate an inode for a backend object observed under
    /// `parent_id` as `name`, persisting both the `i:` and `d:`
    /// records. Shared by [`Fs::stat`] and [`DirHandle::next`] (design
    /// doc §4.2).
    pub(crate) fn entry_for_object(&self, parent_id: u64, name: &str, object: &Object) -> Result<Inode> {
        if let Some(bytes) = self.kv.get(&key::entry_key(parent_id, name))? {
            return Ok(Inode::decode(&bytes)?);
        }
        let parent_path = self.path_for(parent_id)?;
        let path = join_path(&parent_path, name);
        let id = self.ids.next();
        let inode = Inode::new_child(id, parent_id, path, name.to_string(), object.mode == ObjectMode::Dir, object.content_length);
        self.persist(&inode)?;
        Ok(inode)
    }

    /// Create a zero-byte object, allocate and persist its inode, and
    /// open a write handle against it (design doc §4.1).
    pub fn create(self: &Arc<Self>, parent_id: u64, name: &str) -> Result<(Inode, Arc<FileHandle>)> {
        let parent_path = self.path_for(parent_id)?;
        let path = join_path(&parent_path, name);
        self.backend.write(&path, &mut std::io::empty(), 0)?;

        let id = self.ids.next();
        let inode = Inode::new_child(id, parent_id, path, name.to_string(), false, 0);
        self.persist(&inode)?;
        log::debug!("create: allocated inode {id} at parent {parent_id} name {name}");

        let handle = self.open(inode.clone())?;
        handle.prepare_write()?;
        Ok((inode, handle))
    }

    /// Delete `name` under `parent_id`: removes the backend object and
    /// both KV records for the entry (design doc §4.1).
    pub fn delete(&self, parent_id: u64, name: &str) -> Result<()> {
        let entry = self.get_entry(parent_id, name)?.ok_or(Error::NotFound)?;
        self.backend.delete(&entry.path)?;
        self.kv.delete(&key::inode_key(entry.id))?;
        self.kv.delete(&key::entry_key(parent_id, name))?;
        Ok(())
    }

    /// Allocate a handle id and register a new file handle against
    /// `inode`.
    pub fn open(self: &Arc<Self>, inode: Inode) -> Result<Arc<FileHandle>> {
        let id = self.handle_ids.next();
        let handle = Arc::new(FileHandle::new(id, inode, self.clone()));
        self.files.set(id, handle.clone());
        log::debug!("open: allocated file handle {id}");
        Ok(handle)
    }

    /// Allocate a handle id and register a new directory handle
    /// against `inode`, backed by a shallow listing of its backend
    /// path.
    pub fn open_dir(self: &Arc<Self>, inode: Inode) -> Result<Arc<DirHandle>> {
        let iterator = self.backend.list(&inode.path)?;
        let id = self.handle_ids.next();
        let handle = Arc::new(DirHandle::new(id, inode, self.clone(), iterator));
        self.dirs.set(id, handle.clone());
        log::debug!("open_dir: allocated directory handle {id}");
        Ok(handle)
    }

    /// Close a file handle. For a write handle, finalizes the upload
    /// (design doc §4.6) before de-registering, then refreshes the
    /// persisted inode's size to match what was actually written —
    /// the upload engine writes straight to the backend, bypassing the
    /// inode record, so the index would otherwise still show the
    /// zero-byte size `create` recorded.
    pub fn release_file(&self, handle_id: u64) -> Result<()> {
        if let Some(handle) = self.files.delete(handle_id) {
            let size = handle.close_for_write()?;
            if let Some(mut inode) = self.get_inode(handle.inode.id)? {
                inode.size = size;
                inode.mtime = crate::inode::Timestamp::now();
                self.persist(&inode)?;
            }
        }
        log::debug!("release: file handle {handle_id}");
        Ok(())
    }

    /// Close a directory handle.
    pub fn release_dir(&self, handle_id: u64) {
        self.dirs.delete(handle_id);
        log::debug!("release: directory handle {handle_id}");
    }

    /// Remove the `i:` and `d:` records for `id`. Idempotent (design
    /// doc §8 "idempotent forget").
    pub fn forget_inode(&self, id: u64) -> Result<()> {
        if let Some(inode) = self.get_inode(id)? {
            self.kv.delete(&key::inode_key(id))?;
            self.kv.delete(&key::entry_key(inode.parent_id, &inode.name))?;
        }
        Ok(())
    }

    /// Apply the subset of attribute changes this core supports
    /// (design doc §9): `mode`, `atime`, `mtime` are merged into the
    /// persisted record; a `size` change is rejected.
    pub fn setattr(&self, id: u64, changes: AttrChanges) -> Result<Inode> {
        if changes.size.is_some() {
            log::warn!("setattr({id}): size change is not supported");
            return Err(Error::Unsupported("setattr: size change"));
        }
        let mut inode = self.get_inode(id)?.ok_or(Error::NotFound)?;
        if let Some(mode) = changes.mode {
            inode.mode = mode;
        }
        if let Some(atime) = changes.atime {
            inode.atime = atime;
        }
        if let Some(mtime) = changes.mtime {
            inode.mtime = mtime;
        }
        inode.ctime = crate::inode::Timestamp::now();
        self.persist(&inode)?;
        Ok(inode)
    }

    /// Fixed, nominal filesystem statistics (design doc §6).
    pub fn statfs(&self) -> FsStats {
        FsStats {
            block_size: STATFS_BLOCK_SIZE,
            blocks: STATFS_TOTAL_BYTES / STATFS_BLOCK_SIZE,
            blocks_free: STATFS_TOTAL_BYTES / STATFS_BLOCK_SIZE,
        }
    }

    /// Best-effort drain for a write handle (design doc §9): waits for
    /// the coordinator to catch up with every frame submitted so far.
    /// Not full durability — that still requires `release`/`close`.
    pub fn flush(&self, handle_id: u64) -> Result<()> {
        let handle = self.files.get(handle_id).ok_or(Error::NotFound)?;
        handle.flush();
        Ok(())
    }

    fn path_for(&self, id: u64) -> Result<String> {
        if id == ROOT_ID {
            return Ok(String::new());
        }
        Ok(self.get_inode(id)?.ok_or(Error::NotFound)?.path)
    }

    fn persist(&self, inode: &Inode) -> Result<()> {
        let bytes = inode.encode()?;
        self.kv.set(&key::inode_key(inode.id), &bytes)?;
        if !inode.is_root() {
            self.kv.set(&key::entry_key(inode.parent_id, &inode.name), &bytes)?;
        }
        Ok(())
    }
}

fn join_path(parent_path: &str, name: &str) -> String {
    if parent_path.is_empty() {
        name.to_string()
    } else {
        format!("{parent_path}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::cache::memory::MemoryCacheStore;
    use crate::kv::SledIndex;

    fn test_fs() -> Arc<Fs> {
        Fs::new(Config {
            kv: Arc::new(SledIndex::in_memory().unwrap()),
            backend: Arc::new(MemoryBackend::new()),
            cache: Arc::new(MemoryCacheStore::new()),
            upload: UploadEngineConfig::default(),
        })
        .unwrap()
    }

    #[test]
    fn create_read_write_round_trip() {
        let fs = test_fs();
        let (inode, handle) = fs.create(ROOT_ID, "hello").unwrap();
        assert_eq!(inode.path, "hello");
        assert_eq!(handle.write(0, b"world").unwrap(), 5);
        fs.release_file(handle.id).unwrap();

        let entry = fs.get_entry(ROOT_ID, "hello").unwrap().unwrap();
        assert_eq!(entry.size, 5);
        let read_handle = fs.open(entry).unwrap();
        let mut buf = [0u8; 5];
        let n = read_handle.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[test]
    fn random_write_is_rejected() {
        let fs = test_fs();
        let (_inode, handle) = fs.create(ROOT_ID, "f").unwrap();
        handle.write(0, b"abcde").unwrap();
        assert!(matches!(handle.write(3, b"X"), Err(Error::RandomWrite { .. })));
        assert_eq!(handle.write(5, b"Y").unwrap(), 1);
        fs.release_file(handle.id).unwrap();
    }

    #[test]
    fn delete_removes_object_and_kv_records() {
        let fs = test_fs();
        let (_inode, handle) = fs.create(ROOT_ID, "t").unwrap();
        fs.release_file(handle.id).unwrap();
        fs.delete(ROOT_ID, "t").unwrap();
        assert!(fs.get_entry(ROOT_ID, "t").unwrap().is_none());
    }

    #[test]
    fn forget_inode_is_idempotent() {
        let fs = test_fs();
        let (inode, handle) = fs.create(ROOT_ID, "f").unwrap();
        fs.release_file(handle.id).unwrap();
        fs.forget_inode(inode.id).unwrap();
        fs.forget_inode(inode.id).unwrap();
    }

    #[test]
    fn setattr_rejects_size_change() {
        let fs = test_fs();
        let (inode, handle) = fs.create(ROOT_ID, "f").unwrap();
        fs.release_file(handle.id).unwrap();
        let err = fs
            .setattr(
                inode.id,
                AttrChanges {
                    size: Some(10),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn setattr_merges_mode() {
        let fs = test_fs();
        let (inode, handle) = fs.create(ROOT_ID, "f").unwrap();
        fs.release_file(handle.id).unwrap();
        let updated = fs
            .setattr(
                inode.id,
                AttrChanges {
                    mode: Some(0o100600),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.mode, 0o100600);
    }

    #[test]
    fn get_entry_repairs_missing_kv_record() {
        let fs = test_fs();
        fs.backend.as_dir_creator().unwrap().create_dir("dir").unwrap();
        let first = fs.get_entry(ROOT_ID, "dir").unwrap().unwrap();
        assert!(first.is_dir());
        assert!(fs.kv.get(&key::entry_key(ROOT_ID, "dir")).unwrap().is_some());
    }

    #[test]
    fn directory_listing_exhausts() {
        let fs = test_fs();
        for name in ["a", "b", "c"] {
            let (_inode, handle) = fs.create(ROOT_ID, name).unwrap();
            fs.release_file(handle.id).unwrap();
        }
        let root = fs.get_inode(ROOT_ID).unwrap().unwrap();
        let dir = fs.open_dir(root).unwrap();
        let mut names = Vec::new();
        while let Some(inode) = dir.next().unwrap() {
            assert_eq!(inode.parent_id, ROOT_ID);
            names.push(inode.name);
        }
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(dir.next().unwrap().is_none());
    }

    #[test]
    fn multipart_crossover_at_64_mib() {
        let fs = test_fs();
        let (_inode, handle) = fs.create(ROOT_ID, "big").unwrap();
        let chunk = vec![b'x'; 4 * 1024 * 1024];
        for i in 0..17u64 {
            handle.write(i * chunk.len() as u64, &chunk).unwrap();
        }
        fs.release_file(handle.id).unwrap();

        let entry = fs.get_entry(ROOT_ID, "big").unwrap().unwrap();
        assert_eq!(entry.size, 17 * chunk.len() as u64);
    }
}
