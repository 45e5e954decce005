//! A thin demonstration adapter wiring [`objectfs::Fs`] up to the `fuser`
//! crate's kernel-protocol surface.
//!
//! This binary exists to show the façade is actually mountable; its
//! correctness is explicitly not part of the core crate's guarantees
//! (design doc §1, §9). It decodes just enough of the FUSE protocol to
//! drive the operations listed in the design doc's kernel filesystem
//! protocol surface (§6) and leaves everything else (xattrs, links,
//! locks, rename, `mknod`) to `Filesystem`'s own `ENOSYS` defaults.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyDirectoryPlus, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
};
use parking_lot::Mutex;

use objectfs::backend::memory::MemoryBackend;
use objectfs::cache::memory::MemoryCacheStore;
use objectfs::handle::{DirHandle, FileHandle};
use objectfs::kv::SledIndex;
use objectfs::{Config, Error, Fs, Inode};

/// How long the kernel may cache an entry or its attributes before
/// re-checking with us. The VFS core has no notion of cache invalidation
/// beyond what `forget`/`release` already express, so a short fixed TTL
/// is the only honest answer here.
const ATTR_TTL: Duration = Duration::from_secs(1);

fn to_errno(err: &Error) -> i32 {
    match err.to_errno_name() {
        "ENOENT" => libc::ENOENT,
        "EINVAL" => libc::EINVAL,
        "EACCES" => libc::EACCES,
        "ENOSYS" => libc::ENOSYS,
        "EIO" => libc::EIO,
        "EAGAIN" => libc::EAGAIN,
        other => {
            log::warn!("unmapped errno name {other:?}, falling back to EIO");
            libc::EIO
        }
    }
}

fn attr_from(inode: &Inode) -> FileAttr {
    let blocks = inode.size.div_ceil(512);
    let atime: SystemTime = inode.atime.into();
    let mtime: SystemTime = inode.mtime.into();
    let ctime: SystemTime = inode.ctime.into();
    FileAttr {
        ino: inode.id,
        size: inode.size,
        blocks,
        atime,
        mtime,
        ctime,
        crtime: ctime,
        kind: if inode.is_dir() { FileType::Directory } else { FileType::RegularFile },
        perm: (inode.mode & 0o7777) as u16,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

/// Translate a `TimeOrNow` setattr argument into the core's `Timestamp`.
fn resolve_time(t: fuser::TimeOrNow) -> objectfs::inode::Timestamp {
    match t {
        fuser::TimeOrNow::SpecificTime(t) => t.into(),
        fuser::TimeOrNow::Now => objectfs::inode::Timestamp::now(),
    }
}

/// Adapts [`objectfs::Fs`] to `fuser::Filesystem`. Kernel file handles
/// (`fh`) are exactly the handle ids [`Fs::open`]/[`Fs::open_dir`]
/// allocate; this struct's job is only to keep the `Arc<FileHandle>` /
/// `Arc<DirHandle>` alive for as long as the kernel holds that `fh`,
/// mirroring the handle tables already living inside [`Fs`] itself.
struct Adapter {
    fs: Arc<Fs>,
    files: Mutex<HashMap<u64, Arc<FileHandle>>>,
    dirs: Mutex<HashMap<u64, Arc<DirHandle>>>,
}

impl Adapter {
    fn new(fs: Arc<Fs>) -> Self {
        Adapter {
            fs,
            files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashMap::new()),
        }
    }
}

impl Filesystem for Adapter {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.get_entry(parent, name) {
            Ok(Some(inode)) => reply.entry(&ATTR_TTL, &attr_from(&inode), 0),
            Ok(None) => reply.error(libc::ENOENT),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        if let Err(err) = self.fs.forget_inode(ino) {
            log::warn!("forget({ino}): {err}");
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.fs.get_inode(ino) {
            Ok(Some(inode)) => reply.attr(&ATTR_TTL, &attr_from(&inode)),
            Ok(None) => reply.error(libc::ENOENT),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = objectfs::AttrChanges {
            mode,
            atime: atime.map(resolve_time),
            mtime: mtime.map(resolve_time),
            size,
        };
        match self.fs.setattr(ino, changes) {
            Ok(inode) => reply.attr(&ATTR_TTL, &attr_from(&inode)),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        match self.fs.get_inode(ino) {
            Ok(Some(_)) => reply.ok(),
            Ok(None) => reply.error(libc::ENOENT),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.create(parent, name) {
            Ok((inode, handle)) => {
                self.files.lock().insert(handle.id, handle.clone());
                reply.created(&ATTR_TTL, &attr_from(&inode), 0, handle.id, 0);
            }
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let inode = match self.fs.get_inode(ino) {
            Ok(Some(inode)) => inode,
            Ok(None) => {
                reply.error(libc::ENOENT);
                return;
            }
            Err(err) => {
                reply.error(to_errno(&err));
                return;
            }
        };
        match self.fs.open(inode) {
            Ok(handle) => {
                self.files.lock().insert(handle.id, handle.clone());
                reply.opened(handle.id, 0);
            }
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(handle) = self.files.lock().get(&fh).cloned() else {
            reply.error(libc::EBADF);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match handle.read(offset as u64, &mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(handle) = self.files.lock().get(&fh).cloned() else {
            reply.error(libc::EBADF);
            return;
        };
        match handle.write(offset as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.fs.flush(fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.files.lock().remove(&fh);
        match self.fs.release_file(fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.fs.flush(fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let inode = match self.fs.get_inode(ino) {
            Ok(Some(inode)) => inode,
            Ok(None) => {
                reply.error(libc::ENOENT);
                return;
            }
            Err(err) => {
                reply.error(to_errno(&err));
                return;
            }
        };
        match self.fs.open_dir(inode) {
            Ok(handle) => {
                self.dirs.lock().insert(handle.id, handle.clone());
                reply.opened(handle.id, 0);
            }
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(handle) = self.dirs.lock().get(&fh).cloned() else {
            reply.error(libc::EBADF);
            return;
        };
        // The handle's iterator is one-shot and non-restartable (design
        // doc §4.2); a real adapter would need to replay the sequence
        // from `offset` for a correctly resumable readdir. This thin
        // demo assumes the kernel drains the stream in a single pass.
        let mut next_offset = offset + 1;
        loop {
            match handle.next() {
                Ok(Some(child)) => {
                    let kind = if child.is_dir() { FileType::Directory } else { FileType::RegularFile };
                    if reply.add(child.id, next_offset, kind, &child.name) {
                        break;
                    }
                    next_offset += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    reply.error(to_errno(&err));
                    return;
                }
            }
        }
        reply.ok();
    }

    fn readdirplus(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectoryPlus) {
        let Some(handle) = self.dirs.lock().get(&fh).cloned() else {
            reply.error(libc::EBADF);
            return;
        };
        let mut next_offset = offset + 1;
        loop {
            match handle.next() {
                Ok(Some(child)) => {
                    let attr = attr_from(&child);
                    if reply.add(child.id, next_offset, &child.name, &ATTR_TTL, &attr, 0) {
                        break;
                    }
                    next_offset += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    reply.error(to_errno(&err));
                    return;
                }
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.dirs.lock().remove(&fh);
        self.fs.release_dir(fh);
        reply.ok();
    }

    fn fsyncdir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.fs.statfs();
        reply.statfs(
            stats.blocks,
            stats.blocks_free,
            stats.blocks_free,
            0,
            0,
            stats.block_size as u32,
            255,
            stats.block_size as u32,
        );
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.delete(parent, name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(to_errno(&err)),
        }
    }
}

fn main() {
    env_logger::init();

    let mountpoint = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: objectfs-mount <mountpoint>");
        std::process::exit(2);
    });

    // Process startup and connection-string parsing for a real backend
    // are out of scope for the core crate (design doc §1, §6); this
    // demo always mounts a fresh in-memory backend and an in-memory
    // metadata index, which is enough to exercise the façade end to end.
    let fs = Fs::new(Config {
        kv: Arc::new(SledIndex::in_memory().expect("open in-memory metadata index")),
        backend: Arc::new(MemoryBackend::new()),
        cache: Arc::new(MemoryCacheStore::new()),
        upload: Default::default(),
    })
    .expect("initialize filesystem");

    let options = vec![MountOption::FSName("objectfs".to_string()), MountOption::AutoUnmount];
    fuser::mount2(Adapter::new(fs), &mountpoint, &options).expect("mount filesystem");
}
