//! The persistent inode record (design doc §3.1, §4.4).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reserved id of the root directory. The root's `parent_id` equals its
/// own `id`.
pub const ROOT_ID: u64 = 1;

/// Reserved for NFS-style reuse detection; this core never reuses an
/// inode id within a process lifetime, so every inode carries the same
/// constant generation.
pub const GENERATION: u64 = 1;

/// Directory bit within [`Inode::mode`], chosen to match the POSIX
/// `S_IFDIR` bit so a platform adapter can pass `mode` straight through
/// to `FileAttr`/`fuse_attr` without reinterpreting it.
pub const S_IFDIR: u32 = 0o040000;
/// Regular-file bit within [`Inode::mode`], matching POSIX `S_IFREG`.
pub const S_IFREG: u32 = 0o100000;

const DEFAULT_DIR_PERM: u32 = 0o755;
const DEFAULT_FILE_PERM: u32 = 0o644;

/// A timestamp with sub-second precision, serialized as whole seconds
/// plus a nanosecond remainder so round-tripping through the compact
/// binary encoding never loses precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub secs: i64,
    /// Nanoseconds within the second.
    pub nanos: u32,
}

impl Timestamp {
    /// A fixed point in time, useful for zero-valued attributes.
    pub const EPOCH: Timestamp = Timestamp { secs: 0, nanos: 0 };

    /// Capture the current wall-clock time.
    pub fn now() -> Self {
        Timestamp::from(SystemTime::now())
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp {
                secs: d.as_secs() as i64,
                nanos: d.subsec_nanos(),
            },
            Err(e) => {
                let d = e.duration();
                Timestamp {
                    secs: -(d.as_secs() as i64),
                    nanos: d.subsec_nanos(),
                }
            }
        }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(t: Timestamp) -> Self {
        if t.secs >= 0 {
            UNIX_EPOCH + Duration::new(t.secs as u64, t.nanos)
        } else {
            UNIX_EPOCH - Duration::new((-t.secs) as u64, t.nanos)
        }
    }
}

/// The persistent record for every file or directory the filesystem has
/// ever observed.
///
/// Stored twice in the metadata index (`i:<id>` and `d:<parent_id>:<name>`,
/// see [`crate::key`]) under the same serialized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    /// Unique, monotonically allocated identifier. `1` is the root.
    pub id: u64,
    /// The `id` of the containing directory; equals `id` for the root.
    pub parent_id: u64,
    /// The backend object path: leading segments joined by `/`, no
    /// leading slash, empty for the root.
    pub path: String,
    /// The final path segment.
    pub name: String,
    /// Constant `1`, reserved for NFS-style reuse detection.
    pub generation: u64,
    /// Content length in bytes; `0` for directories.
    pub size: u64,
    /// Platform-neutral mode bits, including the directory flag.
    pub mode: u32,
    /// Last-access time.
    pub atime: Timestamp,
    /// Last-modification time.
    pub mtime: Timestamp,
    /// Last metadata-change time.
    pub ctime: Timestamp,
}

impl Inode {
    /// Build the root inode. The root has no `d:` entry and its
    /// `parent_id` is its own `id`.
    pub fn root() -> Self {
        let now = Timestamp::now();
        Inode {
            id: ROOT_ID,
            parent_id: ROOT_ID,
            path: String::new(),
            name: String::new(),
            generation: GENERATION,
            size: 0,
            mode: S_IFDIR | DEFAULT_DIR_PERM,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Build a freshly allocated inode for a non-root file or directory.
    pub fn new_child(id: u64, parent_id: u64, path: String, name: String, is_dir: bool, size: u64) -> Self {
        let now = Timestamp::now();
        let mode = if is_dir {
            S_IFDIR | DEFAULT_DIR_PERM
        } else {
            S_IFREG | DEFAULT_FILE_PERM
        };
        Inode {
            id,
            parent_id,
            path,
            name,
            generation: GENERATION,
            size,
            mode,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Whether this inode represents a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFDIR != 0
    }

    /// Whether this inode is the filesystem root.
    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    /// Encode this inode using the crate's compact, self-describing
    /// binary encoding (MessagePack via `rmp-serde`). `decode(encode(x))
    /// == x` for every field, including sub-second timestamp precision.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Decode an inode previously produced by [`Inode::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Inode {
        Inode {
            id: 2,
            parent_id: 1,
            path: "a/b".to_string(),
            name: "b".to_string(),
            generation: GENERATION,
            size: 1234,
            mode: S_IFREG | 0o644,
            atime: Timestamp { secs: 100, nanos: 123_456_789 },
            mtime: Timestamp { secs: 200, nanos: 1 },
            ctime: Timestamp { secs: 300, nanos: 0 },
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let ino = sample();
        let bytes = ino.encode().unwrap();
        let decoded = Inode::decode(&bytes).unwrap();
        assert_eq!(ino, decoded);
    }

    #[test]
    fn round_trip_preserves_subsecond_timestamp_precision() {
        let ino = sample();
        let decoded = Inode::decode(&ino.encode().unwrap()).unwrap();
        assert_eq!(decoded.atime.nanos, 123_456_789);
    }

    #[test]
    fn root_is_its_own_parent() {
        let root = Inode::root();
        assert_eq!(root.id, ROOT_ID);
        assert_eq!(root.parent_id, root.id);
        assert!(root.is_dir());
        assert!(root.is_root());
    }

    #[test]
    fn new_child_sets_file_kind_bits() {
        let file = Inode::new_child(2, 1, "f".into(), "f".into(), false, 5);
        assert!(!file.is_dir());
        let dir = Inode::new_child(3, 1, "d".into(), "d".into(), true, 0);
        assert!(dir.is_dir());
    }
}
