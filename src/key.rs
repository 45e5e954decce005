//! Key schema for the metadata index (design doc §3.2).
//!
//! Two prefixed key families share the index's key space:
//!
//! - `i:<id>` looks up an inode by identifier.
//! - `d:<parent_id>:<name>` looks up a child inode by parent and name, and
//!   supports prefix iteration over a directory's children.

const INODE_PREFIX: u8 = b'i';
const ENTRY_PREFIX: u8 = b'd';
const SEP: u8 = b':';

/// Build the `i:<id>` key for an inode.
pub fn inode_key(id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + 20);
    buf.push(INODE_PREFIX);
    buf.push(SEP);
    buf.extend_from_slice(id.to_string().as_bytes());
    buf
}

/// Build the `d:<parent_id>:<name>` key for a directory entry.
pub fn entry_key(parent_id: u64, name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + 20 + 1 + name.len());
    buf.push(ENTRY_PREFIX);
    buf.push(SEP);
    buf.extend_from_slice(parent_id.to_string().as_bytes());
    buf.push(SEP);
    buf.extend_from_slice(name.as_bytes());
    buf
}

/// Build the `d:<parent_id>:` prefix used to scan all children of a
/// directory.
pub fn entry_prefix(parent_id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + 20 + 1);
    buf.push(ENTRY_PREFIX);
    buf.push(SEP);
    buf.extend_from_slice(parent_id.to_string().as_bytes());
    buf.push(SEP);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_key_is_stable() {
        assert_eq!(inode_key(1), b"i:1");
        assert_eq!(inode_key(42), b"i:42");
    }

    #[test]
    fn entry_key_embeds_parent_and_name() {
        assert_eq!(entry_key(1, "hello"), b"d:1:hello");
    }

    #[test]
    fn entry_prefix_is_a_prefix_of_entry_key() {
        let prefix = entry_prefix(7);
        let key = entry_key(7, "world");
        assert!(key.starts_with(&prefix));
    }

    #[test]
    fn entry_prefix_does_not_collide_across_parents() {
        // The separator after the parent id means d:1: is never a prefix
        // of an entry belonging to parent 12, even though "1" is a
        // textual prefix of "12".
        let p1 = entry_prefix(1);
        assert!(!entry_key(12, "x").starts_with(&p1));
    }
}
