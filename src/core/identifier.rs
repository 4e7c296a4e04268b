use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Name of a logical database group ("orders", "users", ...).
///
/// Cheap to clone; used as the key of every registry in the router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Arc<str>);

impl Identifier {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Identifier {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

/// Replica role of an engine inside its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Master,
    Slave,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Slave => write!(f, "slave"),
        }
    }
}

/// Sharding key used to pick one engine out of a role's sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShardKey {
    Int(i64),
    Uint(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl ShardKey {
    /// Maps the key onto `0..count`.
    ///
    /// Integer keys map by value so that consecutive ids spread evenly;
    /// text and byte keys go through FNV-1a.
    pub fn shard_index(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        match self {
            Self::Int(v) => v.rem_euclid(count as i64) as usize,
            Self::Uint(v) => (*v % count as u64) as usize,
            Self::Text(s) => (fnv1a(s.as_bytes()) % count as u64) as usize,
            Self::Bytes(b) => (fnv1a(b) % count as u64) as usize,
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 14695981039346656037u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Uint(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for ShardKey {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ShardKey {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u64> for ShardKey {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<u32> for ShardKey {
    fn from(v: u32) -> Self {
        Self::Uint(v as u64)
    }
}

impl From<&str> for ShardKey {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ShardKey {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for ShardKey {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// Anything that names the group it lives in.
///
/// Records implement this so router calls can take the record itself instead
/// of an explicit identifier; `shard_key` lets a record carry its sharding key.
pub trait Identified {
    fn identifier(&self) -> Identifier;

    fn shard_key(&self) -> Option<ShardKey> {
        None
    }
}

impl Identified for Identifier {
    fn identifier(&self) -> Identifier {
        self.clone()
    }
}

impl Identified for str {
    fn identifier(&self) -> Identifier {
        Identifier::new(self)
    }
}

impl Identified for String {
    fn identifier(&self) -> Identifier {
        Identifier::new(self)
    }
}

impl<T: Identified + ?Sized> Identified for &T {
    fn identifier(&self) -> Identifier {
        (**self).identifier()
    }

    fn shard_key(&self) -> Option<ShardKey> {
        (**self).shard_key()
    }
}
