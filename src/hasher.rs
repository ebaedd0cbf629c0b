/// Content hashing for file identity.
///
/// Hashes are used only to confirm that a file is the same one a ledger
/// entry talks about. They are computed on demand and never cached, since
/// content may change between runs.
use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Size of each read when streaming a file through the hasher.
const CHUNK_SIZE: usize = 8192;

/// A SHA-256 digest of a file's full byte content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("invalid hex digest: {}", e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("digest has {} bytes, expected 32", v.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Streams a reader through SHA-256 in bounded chunks.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<ContentHash> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(ContentHash(hasher.finalize().into()))
}

/// Hashes the file at `path` without buffering it whole.
///
/// # Errors
///
/// Returns [`LifecycleError::HashUnreadable`] when the file cannot be opened
/// or read.
///
/// # Examples
///
/// ```no_run
/// use dirward::hasher::hash_file;
/// use std::path::Path;
///
/// let digest = hash_file(Path::new("/photos/IMG_0001.jpg")).unwrap();
/// println!("{}", digest);
/// ```
pub fn hash_file(path: &Path) -> LifecycleResult<ContentHash> {
    File::open(path)
        .and_then(hash_reader)
        .map_err(|source| LifecycleError::HashUnreadable {
            path: path.to_path_buf(),
            source,
        })
}

/// A file's path together with the digest of its content at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub hash: ContentHash,
}

impl FileIdentity {
    /// Hashes `path` now and pairs the digest with it.
    pub fn capture(path: &Path) -> LifecycleResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            hash: hash_file(path)?,
        })
    }

    /// Two identities are content-identical when their digests match,
    /// whatever their paths.
    pub fn same_content(&self, other: &FileIdentity) -> bool {
        self.hash == other.hash
    }
}
