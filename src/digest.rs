use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Self-describing digest of some content, e.g.
/// `"sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"`.
/// The algorithm prefix keeps stored digests meaningful if the hash function
/// ever changes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn finalize(hasher: Sha256) -> ContentDigest {
    ContentDigest(format!("sha256:{:x}", hasher.finalize()))
}

/// Digest of an in-memory byte string.
pub fn bytes_digest(data: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finalize(hasher)
}

/// Read buffer for streaming digests. Coarse, so that the per-chunk progress
/// callback stays cheap relative to the I/O it reports on.
const READ_CHUNK_SIZE: usize = 1 << 20;

/// Digest the content of a file, streaming it through the hasher.
/// `data_read` is called with the size of each chunk read.
pub fn file_digest(
    path: &Path,
    data_read: &mut dyn FnMut(u64),
) -> std::io::Result<ContentDigest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;

        if read == 0 {
            break;
        }

        hasher.update(&buffer[..read]);
        data_read(read as u64);
    }

    Ok(finalize(hasher))
}
