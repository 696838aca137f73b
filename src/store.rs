use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Pure conversion between a domain value and its on-disk byte encoding.
/// The store itself knows nothing about the shape of the value.
pub trait Codec {
    type Value;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> Result<Self::Value>;
}

/// One JSON object per line. Tolerates an empty file (empty list), which is
/// what a freshly initialized store contains.
pub struct JsonLines<T>(PhantomData<T>);

impl<T> JsonLines<T> {
    pub fn new() -> Self {
        JsonLines(PhantomData)
    }
}

impl<T: Serialize + DeserializeOwned> Codec for JsonLines<T> {
    type Value = Vec<T>;

    fn encode(&self, value: &Vec<T>) -> Result<Vec<u8>> {
        let mut data = Vec::new();

        for item in value {
            serde_json::to_writer(&mut data, item)?;
            data.push(b'\n');
        }

        Ok(data)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<T>> {
        data.split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| Ok(serde_json::from_slice(line)?))
            .collect()
    }
}

/// A single JSON document.
pub struct JsonDocument<T>(PhantomData<T>);

impl<T> JsonDocument<T> {
    pub fn new() -> Self {
        JsonDocument(PhantomData)
    }
}

impl<T: Serialize + DeserializeOwned> Codec for JsonDocument<T> {
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Persists one value at a path. `save` goes through a sibling temp file
/// which is fsynced and then renamed over the target, so the canonical path
/// always holds either the previous or the new content, never a torn write.
pub struct Store<C> {
    path: PathBuf,
    codec: C,
}

/// Suffix of the transient sibling used during `save`.
const TEMP_SUFFIX: &str = "~";

impl<C: Codec> Store<C> {
    pub fn new(path: impl Into<PathBuf>, codec: C) -> Self {
        Store {
            path: path.into(),
            codec,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(TEMP_SUFFIX);
        self.path.with_file_name(name)
    }

    /// Read and decode the stored value. A missing file surfaces as an
    /// `io::Error` with kind `NotFound`, distinct from a decode failure of a
    /// malformed file.
    pub fn load(&self) -> Result<C::Value> {
        let data = fs::read(&self.path)
            .with_context(|| format!("failed to read `{}`", self.path.display()))?;

        self.codec
            .decode(&data)
            .with_context(|| format!("malformed store file `{}`", self.path.display()))
    }

    pub fn save(&self, value: &C::Value) -> Result<()> {
        let data = self.codec.encode(value)?;
        let temp_path = self.temp_path();

        let mut file = File::create(&temp_path)
            .with_context(|| format!("failed to create `{}`", temp_path.display()))?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("failed to replace `{}`", self.path.display()))?;

        Ok(())
    }
}
