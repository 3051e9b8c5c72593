//! External collaborators of the soundboard: slot metadata, audio blobs, the persisted volume and
//! the static default assets.
//!
//! Each collaborator is a trait with an in-memory implementation and a filesystem one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::audio_engine::clamp_volume;
use crate::audio_engine::constants::DEFAULT_VOLUME;
use crate::slots::{Slot, SlotMetadata, default_slots, merge_metadata};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid slot metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid blob id: {0:?}")]
    InvalidBlobId(String),
}

/// Persists per-slot source overrides.
pub trait SlotStore {
    fn load_metadata(&self) -> Result<Vec<SlotMetadata>, StoreError>;

    fn save_metadata(&mut self, metadata: &[SlotMetadata]) -> Result<(), StoreError>;

    /// The slot grid with persisted overrides applied. Unreadable metadata yields the defaults.
    fn load(&self) -> Vec<Slot> {
        match self.load_metadata() {
            Ok(metadata) => merge_metadata(&metadata),
            Err(err) => {
                log::warn!("Failed to load slot metadata, using defaults: {err}");
                default_slots()
            }
        }
    }

    fn save(&mut self, slots: &[Slot]) -> Result<(), StoreError> {
        let metadata: Vec<SlotMetadata> = slots.iter().map(SlotMetadata::from).collect();
        self.save_metadata(&metadata)
    }
}

/// Key-value storage for uploaded and recorded audio.
pub trait BlobStore {
    fn put(&mut self, id: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// `Ok(None)` when no blob is stored under `id`.
    fn get(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Deleting a missing blob is not an error.
    fn delete(&mut self, id: &str) -> Result<(), StoreError>;

    fn list_ids(&self) -> Result<BTreeSet<String>, StoreError>;
}

/// The persisted 0-100 volume.
pub trait VolumeStore {
    /// The stored volume, or the default when nothing valid is stored.
    fn get(&self) -> u8;

    /// Stores `volume` clamped to 0..=100.
    fn set(&mut self, volume: i32) -> Result<(), StoreError>;
}

/// Retrieves the bytes of a static default asset by URL.
pub trait AssetFetcher {
    fn fetch(&self, url: &str) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Default)]
pub struct MemorySlotStore {
    metadata: Vec<SlotMetadata>,
}

impl SlotStore for MemorySlotStore {
    fn load_metadata(&self) -> Result<Vec<SlotMetadata>, StoreError> {
        Ok(self.metadata.clone())
    }

    fn save_metadata(&mut self, metadata: &[SlotMetadata]) -> Result<(), StoreError> {
        self.metadata = metadata.to_vec();
        Ok(())
    }
}

/// Slot metadata as a JSON array in a single file.
#[derive(Debug, Clone)]
pub struct JsonSlotStore {
    path: PathBuf,
}

impl JsonSlotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SlotStore for JsonSlotStore {
    fn load_metadata(&self) -> Result<Vec<SlotMetadata>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    fn save_metadata(&mut self, metadata: &[SlotMetadata]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(metadata)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl BlobStore for MemoryBlobStore {
    fn put(&mut self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.blobs.insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.get(id).cloned())
    }

    fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        self.blobs.remove(id);
        Ok(())
    }

    fn list_ids(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.blobs.keys().cloned().collect())
    }
}

/// One file per blob, named by its id.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    dir: PathBuf,
}

impl DirBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::InvalidBlobId(id.to_string()));
        }
        Ok(self.dir.join(id))
    }
}

impl BlobStore for DirBlobStore {
    fn put(&mut self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(id)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(id)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list_ids(&self) -> Result<BTreeSet<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                ids.insert(name.to_string());
            }
        }
        Ok(ids)
    }
}

#[derive(Debug, Default)]
pub struct MemoryVolumeStore {
    volume: Option<u8>,
}

impl VolumeStore for MemoryVolumeStore {
    fn get(&self) -> u8 {
        self.volume.unwrap_or(DEFAULT_VOLUME)
    }

    fn set(&mut self, volume: i32) -> Result<(), StoreError> {
        self.volume = Some(clamp_volume(volume));
        Ok(())
    }
}

/// The volume as a decimal integer in a text file.
#[derive(Debug, Clone)]
pub struct FileVolumeStore {
    path: PathBuf,
}

impl FileVolumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl VolumeStore for FileVolumeStore {
    fn get(&self) -> u8 {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    log::warn!("Failed to read volume from {}: {err}", self.path.display());
                }
                return DEFAULT_VOLUME;
            }
        };

        match text.trim().parse::<i32>() {
            Ok(volume) => clamp_volume(volume),
            Err(_) => DEFAULT_VOLUME,
        }
    }

    fn set(&mut self, volume: i32) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, clamp_volume(volume).to_string())?;
        Ok(())
    }
}

/// Serves assets from a map of URL to bytes.
#[derive(Debug, Default, Clone)]
pub struct MemoryAssetFetcher {
    assets: HashMap<String, Vec<u8>>,
}

impl MemoryAssetFetcher {
    pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(url.into(), bytes);
    }
}

impl AssetFetcher for MemoryAssetFetcher {
    fn fetch(&self, url: &str) -> io::Result<Vec<u8>> {
        self.assets
            .get(url)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no asset at {url}")))
    }
}

/// Resolves asset URLs such as `/sounds/dog.mp3` against a local directory.
#[derive(Debug, Clone)]
pub struct DirAssetFetcher {
    root: PathBuf,
}

impl DirAssetFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> io::Result<PathBuf> {
        let relative = Path::new(url.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("asset url escapes the asset root: {url}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetFetcher for DirAssetFetcher {
    fn fetch(&self, url: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(url)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::SlotSource;
    use tempfile::tempdir;

    #[test]
    fn test_json_slot_store_round_trip() {
        let dir = tempdir().unwrap();
        let mut store = JsonSlotStore::new(dir.path().join("state/slots.json"));
        assert_eq!(store.load(), default_slots());

        let mut slots = default_slots();
        slots[12].current_source = SlotSource::Upload {
            blob_id: "upload-custom-1-1".to_string(),
            file_name: "a.wav".to_string(),
        };
        store.save(&slots).unwrap();

        assert_eq!(store.load(), slots);
        let text = fs::read_to_string(dir.path().join("state/slots.json")).unwrap();
        assert!(text.contains("\"currentSource\""));
        assert!(text.contains("\"blobId\": \"upload-custom-1-1\""));
    }

    #[test]
    fn test_corrupt_metadata_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slots.json");
        fs::write(&path, "{not json").unwrap();
        let store = JsonSlotStore::new(&path);

        assert!(matches!(store.load_metadata(), Err(StoreError::Json(_))));
        assert_eq!(store.load(), default_slots());
    }

    #[test]
    fn test_dir_blob_store() {
        let dir = tempdir().unwrap();
        let mut store = DirBlobStore::new(dir.path().join("blobs"));
        assert!(store.list_ids().unwrap().is_empty());

        store.put("upload-custom-1-1", b"abc").unwrap();
        store.put("recording-custom-2-2", b"def").unwrap();

        assert_eq!(
            store.get("upload-custom-1-1").unwrap(),
            Some(b"abc".to_vec())
        );
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(
            store.list_ids().unwrap().into_iter().collect::<Vec<_>>(),
            ["recording-custom-2-2", "upload-custom-1-1"]
        );

        store.delete("upload-custom-1-1").unwrap();
        store.delete("upload-custom-1-1").unwrap();
        assert_eq!(store.get("upload-custom-1-1").unwrap(), None);
    }

    #[test]
    fn test_dir_blob_store_rejects_path_ids() {
        let dir = tempdir().unwrap();
        let mut store = DirBlobStore::new(dir.path());

        assert!(matches!(
            store.put("../escape", b"x"),
            Err(StoreError::InvalidBlobId(_))
        ));
        assert!(matches!(store.get(""), Err(StoreError::InvalidBlobId(_))));
        assert!(matches!(
            store.delete("a/b"),
            Err(StoreError::InvalidBlobId(_))
        ));
    }

    #[test]
    fn test_file_volume_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volume");
        let mut store = FileVolumeStore::new(&path);
        assert_eq!(store.get(), DEFAULT_VOLUME);

        store.set(35).unwrap();
        assert_eq!(store.get(), 35);

        store.set(250).unwrap();
        assert_eq!(store.get(), 100);

        fs::write(&path, "loud").unwrap();
        assert_eq!(store.get(), DEFAULT_VOLUME);

        fs::write(&path, "-4").unwrap();
        assert_eq!(store.get(), 0);
    }

    #[test]
    fn test_memory_volume_store() {
        let mut store = MemoryVolumeStore::default();
        assert_eq!(store.get(), 70);
        store.set(-1).unwrap();
        assert_eq!(store.get(), 0);
    }

    #[test]
    fn test_dir_asset_fetcher() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sounds")).unwrap();
        fs::write(dir.path().join("sounds/dog.mp3"), b"woof").unwrap();
        let fetcher = DirAssetFetcher::new(dir.path());

        assert_eq!(fetcher.fetch("/sounds/dog.mp3").unwrap(), b"woof");
        assert_eq!(
            fetcher.fetch("/sounds/cat.mp3").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        assert_eq!(
            fetcher.fetch("/../secret").unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_memory_asset_fetcher() {
        let mut fetcher = MemoryAssetFetcher::default();
        fetcher.insert("/sounds/cow.mp3", vec![1, 2, 3]);

        assert_eq!(fetcher.fetch("/sounds/cow.mp3").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            fetcher.fetch("/sounds/pig.mp3").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
