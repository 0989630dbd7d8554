//! Persistent on-disk tile cache (spec Module C).
//!
//! Layout mirrors MOBAC/SAS.Planet: `<cache_root>/<layer_id>/<z>/<x>/<y><ext>`
//! for an image, with a sibling `<y>.tne` empty marker file recording a
//! negative ("tile not exists") result. Grounded on the teacher's own
//! directory-cache split (`src/cache.rs`'s `HashMapCache`/`NoCache` pair) for
//! the shape of the trait, adapted here to a filesystem-backed cache instead
//! of an in-memory directory cache.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::layer::Mimetype;
use crate::tile::TileKey;

/// Persisted state of one tile slot.
#[derive(Debug, Clone)]
pub enum TileEntry {
    Image { bytes: Bytes, mimetype: Mimetype, mtime: SystemTime },
    Tne { mtime: SystemTime },
    Absent,
}

/// Filesystem-backed tile cache, rooted at `cache_root`.
#[derive(Debug, Clone)]
pub struct TileFileCache {
    cache_root: PathBuf,
}

impl TileFileCache {
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self { cache_root: cache_root.into() }
    }

    fn image_path(&self, key: &TileKey, mimetype: Mimetype) -> PathBuf {
        self.cache_root
            .join(&*key.layer_id)
            .join(key.z.to_string())
            .join(key.x.to_string())
            .join(format!("{}{}", key.y, mimetype.extension()))
    }

    fn tne_path(&self, key: &TileKey) -> PathBuf {
        self.cache_root
            .join(&*key.layer_id)
            .join(key.z.to_string())
            .join(key.x.to_string())
            .join(format!("{}.tne", key.y))
    }

    /// True iff no fresh image or TNE marker exists for `key`, per spec
    /// §4.1: a nil `ttl` means any existing entry suffices, regardless of
    /// age.
    pub fn needs_fetch(&self, key: &TileKey, mimetype: Mimetype, ttl: Option<Duration>) -> bool {
        let image = self.image_path(key, mimetype);
        let tne = self.tne_path(key);

        let newest_mtime = [&image, &tne]
            .into_iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .filter_map(|m| m.modified().ok())
            .max();

        let Some(mtime) = newest_mtime else {
            return true;
        };
        match ttl {
            None => false,
            Some(ttl) => mtime.elapsed().map(|age| age > ttl).unwrap_or(false),
        }
    }

    /// Reads the raw bytes of a cached image, if present.
    pub fn read(&self, key: &TileKey, mimetype: Mimetype) -> Option<Bytes> {
        std::fs::read(self.image_path(key, mimetype)).ok().map(Bytes::from)
    }

    /// Whether a cached image file exists for `key` (no decode attempted).
    #[must_use]
    pub fn exists(&self, key: &TileKey, mimetype: Mimetype) -> bool {
        self.image_path(key, mimetype).is_file()
    }

    /// Atomically replaces the cached image for `key` and clears any TNE
    /// marker. Writes to a sibling temp file first and renames into place
    /// so a concurrent reader never observes a partial file.
    ///
    /// # Errors
    /// Propagates filesystem I/O errors.
    pub fn write_image(&self, key: &TileKey, mimetype: Mimetype, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.image_path(key, mimetype);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_sibling(&path);
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &path)?;

        let tne = self.tne_path(key);
        if tne.is_file() {
            // Best-effort: another writer may have already removed it.
            let _ = std::fs::remove_file(tne);
        }
        Ok(())
    }

    /// Records a negative cache entry. Does not touch any existing image
    /// file (spec §3: TNE is only a coarse hint).
    ///
    /// # Errors
    /// Propagates filesystem I/O errors.
    pub fn write_tne(&self, key: &TileKey) -> std::io::Result<()> {
        let path = self.tne_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Idempotent: touching an existing marker just refreshes its mtime.
        std::fs::write(path, b"")
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().and_then(|n| n.to_str()).unwrap_or("tile").to_string();
    name.push_str(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(layer: &str, z: u8, x: i64, y: i64) -> TileKey {
        TileKey::new(layer.into(), z, x, y).unwrap()
    }

    #[test]
    fn write_image_clears_tne() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileFileCache::new(dir.path());
        let k = key("osm", 3, 1, 1);

        cache.write_tne(&k).unwrap();
        assert!(cache.tne_path(&k).is_file());

        cache.write_image(&k, Mimetype::Png, b"fake-png-bytes").unwrap();
        assert!(!cache.tne_path(&k).is_file());
        assert!(cache.exists(&k, Mimetype::Png));
    }

    #[test]
    fn tne_idempotent_leaves_image_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileFileCache::new(dir.path());
        let k = key("osm", 3, 1, 1);

        cache.write_image(&k, Mimetype::Png, b"original").unwrap();
        // A TNE written after an image exists must not remove it (spec §3).
        cache.write_tne(&k).unwrap();
        cache.write_tne(&k).unwrap();
        assert_eq!(cache.read(&k, Mimetype::Png).unwrap(), Bytes::from_static(b"original"));
    }

    #[test]
    fn needs_fetch_true_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileFileCache::new(dir.path());
        let k = key("osm", 3, 1, 1);
        assert!(cache.needs_fetch(&k, Mimetype::Png, None));
    }

    #[test]
    fn needs_fetch_false_with_nil_ttl_once_present() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileFileCache::new(dir.path());
        let k = key("osm", 3, 1, 1);
        cache.write_image(&k, Mimetype::Png, b"x").unwrap();
        assert!(!cache.needs_fetch(&k, Mimetype::Png, None));
    }

    #[test]
    fn needs_fetch_true_past_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileFileCache::new(dir.path());
        let k = key("osm", 3, 1, 1);
        cache.write_image(&k, Mimetype::Png, b"x").unwrap();
        assert!(!cache.needs_fetch(&k, Mimetype::Png, Some(Duration::from_secs(60))));
        assert!(cache.needs_fetch(&k, Mimetype::Png, Some(Duration::from_secs(0))));
    }
}
