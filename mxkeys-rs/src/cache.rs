/* Last-known-good target, persisted between invocations. */
/*  */
/* The record is only a hint. Receivers are unplugged and keyboards */
/* re-paired between runs, so every consumer re-resolves the feature at */
/* the cached slot before trusting it and clears the record otherwise. */
/*  */
/* File format: three newline-terminated lines, HID path, device slot */
/* and feature index, the latter two in decimal. */

use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::device::TargetDescriptor;
use crate::driver::hidpp::{FIRST_DEVICE_INDEX, LAST_DEVICE_INDEX};
use crate::error::CacheError;

const CACHE_FILE_NAME: &str = "cache";

/* Target cache stored in a caller-supplied directory. */
#[derive(Debug, Clone)]
pub struct TargetCache {
    file: PathBuf,
}

impl TargetCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            file: dir.join(CACHE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /* Read the cached target. Absent or incomplete records are `Missing`. */
    pub fn load(&self) -> Result<TargetDescriptor, CacheError> {
        let contents = match fs::read_to_string(&self.file) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheError::Missing),
            Err(e) => return Err(e.into()),
        };
        parse_record(&contents)
    }

    /* Persist `target`, creating the cache directory if needed. */
    pub fn save(&self, target: &TargetDescriptor) -> io::Result<()> {
        if let Some(dir) = self.file.parent() {
            fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)?;
        }
        fs::write(
            &self.file,
            format!(
                "{}\n{}\n{}\n",
                target.hid_path, target.device_index, target.feature_index
            ),
        )?;
        debug!("Cached target {target} in {}", self.file.display());
        Ok(())
    }

    /* Like `save`, but a failure only costs the next run a rediscovery. */
    pub fn store(&self, target: &TargetDescriptor) {
        if let Err(e) = self.save(target) {
            warn!("Failed to write cache {}: {e}", self.file.display());
        }
    }

    /* Remove the record. A missing file is not an error. */
    pub fn clear(&self) {
        match fs::remove_file(&self.file) {
            Ok(()) => debug!("Cleared cache {}", self.file.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove cache {}: {e}", self.file.display()),
        }
    }
}

/* Parse the three-line record. */
fn parse_record(contents: &str) -> Result<TargetDescriptor, CacheError> {
    let mut lines = contents.lines();
    let (Some(path), Some(slot), Some(index)) = (lines.next(), lines.next(), lines.next()) else {
        return Err(CacheError::Missing);
    };

    let hid_path = path.trim_end_matches('\r');
    if hid_path.is_empty() {
        return Err(CacheError::Corrupt("empty HID path".to_string()));
    }

    let device_index: u8 = slot
        .trim()
        .parse()
        .map_err(|e| CacheError::Corrupt(format!("device slot '{slot}': {e}")))?;
    if !(FIRST_DEVICE_INDEX..=LAST_DEVICE_INDEX).contains(&device_index) {
        return Err(CacheError::Corrupt(format!(
            "device slot {device_index} outside {FIRST_DEVICE_INDEX}..={LAST_DEVICE_INDEX}"
        )));
    }

    let feature_index: u8 = index
        .trim()
        .parse()
        .map_err(|e| CacheError::Corrupt(format!("feature index '{index}': {e}")))?;

    Ok(TargetDescriptor {
        hid_path: hid_path.to_string(),
        device_index,
        feature_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetDescriptor {
        TargetDescriptor {
            hid_path: "/dev/hidraw4".to_string(),
            device_index: 3,
            feature_index: 7,
        }
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TargetCache::new(dir.path());

        cache.save(&target()).unwrap();
        assert_eq!(cache.load().unwrap(), target());
        assert_eq!(
            fs::read_to_string(cache.path()).unwrap(),
            "/dev/hidraw4\n3\n7\n"
        );
    }

    #[test]
    fn save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TargetCache::new(&dir.path().join(".mx-keys-cli"));

        cache.save(&target()).unwrap();
        assert_eq!(cache.load().unwrap(), target());
    }

    #[test]
    fn load_after_clear_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TargetCache::new(dir.path());

        cache.save(&target()).unwrap();
        cache.clear();
        assert!(matches!(cache.load(), Err(CacheError::Missing)));
        /* Clearing twice is harmless */
        cache.clear();
    }

    #[test]
    fn absent_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TargetCache::new(dir.path());
        assert!(matches!(cache.load(), Err(CacheError::Missing)));
    }

    #[test]
    fn partial_record_is_missing() {
        for partial in ["", "/dev/hidraw4\n", "/dev/hidraw4\n3\n"] {
            assert!(
                matches!(parse_record(partial), Err(CacheError::Missing)),
                "{partial:?}"
            );
        }
    }

    #[test]
    fn unterminated_last_line_still_loads() {
        assert_eq!(parse_record("/dev/hidraw4\n3\n7").unwrap(), target());
    }

    #[test]
    fn garbage_fields_are_corrupt() {
        for bad in [
            "\n3\n7\n",
            "/dev/hidraw4\nthree\n7\n",
            "/dev/hidraw4\n0\n7\n",
            "/dev/hidraw4\n7\n7\n",
            "/dev/hidraw4\n3\n256\n",
            "/dev/hidraw4\n3\n-1\n",
        ] {
            assert!(
                matches!(parse_record(bad), Err(CacheError::Corrupt(_))),
                "{bad:?}"
            );
        }
    }
}
