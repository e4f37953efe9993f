//! Incremental-change tracking.
//!
//! The normalizer stores two pieces of state inside the package's own lib
//! storage: a versioned map of last-normalized modification times, and a
//! per-layer map of which glyph references which image. The first lets a
//! later run skip untouched files; the second drives garbage collection of
//! orphaned images. A cache written by a different engine version is
//! treated as absent, wholesale.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use indexmap::IndexMap;

use crate::plist::Value;

/// Lib key holding the modification-time cache.
pub const MOD_TIMES_LIB_KEY: &str = "org.unifiedfontobject.normalizer.modTimes";
/// Lib key holding the per-layer image-reference map.
pub const IMAGE_REFERENCES_LIB_KEY: &str = "org.unifiedfontobject.normalizer.imageReferences";

pub fn engine_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Map from relative file name to its mod time at last normalization,
/// stored as seconds at one decimal place. Comparison happens at that
/// stored precision.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModTimes {
    entries: BTreeMap<String, String>,
}

impl ModTimes {
    /// Read the cache out of a lib. A missing key, an unparsable record
    /// or an engine-version mismatch all mean "no cache": every file will
    /// be reprocessed.
    pub fn read(lib: &BTreeMap<String, Value>) -> ModTimes {
        let Some(Value::String(text)) = lib.get(MOD_TIMES_LIB_KEY) else {
            return ModTimes::default();
        };
        let mut lines = text.lines();
        let Some(version_line) = lines.next() else {
            return ModTimes::default();
        };
        let version = version_line.rsplit(':').next().unwrap_or("").trim();
        if version != engine_version() {
            return ModTimes::default();
        }
        let mut entries = BTreeMap::new();
        for line in lines {
            let Some((mod_time, file_name)) = line.split_once(' ') else {
                continue;
            };
            entries.insert(file_name.to_string(), mod_time.to_string());
        }
        ModTimes { entries }
    }

    /// Write the cache into a lib, sorted by file name under a version
    /// header.
    pub fn store(&self, lib: &mut BTreeMap<String, Value>) {
        let mut lines = vec![format!("version: {}", engine_version())];
        for (file_name, mod_time) in &self.entries {
            lines.push(format!("{} {}", mod_time, file_name));
        }
        lib.insert(
            MOD_TIMES_LIB_KEY.to_string(),
            Value::String(lines.join("\n")),
        );
    }

    /// A file needs reprocessing when it has no record, or when its
    /// current mod time differs from the recorded one in either
    /// direction.
    pub fn needs_refresh(&self, file_name: &str, path: &Path) -> bool {
        let Some(previous) = self.entries.get(file_name) else {
            return true;
        };
        match mod_time_string(path) {
            Some(current) => current != *previous,
            None => true,
        }
    }

    pub fn record(&mut self, file_name: &str, path: &Path) {
        if let Some(mod_time) = mod_time_string(path) {
            self.entries.insert(file_name.to_string(), mod_time);
        }
    }

    pub fn forget(&mut self, file_name: &str) {
        self.entries.remove(file_name);
    }
}

/// A file's modification time in cache form.
pub fn mod_time_string(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let seconds = modified.duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
    Some(format!("{:.1}", seconds))
}

/// Read the stored glyph-file → image-file map from a layer lib. `None`
/// means no usable record is stored, which forces the caller to
/// reprocess the whole layer.
pub fn read_image_references(lib: &BTreeMap<String, Value>) -> Option<IndexMap<String, String>> {
    let references = lib.get(IMAGE_REFERENCES_LIB_KEY)?.as_dict()?;
    Some(
        references
            .iter()
            .filter_map(|(glyph, image)| image.as_str().map(|i| (glyph.clone(), i.to_string())))
            .collect(),
    )
}

pub fn store_image_references(
    lib: &mut BTreeMap<String, Value>,
    references: &IndexMap<String, String>,
) {
    let dict: BTreeMap<String, Value> = references
        .iter()
        .map(|(glyph, image)| (glyph.clone(), Value::String(image.clone())))
        .collect();
    lib.insert(IMAGE_REFERENCES_LIB_KEY.to_string(), Value::Dict(dict));
}

/// Every available image that no glyph references is garbage.
pub fn garbage_images(
    available: &BTreeSet<String>,
    referenced: &BTreeSet<String>,
) -> BTreeSet<String> {
    available.difference(referenced).cloned().collect()
}

/// All `.png` files directly inside the package's images directory.
pub fn read_images_directory(ufo_path: &Path) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let Ok(entries) = std::fs::read_dir(ufo_path.join("images")) else {
        return names;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "png") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.insert(name.to_string());
            }
        }
    }
    names
}

pub fn purge_images_directory(ufo_path: &Path, to_purge: &BTreeSet<String>) -> io::Result<()> {
    for file_name in to_purge {
        let path = ufo_path.join("images").join(file_name);
        if path.exists() {
            log::debug!("Purging unreferenced image {}", file_name);
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
