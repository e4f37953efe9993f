//! Package orchestration: walking a UFO, renaming layers and glyph files
//! to their canonical names, re-serializing every recognized file, and
//! keeping the incremental-processing state up to date.
//!
//! Writes are skip-if-unchanged throughout: a file is only touched when
//! its canonical bytes differ from what is on disk, so repeated runs are
//! invisible to version control and to the mod-time cache.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::Path;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::cache::{self, ModTimes};
use crate::common::normalize_color_string;
use crate::error::NormalizerError;
use crate::glif;
use crate::guideline::{normalize_guideline, GuidelineFields};
use crate::names::user_name_to_file_name;
use crate::plist::Value;
use crate::writer::normalize_property_list;

const MAX_UFO_FORMAT_VERSION: i64 = 3;

/// Prefix for the temporary names used during two-phase renames. The
/// index suffix makes each one unique within a pass, and the prefix is
/// reserved so no real layer directory or glyph file can collide with it.
const TEMP_NAME_PREFIX: &str = "org.unifiedfontobject.normalizer.";

/// Normalize a UFO package in place, or into `output_path` if given.
///
/// With `only_modified`, files whose modification times match the cache
/// from the previous normalization are skipped.
pub fn normalize_ufo<P: AsRef<Path>>(
    ufo_path: P,
    output_path: Option<&Path>,
    only_modified: bool,
) -> Result<(), NormalizerError> {
    let input = ufo_path.as_ref();
    // when writing elsewhere, duplicate the package and work on the copy
    // rather than reconstructing it piecemeal
    let ufo_path = match output_path {
        Some(output) => {
            duplicate_ufo(input, output)?;
            output
        }
        None => input,
    };
    let metainfo_path = ufo_path.join("metainfo.plist");
    if !metainfo_path.exists() {
        return Err(NormalizerError::MissingMetaInfo {
            path: ufo_path.to_path_buf(),
        });
    }
    let metainfo = read_plist(&metainfo_path)?;
    let format_version = metainfo
        .as_dict()
        .and_then(|d| d.get("formatVersion"))
        .ok_or_else(|| NormalizerError::MissingFormatVersion {
            path: ufo_path.to_path_buf(),
        })?
        .as_format_version()
        .ok_or_else(|| NormalizerError::BadFormatVersion {
            path: ufo_path.to_path_buf(),
        })?;
    if format_version > MAX_UFO_FORMAT_VERSION {
        return Err(NormalizerError::UnsupportedFormatVersion {
            version: format_version,
            path: ufo_path.to_path_buf(),
        });
    }
    log::info!(
        "Normalizing {:?} (UFO format {})",
        ufo_path.file_name().unwrap_or_default(),
        format_version
    );
    let lib_path = ufo_path.join("lib.plist");
    let mut font_lib: BTreeMap<String, Value> = if lib_path.exists() {
        read_plist(&lib_path)?
            .as_dict()
            .cloned()
            .ok_or_else(|| NormalizerError::Plist("lib.plist is not a dictionary".to_string()))?
    } else {
        BTreeMap::new()
    };
    let mut mod_times = if only_modified {
        ModTimes::read(&font_lib)
    } else {
        ModTimes::default()
    };

    if format_version < 3 {
        if ufo_path.join("glyphs").exists() {
            normalize_ufo1_and2_glyphs_directory(ufo_path, &mut mod_times)?;
        }
    } else {
        let available_images = cache::read_images_directory(ufo_path);
        let mut referenced_images: BTreeSet<String> = BTreeSet::new();
        let layer_mapping = normalize_glyphs_directory_names(ufo_path)?;
        for layer_directory in layer_mapping.values() {
            referenced_images.extend(normalize_glyphs_directory(
                ufo_path,
                layer_directory,
                only_modified,
            )?);
        }
        let to_purge = cache::garbage_images(&available_images, &referenced_images);
        if !to_purge.is_empty() {
            log::info!("Purging {} unreferenced image(s)", to_purge.len());
        }
        cache::purge_images_directory(ufo_path, &to_purge)?;
    }

    normalize_plist_file(&mut mod_times, ufo_path, "metainfo.plist", None)?;
    if ufo_path.join("fontinfo.plist").exists() {
        normalize_plist_file(
            &mut mod_times,
            ufo_path,
            "fontinfo.plist",
            Some(normalize_fontinfo_guidelines),
        )?;
    }
    for file_name in ["groups.plist", "kerning.plist", "layercontents.plist"] {
        if ufo_path.join(file_name).exists() {
            normalize_plist_file(&mut mod_times, ufo_path, file_name, None)?;
        }
    }
    // persist the engine state and canonicalize the lib itself
    mod_times.store(&mut font_lib);
    write_file_if_changed(
        &lib_path,
        &normalize_property_list(&Value::Dict(font_lib)),
    )?;
    Ok(())
}

// ------
// Layers
// ------

/// Rename layer directories to follow the user-name-to-file-name
/// convention, and rewrite layercontents.plist to match. Returns the
/// layer-name → directory mapping.
fn normalize_glyphs_directory_names(
    ufo_path: &Path,
) -> Result<IndexMap<String, String>, NormalizerError> {
    let layer_contents_path = ufo_path.join("layercontents.plist");
    if !layer_contents_path.exists() {
        return Ok(IndexMap::new());
    }
    let old_mapping = read_layer_contents(ufo_path)?;
    if old_mapping.is_empty() {
        return Ok(IndexMap::new());
    }
    let mut new_mapping: IndexMap<String, String> = IndexMap::new();
    let mut new_directories: HashSet<String> = HashSet::new();
    for (layer_name, old_directory) in &old_mapping {
        let new_directory = if old_directory == "glyphs" {
            "glyphs".to_string()
        } else {
            user_name_to_file_name(layer_name, &new_directories, "glyphs.", "")?
        };
        new_directories.insert(new_directory.to_lowercase());
        new_mapping.insert(layer_name.clone(), new_directory);
    }
    // an old directory may carry another entry's new name, so move
    // everything through unique temporary names first
    let mut from_temp: Vec<(String, String)> = Vec::new();
    for (index, (layer_name, new_directory)) in new_mapping.iter().enumerate() {
        let Some(old_directory) = old_mapping.get(layer_name) else {
            continue;
        };
        if old_directory == new_directory {
            continue;
        }
        let temp_directory = format!("{}{}", TEMP_NAME_PREFIX, index);
        log::debug!(
            "Renaming layer directory {:?} to {:?}",
            old_directory,
            new_directory
        );
        std::fs::rename(ufo_path.join(old_directory), ufo_path.join(&temp_directory))?;
        from_temp.push((temp_directory, new_directory.clone()));
    }
    for (temp_directory, new_directory) in from_temp {
        std::fs::rename(ufo_path.join(&temp_directory), ufo_path.join(&new_directory))?;
    }
    let value = Value::Array(
        new_mapping
            .iter()
            .map(|(name, directory)| {
                Value::Array(vec![
                    Value::String(name.clone()),
                    Value::String(directory.clone()),
                ])
            })
            .collect(),
    );
    write_file_if_changed(&layer_contents_path, &normalize_property_list(&value))?;
    Ok(new_mapping)
}

fn read_layer_contents(ufo_path: &Path) -> Result<IndexMap<String, String>, NormalizerError> {
    let malformed = || NormalizerError::MalformedLayerContents {
        path: ufo_path.to_path_buf(),
    };
    let contents = read_plist(&ufo_path.join("layercontents.plist"))?;
    let entries = contents.as_array().ok_or_else(malformed)?;
    let mut mapping = IndexMap::new();
    for entry in entries {
        let pair = entry.as_array().ok_or_else(malformed)?;
        if pair.len() != 2 {
            return Err(malformed());
        }
        let (Some(name), Some(directory)) = (
            pair.first().and_then(Value::as_str),
            pair.get(1).and_then(Value::as_str),
        ) else {
            return Err(malformed());
        };
        mapping.insert(name.to_string(), directory.to_string());
    }
    Ok(mapping)
}

// ------
// Glyphs
// ------

fn normalize_ufo1_and2_glyphs_directory(
    ufo_path: &Path,
    mod_times: &mut ModTimes,
) -> Result<(), NormalizerError> {
    let glyph_mapping = normalize_glyph_names(ufo_path, "glyphs")?;
    let mut file_names: Vec<&String> = glyph_mapping.values().collect();
    file_names.sort();
    for file_name in file_names {
        let location = format!("glyphs/{}", file_name);
        let path = ufo_path.join("glyphs").join(file_name);
        if mod_times.needs_refresh(&location, &path) {
            normalize_glif_file(ufo_path, "glyphs", file_name)?;
            mod_times.record(&location, &path);
        }
    }
    Ok(())
}

/// Normalize one layer directory and return the set of image files its
/// glyphs reference.
fn normalize_glyphs_directory(
    ufo_path: &Path,
    layer_directory: &str,
    only_modified: bool,
) -> Result<BTreeSet<String>, NormalizerError> {
    let layer_path = ufo_path.join(layer_directory);
    if !layer_path.is_dir() {
        log::warn!("Layer directory {:?} is missing; skipping", layer_directory);
        return Ok(BTreeSet::new());
    }
    let layer_info_path = layer_path.join("layerinfo.plist");
    let mut layer_info: BTreeMap<String, Value> = if layer_info_path.exists() {
        read_plist(&layer_info_path)?
            .as_dict()
            .cloned()
            .ok_or_else(|| {
                NormalizerError::Plist("layerinfo.plist is not a dictionary".to_string())
            })?
    } else {
        BTreeMap::new()
    };
    let mut layer_lib: BTreeMap<String, Value> = layer_info
        .get("lib")
        .and_then(Value::as_dict)
        .cloned()
        .unwrap_or_default();
    let mut only_modified = only_modified;
    let mut image_references: IndexMap<String, String> = IndexMap::new();
    if only_modified {
        match cache::read_image_references(&layer_lib) {
            Some(stored) => image_references = stored,
            // without a reference record we do not know what points at
            // what, so everything must be checked
            None => only_modified = false,
        }
    }
    let mut mod_times = if only_modified {
        ModTimes::read(&layer_lib)
    } else {
        ModTimes::default()
    };
    let glyph_mapping = normalize_glyph_names(ufo_path, layer_directory)?;
    for file_name in glyph_mapping.values() {
        let path = ufo_path.join(layer_directory).join(file_name);
        if mod_times.needs_refresh(file_name, &path) {
            match normalize_glif_file(ufo_path, layer_directory, file_name)? {
                Some(image) => {
                    image_references.insert(file_name.clone(), image);
                }
                None => {
                    image_references.shift_remove(file_name);
                }
            }
            mod_times.record(file_name, &path);
        }
    }
    mod_times.store(&mut layer_lib);
    cache::store_image_references(&mut layer_lib, &image_references);
    layer_info.insert("lib".to_string(), Value::Dict(layer_lib));
    let mut layer_info_value = Value::Dict(layer_info);
    normalize_layerinfo_color(&mut layer_info_value);
    write_file_if_changed(
        &layer_info_path,
        &normalize_property_list(&layer_info_value),
    )?;
    Ok(image_references.values().cloned().collect())
}

/// Rename GLIF files to follow the user-name-to-file-name convention and
/// rewrite contents.plist to match. Returns the glyph-name → file-name
/// mapping in sorted glyph-name order.
fn normalize_glyph_names(
    ufo_path: &Path,
    layer_directory: &str,
) -> Result<IndexMap<SmolStr, String>, NormalizerError> {
    let contents_path = ufo_path.join(layer_directory).join("contents.plist");
    if !contents_path.exists() {
        return Ok(IndexMap::new());
    }
    let contents = read_plist(&contents_path)?;
    let Some(old_mapping) = contents.as_dict() else {
        return Err(NormalizerError::Plist(
            "contents.plist is not a dictionary".to_string(),
        ));
    };
    let mut new_mapping: IndexMap<SmolStr, String> = IndexMap::new();
    let mut new_file_names: HashSet<String> = HashSet::new();
    for (glyph_name, old_file) in old_mapping {
        if old_file.as_str().is_none() {
            log::warn!(
                "Dropping contents.plist entry for {:?}: file name is not a string",
                glyph_name
            );
            continue;
        }
        let new_file = user_name_to_file_name(glyph_name, &new_file_names, "", ".glif")?;
        new_file_names.insert(new_file.to_lowercase());
        new_mapping.insert(SmolStr::from(glyph_name.as_str()), new_file);
    }
    // two-phase rename, as for layer directories
    let mut from_temp: Vec<(String, String)> = Vec::new();
    for (index, (glyph_name, new_file)) in new_mapping.iter().enumerate() {
        let Some(old_file) = old_mapping.get(glyph_name.as_str()).and_then(Value::as_str) else {
            continue;
        };
        if old_file == new_file {
            continue;
        }
        let temp_file = format!("{}{}", TEMP_NAME_PREFIX, index);
        log::debug!("Renaming glyph file {:?} to {:?}", old_file, new_file);
        std::fs::rename(
            ufo_path.join(layer_directory).join(old_file),
            ufo_path.join(layer_directory).join(&temp_file),
        )?;
        from_temp.push((temp_file, new_file.clone()));
    }
    for (temp_file, new_file) in from_temp {
        std::fs::rename(
            ufo_path.join(layer_directory).join(&temp_file),
            ufo_path.join(layer_directory).join(&new_file),
        )?;
    }
    let contents_value = Value::Dict(
        new_mapping
            .iter()
            .map(|(name, file)| (name.to_string(), Value::String(file.clone())))
            .collect(),
    );
    write_file_if_changed(&contents_path, &normalize_property_list(&contents_value))?;
    Ok(new_mapping)
}

fn normalize_glif_file(
    ufo_path: &Path,
    layer_directory: &str,
    file_name: &str,
) -> Result<Option<String>, NormalizerError> {
    let path = ufo_path.join(layer_directory).join(file_name);
    let text = std::fs::read_to_string(&path)?;
    let (normalized, image_file_name) = glif::normalize_glif(&text, &path)?;
    write_file_if_changed(&path, &normalized)?;
    Ok(image_file_name)
}

// ---------------
// Top-level files
// ---------------

/// Re-serialize one property-list file if the cache says it is stale. An
/// empty value deletes the file: empty plists are never written.
fn normalize_plist_file(
    mod_times: &mut ModTimes,
    ufo_path: &Path,
    file_name: &str,
    preprocessor: Option<fn(&mut Value)>,
) -> Result<(), NormalizerError> {
    let path = ufo_path.join(file_name);
    if !mod_times.needs_refresh(file_name, &path) {
        return Ok(());
    }
    let mut data = read_plist(&path)?;
    if let Some(preprocessor) = preprocessor {
        preprocessor(&mut data);
    }
    if data.is_truthy() {
        write_file_if_changed(&path, &normalize_property_list(&data))?;
        mod_times.record(file_name, &path);
    } else {
        log::debug!("Removing empty {}", file_name);
        std::fs::remove_file(&path)?;
        mod_times.forget(file_name);
    }
    Ok(())
}

/// fontinfo preprocessor: every guideline dict goes through the shared
/// guideline rule; failures are dropped from the array.
fn normalize_fontinfo_guidelines(info: &mut Value) {
    let Some(dict) = info.as_dict_mut() else {
        return;
    };
    let Some(guidelines) = dict.get("guidelines") else {
        return;
    };
    if !guidelines.is_truthy() {
        return;
    }
    let Some(entries) = guidelines.as_array() else {
        return;
    };
    let normalized: Vec<Value> = entries.iter().filter_map(normalize_guideline_dict).collect();
    dict.insert("guidelines".to_string(), Value::Array(normalized));
}

fn normalize_guideline_dict(entry: &Value) -> Option<Value> {
    let dict = entry.as_dict()?;
    let field = |name: &str| dict.get(name).cloned();
    let guideline = normalize_guideline(GuidelineFields {
        x: field("x"),
        y: field("y"),
        angle: field("angle"),
        name: field("name"),
        color: field("color"),
        identifier: field("identifier"),
    })?;
    let mut out = BTreeMap::new();
    if let Some(x) = guideline.x {
        out.insert("x".to_string(), x);
    }
    if let Some(y) = guideline.y {
        out.insert("y".to_string(), y);
    }
    if let Some(angle) = guideline.angle {
        out.insert("angle".to_string(), angle);
    }
    if let Some(name) = guideline.name {
        out.insert("name".to_string(), name);
    }
    if let Some(color) = guideline.color {
        out.insert("color".to_string(), Value::String(color));
    }
    if let Some(identifier) = guideline.identifier {
        out.insert("identifier".to_string(), identifier);
    }
    Some(Value::Dict(out))
}

/// layerinfo preprocessor: canonicalize the layer color; an invalid one
/// is removed.
fn normalize_layerinfo_color(info: &mut Value) {
    let Some(dict) = info.as_dict_mut() else {
        return;
    };
    let Some(color) = dict.remove("color") else {
        return;
    };
    if let Value::String(color) = color {
        if let Some(color) = normalize_color_string(&color) {
            dict.insert("color".to_string(), Value::String(color));
        }
    }
}

// ---------------
// Path operations
// ---------------

fn read_plist(path: &Path) -> Result<Value, NormalizerError> {
    let text = std::fs::read_to_string(path)?;
    Value::parse_document(&text)
}

/// Leave the file system untouched unless the bytes actually change.
fn write_file_if_changed(path: &Path, text: &str) -> Result<(), NormalizerError> {
    if let Ok(existing) = std::fs::read(path) {
        if existing == text.as_bytes() {
            return Ok(());
        }
    }
    std::fs::write(path, text.as_bytes())?;
    Ok(())
}

/// Copy the whole package to a new location, replacing whatever is there.
fn duplicate_ufo(input: &Path, output: &Path) -> Result<(), NormalizerError> {
    if output.exists() {
        std::fs::remove_dir_all(output)?;
    }
    for entry in walkdir::WalkDir::new(input) {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(input) else {
            continue;
        };
        let target = output.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fontinfo_guidelines_preprocessor() {
        let text = "<plist version=\"1.0\"><dict>\
            <key>guidelines</key><array>\
            <dict><key>x</key><integer>1</integer><key>y</key><integer>2</integer><key>angle</key><integer>3</integer><key>color</key><string>1,0,0,.5</string></dict>\
            <dict><key>x</key><integer>7</integer><key>y</key><integer>8</integer><key>angle</key><integer>9</integer><key>color</key><string>invalid</string></dict>\
            <dict><key>y</key><integer>2</integer><key>angle</key><integer>3</integer></dict>\
            </array></dict></plist>";
        let mut value = Value::parse_document(text).unwrap();
        normalize_fontinfo_guidelines(&mut value);
        let guidelines = value
            .as_dict()
            .unwrap()
            .get("guidelines")
            .unwrap()
            .as_array()
            .unwrap();
        assert_eq!(guidelines.len(), 2);
        let first = guidelines[0].as_dict().unwrap();
        assert_eq!(first.get("x"), Some(&Value::Real(1.0)));
        assert_eq!(
            first.get("color"),
            Some(&Value::String("1,0,0,0.5".to_string()))
        );
        // the invalid color was dropped but its guideline survived
        let second = guidelines[1].as_dict().unwrap();
        assert_eq!(second.get("color"), None);
        assert_eq!(second.get("x"), Some(&Value::Real(7.0)));
    }

    #[test]
    fn test_layerinfo_color_preprocessor() {
        let mut value = Value::Dict(BTreeMap::from([(
            "color".to_string(),
            Value::String("1,0,0,.5".to_string()),
        )]));
        normalize_layerinfo_color(&mut value);
        assert_eq!(
            value.as_dict().unwrap().get("color"),
            Some(&Value::String("1,0,0,0.5".to_string()))
        );
        let mut value = Value::Dict(BTreeMap::from([(
            "color".to_string(),
            Value::String("invalid".to_string()),
        )]));
        normalize_layerinfo_color(&mut value);
        assert_eq!(value.as_dict().unwrap().get("color"), None);
    }

    #[test]
    fn test_read_layer_contents_rejects_malformed_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("layercontents.plist"),
            "<plist version=\"1.0\"><array><string>oops</string></array></plist>",
        )
        .unwrap();
        assert!(matches!(
            read_layer_contents(dir.path()),
            Err(NormalizerError::MalformedLayerContents { .. })
        ));
    }

    #[test]
    fn test_write_file_if_changed_preserves_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "same").unwrap();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();
        write_file_if_changed(&path, "same").unwrap();
        let after = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);
        write_file_if_changed(&path, "different").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "different");
    }
}
