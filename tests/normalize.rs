//! End-to-end tests over scratch packages: canonical output, renames,
//! image garbage collection, cache persistence and idempotence.

use std::collections::BTreeMap;
use std::path::Path;

use pretty_assertions::assert_eq;
use ufonorm::{normalize_ufo, NormalizerError, IMAGE_REFERENCES_LIB_KEY, MOD_TIMES_LIB_KEY};

fn write(root: &Path, relative: &str, text: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, text).unwrap();
}

fn plist(body: &str) -> String {
    format!("<plist version=\"1.0\">{}</plist>", body)
}

/// Relative path → file bytes for the whole package.
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .into_owned();
            files.insert(relative, std::fs::read(entry.path()).unwrap());
        }
    }
    files
}

fn assert_snapshots_equal(before: &BTreeMap<String, Vec<u8>>, after: &BTreeMap<String, Vec<u8>>) {
    let names_before: Vec<&String> = before.keys().collect();
    let names_after: Vec<&String> = after.keys().collect();
    assert_eq!(names_before, names_after);
    for (name, bytes) in before {
        if after[name] != *bytes {
            let old = String::from_utf8_lossy(bytes).into_owned();
            let new = String::from_utf8_lossy(&after[name]).into_owned();
            let diff = similar::TextDiff::from_lines(&old, &new);
            panic!(
                "{} changed on renormalization:\n{}",
                name,
                diff.unified_diff()
            );
        }
    }
}

/// A small but representative UFO 3, written with messy formatting.
fn build_ufo3(root: &Path) {
    write(
        root,
        "metainfo.plist",
        &plist(
            "<dict><key>formatVersion</key><integer>3</integer>\
             <key>creator</key><string>org.test.scribbler</string></dict>",
        ),
    );
    write(
        root,
        "layercontents.plist",
        &plist(
            "<array>\
             <array><string>public.default</string><string>glyphs</string></array>\
             <array><string>Sketches</string><string>glyphs.sketches</string></array>\
             </array>",
        ),
    );
    write(
        root,
        "glyphs/contents.plist",
        &plist(
            "<dict><key>A</key><string>a.glif</string>\
             <key>period</key><string>period.glif</string></dict>",
        ),
    );
    write(
        root,
        "glyphs/a.glif",
        "<glyph name=\"A\" format=\"2\">\
         <advance width=\"500.0\"/><unicode hex=\"41\"/>\
         <image fileName=\"a.png\" xScale=\".5\" yScale=\".5\"/>\
         <outline><contour>\
         <point type=\"line\" y=\"0\" x=\"0\"/>\
         <point type=\"line\" y=\"0\" x=\"100.50\"/>\
         </contour></outline>\
         </glyph>",
    );
    write(
        root,
        "glyphs/period.glif",
        "<glyph name=\"period\" format=\"2\">\
         <advance width=\"268\"/><unicode hex=\"2e\"/>\
         <outline><component base=\"A\" xOffset=\"10\"/></outline>\
         <lib><dict><key>public.markColor</key><string>1,0,0,.5</string></dict></lib>\
         </glyph>",
    );
    write(
        root,
        "glyphs.sketches/contents.plist",
        &plist("<dict><key>A</key><string>a.glif</string></dict>"),
    );
    write(
        root,
        "glyphs.sketches/a.glif",
        "<glyph name=\"A\" format=\"2\">\
         <outline><contour>\
         <point type=\"move\" y=\"1\" x=\"1\"/>\
         <point type=\"line\" y=\"2\" x=\"2\"/>\
         </contour></outline>\
         </glyph>",
    );
    write(
        root,
        "fontinfo.plist",
        &plist(
            "<dict><key>familyName</key><string>Test</string>\
             <key>guidelines</key><array>\
             <dict><key>x</key><integer>1</integer><key>y</key><integer>2</integer>\
             <key>angle</key><integer>3</integer><key>color</key><string>1,0,0,.5</string></dict>\
             <dict><key>y</key><integer>2</integer><key>angle</key><integer>3</integer></dict>\
             </array></dict>",
        ),
    );
    // an empty plist must be deleted, not rewritten
    write(root, "groups.plist", &plist("<dict></dict>"));
    write(
        root,
        "lib.plist",
        &plist("<dict><key>com.test.stuff</key><string>data</string></dict>"),
    );
    write(root, "images/a.png", "not really a png");
    write(root, "images/orphan.png", "also not a png");
}

#[test]
fn test_normalize_ufo3_package() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    build_ufo3(root);
    normalize_ufo(root, None, false).unwrap();

    // glyph files follow the naming convention; the old names are gone
    assert!(root.join("glyphs/A_.glif").is_file());
    assert!(root.join("glyphs/period.glif").is_file());
    assert!(!root.join("glyphs/a.glif").exists());
    let contents = std::fs::read_to_string(root.join("glyphs/contents.plist")).unwrap();
    assert!(contents.contains("<string>A_.glif</string>"));
    assert!(contents.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));

    // the non-default layer directory was renamed with its case marker
    assert!(root.join("glyphs.S_ketches").is_dir());
    assert!(!root.join("glyphs.sketches").exists());
    let layer_contents = std::fs::read_to_string(root.join("layercontents.plist")).unwrap();
    assert!(layer_contents.contains("<string>glyphs.S_ketches</string>"));

    // the glyph itself was canonicalized
    let a_glif = std::fs::read_to_string(root.join("glyphs/A_.glif")).unwrap();
    assert!(a_glif.contains("<advance width=\"500\"/>"));
    assert!(a_glif.contains("<unicode hex=\"0041\"/>"));
    assert!(a_glif.contains("<point x=\"100.5\" y=\"0\" type=\"line\"/>"));
    let period_glif = std::fs::read_to_string(root.join("glyphs/period.glif")).unwrap();
    assert!(period_glif.contains("<string>1,0,0,0.5</string>"));

    // the unreferenced image was purged, the referenced one kept
    assert!(root.join("images/a.png").is_file());
    assert!(!root.join("images/orphan.png").exists());

    // the empty plist was removed
    assert!(!root.join("groups.plist").exists());

    // the invalid guideline was dropped, the valid one canonicalized
    let fontinfo = std::fs::read_to_string(root.join("fontinfo.plist")).unwrap();
    assert!(fontinfo.contains("<string>1,0,0,0.5</string>"));
    assert_eq!(fontinfo.matches("<key>angle</key>").count(), 1);

    // engine state is persisted in the package's libs
    let lib = std::fs::read_to_string(root.join("lib.plist")).unwrap();
    assert!(lib.contains(MOD_TIMES_LIB_KEY));
    assert!(lib.contains("com.test.stuff"));
    let layerinfo = std::fs::read_to_string(root.join("glyphs/layerinfo.plist")).unwrap();
    assert!(layerinfo.contains(MOD_TIMES_LIB_KEY));
    assert!(layerinfo.contains(IMAGE_REFERENCES_LIB_KEY));
    assert!(layerinfo.contains("a.png"));
}

#[test]
fn test_idempotence() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    build_ufo3(root);
    normalize_ufo(root, None, false).unwrap();
    let first = snapshot(root);
    // a second full pass must be byte-identical
    normalize_ufo(root, None, false).unwrap();
    assert_snapshots_equal(&first, &snapshot(root));
    // and so must an incremental pass
    normalize_ufo(root, None, true).unwrap();
    assert_snapshots_equal(&first, &snapshot(root));
}

#[test]
fn test_incremental_pass_picks_up_changes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    build_ufo3(root);
    normalize_ufo(root, None, false).unwrap();
    // make sure the rewrite lands in a different cache time slot
    std::thread::sleep(std::time::Duration::from_millis(200));
    write(
        root,
        "glyphs/A_.glif",
        "<glyph name=\"A\" format=\"2\">\
         <advance   width=\"500.000\"/><unicode hex=\"0041\"/>\
         </glyph>",
    );
    normalize_ufo(root, None, true).unwrap();
    let a_glif = std::fs::read_to_string(root.join("glyphs/A_.glif")).unwrap();
    assert!(a_glif.contains("<advance width=\"500\"/>"));
    // the glyph no longer references an image, so the image is garbage now
    assert!(!root.join("images/a.png").exists());
}

#[test]
fn test_output_path_leaves_input_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("in.ufo");
    std::fs::create_dir(&root).unwrap();
    build_ufo3(&root);
    let before = snapshot(&root);
    let output = dir.path().join("out.ufo");
    normalize_ufo(&root, Some(&output), false).unwrap();
    assert_snapshots_equal(&before, &snapshot(&root));
    assert!(output.join("glyphs/A_.glif").is_file());
}

#[test]
fn test_glyph_rename_cycle_is_safe() {
    // "one" is stored in two.glif and "two" in three.glif: a direct
    // rename would overwrite two.glif before it is moved
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "metainfo.plist",
        &plist("<dict><key>formatVersion</key><integer>3</integer></dict>"),
    );
    write(
        root,
        "layercontents.plist",
        &plist("<array><array><string>public.default</string><string>glyphs</string></array></array>"),
    );
    write(
        root,
        "glyphs/contents.plist",
        &plist(
            "<dict><key>one</key><string>two.glif</string>\
             <key>two</key><string>three.glif</string></dict>",
        ),
    );
    write(
        root,
        "glyphs/two.glif",
        "<glyph name=\"one\" format=\"2\"><unicode hex=\"0031\"/></glyph>",
    );
    write(
        root,
        "glyphs/three.glif",
        "<glyph name=\"two\" format=\"2\"><unicode hex=\"0032\"/></glyph>",
    );
    normalize_ufo(root, None, false).unwrap();
    assert!(!root.join("glyphs/three.glif").exists());
    let one = std::fs::read_to_string(root.join("glyphs/one.glif")).unwrap();
    assert!(one.contains("<unicode hex=\"0031\"/>"));
    let two = std::fs::read_to_string(root.join("glyphs/two.glif")).unwrap();
    assert!(two.contains("<unicode hex=\"0032\"/>"));
}

#[test]
fn test_glyph_rename_swap_is_safe() {
    // a true two-cycle: each file's new name is the other's old name
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "metainfo.plist",
        &plist("<dict><key>formatVersion</key><integer>3</integer></dict>"),
    );
    write(
        root,
        "layercontents.plist",
        &plist("<array><array><string>public.default</string><string>glyphs</string></array></array>"),
    );
    write(
        root,
        "glyphs/contents.plist",
        &plist(
            "<dict><key>one</key><string>two.glif</string>\
             <key>two</key><string>one.glif</string></dict>",
        ),
    );
    write(
        root,
        "glyphs/two.glif",
        "<glyph name=\"one\" format=\"2\"><unicode hex=\"0031\"/></glyph>",
    );
    write(
        root,
        "glyphs/one.glif",
        "<glyph name=\"two\" format=\"2\"><unicode hex=\"0032\"/></glyph>",
    );
    normalize_ufo(root, None, false).unwrap();
    let one = std::fs::read_to_string(root.join("glyphs/one.glif")).unwrap();
    assert!(one.contains("<unicode hex=\"0031\"/>"));
    let two = std::fs::read_to_string(root.join("glyphs/two.glif")).unwrap();
    assert!(two.contains("<unicode hex=\"0032\"/>"));
}

#[test]
fn test_layer_rename_cycle_is_safe() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "metainfo.plist",
        &plist("<dict><key>formatVersion</key><integer>3</integer></dict>"),
    );
    write(
        root,
        "layercontents.plist",
        &plist(
            "<array>\
             <array><string>public.default</string><string>glyphs</string></array>\
             <array><string>one</string><string>glyphs.two</string></array>\
             <array><string>two</string><string>glyphs.three</string></array>\
             </array>",
        ),
    );
    std::fs::create_dir(root.join("glyphs")).unwrap();
    write(root, "glyphs.two/marker.txt", "layer one");
    write(root, "glyphs.three/marker.txt", "layer two");
    normalize_ufo(root, None, false).unwrap();
    assert!(!root.join("glyphs.three").exists());
    assert_eq!(
        std::fs::read_to_string(root.join("glyphs.one/marker.txt")).unwrap(),
        "layer one"
    );
    assert_eq!(
        std::fs::read_to_string(root.join("glyphs.two/marker.txt")).unwrap(),
        "layer two"
    );
}

#[test]
fn test_format1_implied_anchors_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "metainfo.plist",
        &plist("<dict><key>formatVersion</key><integer>2</integer></dict>"),
    );
    write(
        root,
        "glyphs/contents.plist",
        &plist("<dict><key>a</key><string>a.glif</string></dict>"),
    );
    write(
        root,
        "glyphs/a.glif",
        "<glyph name=\"a\" format=\"1\"><outline>\
         <contour><point type=\"move\" y=\"380\" x=\"236\" name=\"top\"/></contour>\
         <contour><point type=\"line\" y=\"1\" x=\"1\"/><point type=\"line\" y=\"2\" x=\"2\"/></contour>\
         </outline></glyph>",
    );
    normalize_ufo(root, None, false).unwrap();
    let glif = std::fs::read_to_string(root.join("glyphs/a.glif")).unwrap();
    let anchor = glif.find("name=\"top\"").unwrap();
    let contour = glif.find("type=\"line\"").unwrap();
    assert!(anchor > contour, "implied anchor was not moved to the end");
}

#[test]
fn test_package_level_failures() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    assert!(matches!(
        normalize_ufo(root, None, false),
        Err(NormalizerError::MissingMetaInfo { .. })
    ));
    write(root, "metainfo.plist", &plist("<dict></dict>"));
    assert!(matches!(
        normalize_ufo(root, None, false),
        Err(NormalizerError::MissingFormatVersion { .. })
    ));
    write(
        root,
        "metainfo.plist",
        &plist("<dict><key>formatVersion</key><string>soon</string></dict>"),
    );
    assert!(matches!(
        normalize_ufo(root, None, false),
        Err(NormalizerError::BadFormatVersion { .. })
    ));
    write(
        root,
        "metainfo.plist",
        &plist("<dict><key>formatVersion</key><integer>4</integer></dict>"),
    );
    assert!(matches!(
        normalize_ufo(root, None, false),
        Err(NormalizerError::UnsupportedFormatVersion { version: 4, .. })
    ));
}
