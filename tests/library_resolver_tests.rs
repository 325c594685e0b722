//! Tests for manifest-driven script library resolution.
//!
//! Fixtures are built in a temp directory per test: a `manifest.json` plus
//! the `.jsx` library files it references.

use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use aibridge::libraries::{LibraryError, LibraryResolver, USER_SCRIPT_SENTINEL};

fn write_fixture(dir: &Path) {
    let manifest = json!({
        "version": "1.0.0",
        "libraries": {
            "units": {
                "file": "units.jsx",
                "version": "1.0.0",
                "dependencies": [],
                "exports": ["mmToPoints", "ptToMm"]
            },
            "geometry": {
                "file": "geometry.jsx",
                "version": "1.0.0",
                "dependencies": ["units"],
                "exports": ["getVisibleBounds"]
            },
            "layout": {
                "file": "layout.jsx",
                "version": "1.0.0",
                "dependencies": ["geometry"],
                "exports": ["arrangeInGrid", "batchResize"]
            }
        }
    });
    fs::write(
        dir.join("manifest.json"),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
    fs::write(
        dir.join("units.jsx"),
        "function mmToPoints(mm) { return mm * 2.834645; }\nfunction ptToMm(pt) { return pt / 2.834645; }",
    )
    .unwrap();
    fs::write(
        dir.join("geometry.jsx"),
        "function getVisibleBounds(item) { return item.visibleBounds; }",
    )
    .unwrap();
    fs::write(
        dir.join("layout.jsx"),
        "function arrangeInGrid(items, cols) {}\nfunction batchResize(items, w, h) {}",
    )
    .unwrap();
}

#[test]
fn test_transitive_resolution_emits_dependencies_first() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let resolver = LibraryResolver::new(dir.path());

    let resolved = resolver.resolve(&["layout".to_string()]).unwrap();

    let units_at = resolved.find("mmToPoints").unwrap();
    let geometry_at = resolved.find("getVisibleBounds").unwrap();
    let layout_at = resolved.find("arrangeInGrid").unwrap();
    assert!(units_at < geometry_at);
    assert!(geometry_at < layout_at);
}

#[test]
fn test_explicit_dependency_is_not_duplicated() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let resolver = LibraryResolver::new(dir.path());

    let resolved = resolver
        .resolve(&["layout".to_string(), "geometry".to_string()])
        .unwrap();

    assert_eq!(resolved.matches("getVisibleBounds").count(), 1);
}

#[test]
fn test_resolution_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let resolver = LibraryResolver::new(dir.path());

    let includes = vec!["layout".to_string(), "units".to_string()];
    let first = resolver.resolve(&includes).unwrap();
    let second = resolver.resolve(&includes).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_inject_appends_sentinel_then_payload() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let resolver = LibraryResolver::new(dir.path());

    let combined = resolver
        .inject_libraries("arrangeInGrid(sel, 3);", &["layout".to_string()])
        .unwrap();

    let sentinel_at = combined.find(USER_SCRIPT_SENTINEL).unwrap();
    let payload_at = combined.find("arrangeInGrid(sel, 3);").unwrap();
    let library_at = combined.find("function arrangeInGrid").unwrap();
    assert!(library_at < sentinel_at);
    assert!(sentinel_at < payload_at);
}

#[test]
fn test_symbol_collision_names_both_libraries() {
    let dir = TempDir::new().unwrap();
    let manifest = json!({
        "libraries": {
            "libA": { "file": "a.jsx", "dependencies": [], "exports": ["foo"] },
            "libB": { "file": "b.jsx", "dependencies": [], "exports": ["foo"] }
        }
    });
    fs::write(dir.path().join("manifest.json"), manifest.to_string()).unwrap();
    fs::write(dir.path().join("a.jsx"), "function foo() { return 'a'; }").unwrap();
    fs::write(dir.path().join("b.jsx"), "function foo() { return 'b'; }").unwrap();
    let resolver = LibraryResolver::new(dir.path());

    let err = resolver
        .resolve(&["libA".to_string(), "libB".to_string()])
        .unwrap_err();

    match err {
        LibraryError::SymbolCollision {
            symbol,
            first,
            second,
        } => {
            assert_eq!(symbol, "foo");
            assert_eq!(first, "libA");
            assert_eq!(second, "libB");
        }
        other => panic!("expected symbol collision, got {}", other),
    }
}

#[test]
fn test_unknown_library_fails() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let resolver = LibraryResolver::new(dir.path());

    let err = resolver.resolve(&["nonexistent".to_string()]).unwrap_err();
    assert_eq!(err, LibraryError::UnknownLibrary("nonexistent".to_string()));
}

#[test]
fn test_missing_file_fails_with_filename() {
    let dir = TempDir::new().unwrap();
    let manifest = json!({
        "libraries": {
            "ghost": { "file": "ghost.jsx", "dependencies": [], "exports": [] }
        }
    });
    fs::write(dir.path().join("manifest.json"), manifest.to_string()).unwrap();
    let resolver = LibraryResolver::new(dir.path());

    let err = resolver.resolve(&["ghost".to_string()]).unwrap_err();
    assert_eq!(err, LibraryError::FileNotFound("ghost.jsx".to_string()));
}

#[test]
fn test_fallback_mode_concatenates_in_request_order() {
    let dir = TempDir::new().unwrap();
    // No manifest at all.
    fs::write(dir.path().join("first.jsx"), "// first").unwrap();
    fs::write(dir.path().join("second.jsx"), "// second").unwrap();
    let resolver = LibraryResolver::new(dir.path());

    let resolved = resolver
        .resolve(&["second".to_string(), "first".to_string()])
        .unwrap();

    let second_at = resolved.find("// second").unwrap();
    let first_at = resolved.find("// first").unwrap();
    assert!(second_at < first_at);
}

#[test]
fn test_fallback_mode_missing_library() {
    let dir = TempDir::new().unwrap();
    let resolver = LibraryResolver::new(dir.path());

    let err = resolver.resolve(&["ghost".to_string()]).unwrap_err();
    match err {
        LibraryError::FileNotFound(message) => assert!(message.contains("ghost.jsx")),
        other => panic!("expected file-not-found, got {}", other),
    }
}

#[test]
fn test_file_contents_are_cached() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let resolver = LibraryResolver::new(dir.path());

    let first = resolver.resolve(&["units".to_string()]).unwrap();

    // Rewrite the file on disk; the cached content must still be served.
    fs::write(dir.path().join("units.jsx"), "// replaced").unwrap();
    let second = resolver.resolve(&["units".to_string()]).unwrap();
    assert_eq!(first, second);

    // Clearing the caches picks up the new content.
    resolver.clear_cache();
    let third = resolver.resolve(&["units".to_string()]).unwrap();
    assert_eq!(third, "// replaced");
}

#[test]
fn test_broken_manifest_degrades_to_fallback() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("manifest.json"), "{ not json").unwrap();
    fs::write(dir.path().join("solo.jsx"), "// solo").unwrap();
    let resolver = LibraryResolver::new(dir.path());

    let resolved = resolver.resolve(&["solo".to_string()]).unwrap();
    assert_eq!(resolved, "// solo");
}
