use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::warn;
use zip::ZipArchive;

use crate::app::error::AppError;
use crate::app::models::BundleManifestEntry;

pub const PACKAGE_SUFFIX: &str = ".apk";
pub const BUNDLE_SUFFIX: &str = ".xapk";
const WORKSPACE_PREFIX: &str = "xapk_";
const MANIFEST_NAME: &str = "AndroidManifest.xml";

fn has_suffix(path: &str, suffix: &str) -> bool {
    path.to_lowercase().ends_with(suffix)
}

pub fn is_package_file(path: &str) -> bool {
    has_suffix(path, PACKAGE_SUFFIX)
}

pub fn is_bundle_file(path: &str) -> bool {
    has_suffix(path, BUNDLE_SUFFIX)
}

pub fn normalize_apk_path(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(trimmed)
}

/// Fresh, uniquely named scratch directory. Removed when the `TempDir` drops.
pub fn create_workspace(temp_root: Option<&Path>, trace_id: &str) -> Result<TempDir, AppError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(WORKSPACE_PREFIX);
    let created = match temp_root {
        Some(root) => {
            fs::create_dir_all(root).map_err(|err| {
                AppError::system(format!("Failed to create temp root: {err}"), trace_id)
            })?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    };
    created.map_err(|err| AppError::system(format!("Failed to create temp dir: {err}"), trace_id))
}

/// Extracts every entry of the zip at `bundle_path` into `dest`. Entries whose
/// names would escape `dest` are skipped.
pub fn extract_archive(bundle_path: &Path, dest: &Path, trace_id: &str) -> Result<usize, AppError> {
    let file = File::open(bundle_path)
        .map_err(|err| AppError::extraction(format!("Failed to open bundle: {err}"), trace_id))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| AppError::extraction(format!("Invalid bundle: {err}"), trace_id))?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| AppError::extraction(format!("Failed to read bundle: {err}"), trace_id))?;
        let Some(relative) = entry.enclosed_name().map(|name| name.to_path_buf()) else {
            warn!(trace_id = %trace_id, entry = %entry.name(), "skipping bundle entry outside the extraction dir");
            continue;
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| {
                AppError::extraction(format!("Failed to create directory: {err}"), trace_id)
            })?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::extraction(format!("Failed to create directory: {err}"), trace_id)
            })?;
        }
        let mut output = File::create(&target)
            .map_err(|err| AppError::extraction(format!("Failed to extract entry: {err}"), trace_id))?;
        io::copy(&mut entry, &mut output)
            .map_err(|err| AppError::extraction(format!("Failed to write entry: {err}"), trace_id))?;
        extracted += 1;
    }
    Ok(extracted)
}

/// Every package file below `root`, directories visited in name order.
pub fn discover_package_files(root: &Path) -> io::Result<Vec<BundleManifestEntry>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut children = fs::read_dir(&dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        children.sort();
        let mut subdirs = Vec::new();
        for path in children {
            if path.is_dir() {
                subdirs.push(path);
                continue;
            }
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            if !is_package_file(&name) {
                continue;
            }
            let size_bytes = fs::metadata(&path)?.len();
            found.push(BundleManifestEntry {
                file_path: path.to_string_lossy().to_string(),
                size_bytes,
            });
        }
        // Reverse so the stack pops subdirectories in name order.
        pending.extend(subdirs.into_iter().rev());
    }
    Ok(found)
}

/// Largest first: the base package is conventionally the biggest file of a
/// bundle. Stable, so equal sizes keep discovery order.
pub fn order_by_size_desc(entries: &mut [BundleManifestEntry]) {
    entries.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
}

fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Best-effort `label="..."` scrape from a package's manifest. Not a manifest parser.
pub fn scrape_manifest_label(apk_path: &Path) -> Option<String> {
    let file = File::open(apk_path).ok()?;
    let mut archive = ZipArchive::new(file).ok()?;
    let mut manifest = archive.by_name(MANIFEST_NAME).ok()?;
    let mut content = Vec::new();
    manifest.read_to_end(&mut content).ok()?;

    find_subslice(&content, b"application", 0)?;
    find_subslice(&content, b"label=", 0)?;
    let start = find_subslice(&content, b"label=\"", 0)? + b"label=\"".len();
    let end = find_subslice(&content, b"\"", start)?;
    if end <= start {
        return None;
    }
    let label = String::from_utf8_lossy(&content[start..end]).trim().to_string();
    (!label.is_empty()).then_some(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).expect("zip file");
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).expect("start");
            zip.write_all(body.as_bytes()).expect("write");
        }
        zip.finish().expect("finish");
    }

    #[test]
    fn suffix_checks_ignore_case() {
        assert!(is_package_file("/tmp/Base.APK"));
        assert!(is_bundle_file("C:\\dl\\Game.XAPK"));
        assert!(!is_package_file("/tmp/base.apks"));
        assert!(!is_bundle_file("/tmp/notes.txt"));
    }

    #[test]
    fn extracts_nested_entries_and_discovers_packages() {
        let tmp = TempDir::new().expect("tmp");
        let bundle = tmp.path().join("app.xapk");
        write_zip(
            &bundle,
            &[
                ("manifest.json", "{}"),
                ("com.example.apk", "0123456789"),
                ("splits/config.arm64_v8a.APK", "01234"),
                ("Android/obb/com.example/main.obb", "obb"),
            ],
        );
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).expect("dest");

        let count = extract_archive(&bundle, &dest, "t").expect("extract");
        assert_eq!(count, 4);

        let found = discover_package_files(&dest).expect("discover");
        assert_eq!(found.len(), 2);
        assert!(found[0].file_path.ends_with("com.example.apk"));
        assert_eq!(found[0].size_bytes, 10);
        assert!(found[1].file_path.ends_with("config.arm64_v8a.APK"));
    }

    #[test]
    fn rejects_non_zip_input() {
        let tmp = TempDir::new().expect("tmp");
        let bogus = tmp.path().join("broken.xapk");
        fs::write(&bogus, b"definitely not a zip").expect("write");
        let err = extract_archive(&bogus, tmp.path(), "trace-z").unwrap_err();
        assert_eq!(err.code, "ERR_EXTRACTION");
        assert_eq!(err.trace_id, "trace-z");
    }

    #[test]
    fn skips_entries_that_escape_the_destination() {
        let tmp = TempDir::new().expect("tmp");
        let bundle = tmp.path().join("evil.xapk");
        write_zip(&bundle, &[("../escaped.apk", "x"), ("ok.apk", "y")]);
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).expect("dest");

        assert_eq!(extract_archive(&bundle, &dest, "t").expect("extract"), 1);
        assert!(!tmp.path().join("escaped.apk").exists());
        assert!(dest.join("ok.apk").exists());
    }

    #[test]
    fn orders_largest_first_keeping_ties_stable() {
        let mut entries = vec![
            BundleManifestEntry { file_path: "a.apk".into(), size_bytes: 10 },
            BundleManifestEntry { file_path: "b.apk".into(), size_bytes: 50 },
            BundleManifestEntry { file_path: "c.apk".into(), size_bytes: 5 },
            BundleManifestEntry { file_path: "d.apk".into(), size_bytes: 10 },
        ];
        order_by_size_desc(&mut entries);
        let order: Vec<&str> = entries.iter().map(|e| e.file_path.as_str()).collect();
        assert_eq!(order, vec!["b.apk", "a.apk", "d.apk", "c.apk"]);
    }

    #[test]
    fn scrapes_plain_text_manifest_label() {
        let tmp = TempDir::new().expect("tmp");
        let apk = tmp.path().join("app.apk");
        write_zip(
            &apk,
            &[(
                MANIFEST_NAME,
                "<manifest><application android:label=\"Notes Pro\"/></manifest>",
            )],
        );
        assert_eq!(scrape_manifest_label(&apk).as_deref(), Some("Notes Pro"));

        let bare = tmp.path().join("bare.apk");
        write_zip(&bare, &[("classes.dex", "dex")]);
        assert_eq!(scrape_manifest_label(&bare), None);
    }

    #[test]
    fn workspace_lives_under_the_requested_root() {
        let tmp = TempDir::new().expect("tmp");
        let root = tmp.path().join("scratch");
        let workspace = create_workspace(Some(&root), "t").expect("workspace");
        let path = workspace.path().to_path_buf();
        assert!(path.starts_with(&root));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("xapk_"));
        drop(workspace);
        assert!(!path.exists());
    }
}
