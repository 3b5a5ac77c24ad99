use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::testgen::parser::extract_class_name;

/* ============================================================
   Public entry
   ============================================================ */

/// Write the final test into `destination`, never overwriting an existing
/// file. Returns the path actually written.
pub fn materialize_test(
    destination: &Path,
    extension: &str,
    test_code: &str,
    fallback_name: &str,
) -> io::Result<PathBuf> {
    fs::create_dir_all(destination)?;

    let stem = extract_class_name(test_code)
        .unwrap_or_else(|| sanitize_name(fallback_name));

    let desired = destination.join(format!("{stem}.{extension}"));
    let path = unique_path(&desired);

    if path != desired {
        tracing::warn!(
            desired = %desired.display(),
            actual = %path.display(),
            "test file already exists, saving under a new name"
        );
    }

    fs::write(&path, test_code)?;
    tracing::info!(path = %path.display(), "final test file saved");
    Ok(path)
}

/* ============================================================
   Helpers
   ============================================================ */

/// `Name.ext`, else `Name 1.ext`, `Name 2.ext`, ...
fn unique_path(desired: &Path) -> PathBuf {
    if !desired.exists() {
        return desired.to_path_buf();
    }

    let parent = desired.parent().unwrap_or_else(|| Path::new("."));
    let stem = desired
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("test");
    let ext = desired.extension().and_then(|s| s.to_str());

    (1..)
        .map(|n| {
            let name = match ext {
                Some(e) => format!("{stem} {n}.{e}"),
                None => format!("{stem} {n}"),
            };
            parent.join(name)
        })
        .find(|p| !p.exists())
        .unwrap_or_else(|| desired.to_path_buf())
}

fn sanitize_name(raw: &str) -> String {
    let name: String = raw
        .replace("()", "")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if name.is_empty() {
        "GeneratedTest".to_string()
    } else if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("Test_{name}")
    } else {
        name
    }
}
