//! Local names for remote files.

use std::path::{Path, PathBuf};

use crate::FetchError;

/// Reduces a remote name to its last path segment.
///
/// Backslashes count as separators. Empty, `.` and `..` are rejected.
pub fn safe_basename(name: &str) -> Result<String, FetchError> {
    let normalized = name.replace('\\', "/");
    let base = normalized.rsplit('/').next().unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." {
        return Err(FetchError::InvalidPath(format!("unusable file name: {name:?}")));
    }
    Ok(base.to_string())
}

/// Places one member of a named batch under `dir`.
///
/// The member name keeps its subdirectories (`set_01/img.png` lands in
/// `dir/set_01/img.png`). Both `/` and `\` separate segments, repeated
/// separators and `.` segments collapse, and the final segment must be a
/// file name. Rooted names, drive prefixes and `..` anywhere are refused,
/// so the result is always strictly inside `dir`.
pub fn resolve_destination(dir: &Path, name: &str) -> Result<PathBuf, FetchError> {
    let invalid = |why: &str| FetchError::InvalidPath(format!("{why}: {name:?}"));

    if name.starts_with(['/', '\\']) || has_drive_prefix(name) {
        return Err(invalid("batch name is rooted"));
    }

    let segments: Vec<&str> = name
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.contains(&"..") {
        return Err(invalid("batch name leaves the target directory"));
    }
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    if segments.is_empty() || last.is_empty() || last == "." {
        return Err(invalid("batch name has no file name"));
    }

    Ok(segments.iter().fold(dir.to_path_buf(), |path, s| path.join(s)))
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_strips_directories() {
        assert_eq!(safe_basename("loras/style.safetensors").unwrap(), "style.safetensors");
        assert_eq!(safe_basename("a\\b\\c.bin").unwrap(), "c.bin");
        assert_eq!(safe_basename("plain.bin").unwrap(), "plain.bin");
    }

    #[test]
    fn basename_rejects_unusable_names() {
        for name in ["", "dir/", ".", "..", "x/..", "x\\."] {
            assert!(safe_basename(name).is_err(), "{name:?}");
        }
    }

    #[test]
    fn batch_names_keep_subdirectories() {
        let dir = Path::new("/models/input");
        assert_eq!(
            resolve_destination(dir, "img_0001.png").unwrap(),
            PathBuf::from("/models/input/img_0001.png")
        );
        assert_eq!(
            resolve_destination(dir, "set_01/img.png").unwrap(),
            PathBuf::from("/models/input/set_01/img.png")
        );
        assert_eq!(
            resolve_destination(dir, "set_01\\caps\\img.txt").unwrap(),
            PathBuf::from("/models/input/set_01/caps/img.txt")
        );
    }

    #[test]
    fn batch_names_collapse_dots_and_repeated_separators() {
        let dir = Path::new("/models/input");
        assert_eq!(
            resolve_destination(dir, "./a/.//b.png").unwrap(),
            PathBuf::from("/models/input/a/b.png")
        );
    }

    #[test]
    fn batch_names_cannot_escape() {
        let dir = Path::new("/models/input");
        for name in [
            "../escape.png",
            "set/../../escape.png",
            "set\\..\\..\\escape.png",
            "..",
            "/etc/passwd",
            "\\\\server\\share\\x.png",
            "C:\\x.png",
            "c:x.png",
        ] {
            let err = resolve_destination(dir, name).unwrap_err();
            assert!(matches!(err, FetchError::InvalidPath(_)), "{name:?}");
        }
    }

    #[test]
    fn batch_names_need_a_file_name() {
        let dir = Path::new("/models/input");
        for name in ["", ".", "./", "set/", "set\\", "set/."] {
            assert!(resolve_destination(dir, name).is_err(), "{name:?}");
        }
    }
}
