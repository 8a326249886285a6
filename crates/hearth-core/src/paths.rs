use std::path::{Path, PathBuf};

use crate::{Result, TransferError};

/// Longest sanitized name component kept, in bytes
const MAX_NAME_LEN: usize = 128;

/// Validates a single path component received from a client.
///
/// Rejects:
/// - Empty names
/// - Any `/` or `\` separator
/// - Parent directory traversal (`..`) and hidden names (leading `.`)
/// - NUL bytes
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty name".into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(TransferError::InvalidPath(format!(
            "path separator not allowed: {name}"
        )));
    }
    if name.contains("..") {
        return Err(TransferError::InvalidPath(format!(
            "parent directory traversal not allowed: {name}"
        )));
    }
    if name.starts_with('.') {
        return Err(TransferError::InvalidPath(format!(
            "hidden name not allowed: {name}"
        )));
    }
    if name.contains('\0') {
        return Err(TransferError::InvalidPath("NUL byte not allowed".into()));
    }
    Ok(())
}

/// Joins a validated single component onto `root`.
pub fn safe_join(root: &Path, name: &str) -> Result<PathBuf> {
    validate_name(name)?;
    Ok(root.join(name))
}

/// Maps a client-supplied file name onto the allow-list `[A-Za-z0-9._-]`.
///
/// Everything else becomes `_`, leading dots are stripped, repeated dots are
/// collapsed, and the result is capped at 128 bytes. Never empty.
pub fn sanitize_file_name(name: &str) -> String {
    // Only keep the last component of whatever path the client sent
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '.' && out.ends_with('.') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_start_matches('.');
    let mut out = trimmed.to_string();
    if out.len() > MAX_NAME_LEN {
        // Keep the extension when truncating
        let ext = out
            .rfind('.')
            .map(|i| out[i..].to_string())
            .filter(|e| e.len() < 16)
            .unwrap_or_default();
        out.truncate(MAX_NAME_LEN - ext.len());
        out.push_str(&ext);
    }

    if out.is_empty() {
        "file".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_name("").is_err());
    }

    #[test]
    fn rejects_separators() {
        assert!(validate_name("a/b.txt").is_err());
        assert!(validate_name("a\\b.txt").is_err());
        assert!(validate_name("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_name("..").is_err());
        assert!(validate_name("..passwd").is_err());
        assert!(validate_name("x..y").is_err());
    }

    #[test]
    fn rejects_hidden_and_nul() {
        assert!(validate_name(".index.json").is_err());
        assert!(validate_name("a\0b").is_err());
    }

    #[test]
    fn accepts_artifact_name() {
        assert!(validate_name("0b6f7c_report-v2.pdf").is_ok());
    }

    #[test]
    fn safe_join_stays_in_root() {
        let root = Path::new("/srv/uploads");
        assert_eq!(
            safe_join(root, "a.txt").unwrap(),
            PathBuf::from("/srv/uploads/a.txt")
        );
        assert!(matches!(
            safe_join(root, "../a.txt"),
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[test]
    fn sanitize_replaces_disallowed_chars() {
        assert_eq!(sanitize_file_name("my photo (1).JPG"), "my_photo__1_.JPG");
        assert_eq!(sanitize_file_name("résumé.pdf"), "r_sum_.pdf");
    }

    #[test]
    fn sanitize_drops_directories_and_dots() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\a.txt"), "a.txt");
        assert_eq!(sanitize_file_name("..hidden"), "hidden");
        assert_eq!(sanitize_file_name("a...b"), "a.b");
    }

    #[test]
    fn sanitize_never_empty() {
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name("dir/"), "file");
    }

    #[test]
    fn sanitize_caps_length_and_keeps_extension() {
        let long = format!("{}.png", "x".repeat(300));
        let out = sanitize_file_name(&long);
        assert_eq!(out.len(), MAX_NAME_LEN);
        assert!(out.ends_with(".png"));
        assert!(validate_name(&out).is_ok());
    }

    #[test]
    fn sanitized_names_always_validate() {
        for raw in ["a b", "../x", "..", "\\\\server\\share", "ok.txt", "💾.bin"] {
            let clean = sanitize_file_name(raw);
            assert!(validate_name(&clean).is_ok(), "{raw:?} -> {clean:?}");
        }
    }
}
