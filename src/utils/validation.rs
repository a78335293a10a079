use crate::services::upload_service::types::UploadError;
use std::path::{Component, Path, PathBuf};

const MAX_FILENAME_BYTES: usize = 255;

/// Reduce a client-supplied filename to a single safe path component.
///
/// Directory parts are stripped, reserved characters replaced with `_`, and the
/// result is truncated to 255 bytes on a char boundary.
pub fn sanitize_filename(filename: &str) -> Result<String, UploadError> {
    // Treat both separators alike so "..\\evil" is stripped on unix too
    let normalized = filename.replace('\\', "/");
    let name = Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == '/'
                || c == '\\'
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = if sanitized.len() > MAX_FILENAME_BYTES {
        let mut end = MAX_FILENAME_BYTES;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    let trimmed = sanitized.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return Err(UploadError::InvalidFilename(filename.to_string()));
    }
    // Leading dots would collide with the hidden staging files
    if trimmed.starts_with('.') {
        return Ok(format!("_{}", trimmed.trim_start_matches('.')));
    }

    Ok(trimmed.to_string())
}

/// Resolve a sanitized filename under `root`, refusing anything that escapes it.
pub fn resolve_destination(root: &Path, filename: &str) -> Result<PathBuf, UploadError> {
    let name = sanitize_filename(filename)?;

    let mut components = Path::new(&name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(UploadError::InvalidFilename(filename.to_string())),
    }

    let destination = root.join(&name);
    if destination.parent() != Some(root) {
        return Err(UploadError::InvalidFilename(filename.to_string()));
    }

    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_filename_is_kept() {
        assert_eq!(sanitize_filename("mockFile.mov").unwrap(), "mockFile.mov");
        assert_eq!(sanitize_filename("relatório 2021.pdf").unwrap(), "relatório 2021.pdf");
    }

    #[test]
    fn test_directory_parts_are_stripped() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini").unwrap(), "boot.ini");
        assert_eq!(sanitize_filename("/abs/path/file.txt").unwrap(), "file.txt");
    }

    #[test]
    fn test_reserved_characters_are_replaced() {
        assert_eq!(sanitize_filename("a:b*c?.txt").unwrap(), "a_b_c_.txt");
        assert_eq!(sanitize_filename("tab\there.txt").unwrap(), "tab_here.txt");
    }

    #[test]
    fn test_dot_names_are_rejected() {
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename(".").is_err());
        assert!(sanitize_filename("dir/..").is_err());
    }

    #[test]
    fn test_hidden_names_are_unhidden() {
        assert_eq!(sanitize_filename(".bashrc").unwrap(), "_bashrc");
    }

    #[test]
    fn test_long_names_truncate_on_char_boundary() {
        let long = "é".repeat(200);
        let sanitized = sanitize_filename(&long).unwrap();
        assert!(sanitized.len() <= 255);
        assert!(sanitized.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_destination_stays_under_root() {
        let root = Path::new("/srv/downloads");
        assert_eq!(
            resolve_destination(root, "../../etc/passwd").unwrap(),
            PathBuf::from("/srv/downloads/passwd")
        );
        assert_eq!(
            resolve_destination(root, "video.mp4").unwrap(),
            PathBuf::from("/srv/downloads/video.mp4")
        );
        assert!(resolve_destination(root, "..").is_err());
    }
}
