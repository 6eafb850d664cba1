//! Lexical path handling shared by every backend.

use crate::error::BackendError;

/// Splits `path` on `/` and collapses `.` and `..` lexically.
///
/// Leading, trailing and repeated separators are ignored and `..` never climbs above
/// the root, so `"/../a//./b/../c"` becomes `["a", "c"]`.
#[must_use]
pub fn normalize(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                parts.pop();
            },
            name => parts.push(name),
        }
    }
    parts
}

/// Rejects names that would address anything other than a direct child.
///
/// # Errors
/// [`BackendError::InvalidName`] for empty names, `.`/`..`, or names containing a
/// separator or NUL.
pub fn validate_name(name: &str) -> Result<(), BackendError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(BackendError::InvalidName { message: format!("{name:?}").into(), context: None });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/db/test.bin"), ["db", "test.bin"]);
        assert_eq!(normalize("/../a//./b/../c"), ["a", "c"]);
        assert_eq!(normalize("a/b/../../../.."), Vec::<&str>::new());
        assert!(normalize("/").is_empty());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("main.db-journal").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            assert!(matches!(validate_name(bad), Err(BackendError::InvalidName { .. })), "{bad:?}");
        }
    }
}
