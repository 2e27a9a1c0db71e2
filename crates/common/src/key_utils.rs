//! Object-key utilities for the mount namespace.
//!
//! Object stores have no real directories; keys are flat strings in which
//! `/` is treated as a separator by delimited listing. These helpers keep
//! the key arithmetic (joining, validation, ETag normalization) in one
//! place.

use crate::error::KeyError;

/// Validate a single name component as it arrives from a kernel lookup.
///
/// Components must be non-empty, must not contain `/` or NUL, and must not
/// be `.` or `..` (the kernel resolves those itself).
///
/// # Errors
/// Returns the specific [`KeyError`] describing the violation.
pub fn validate_name_component(component: &str) -> Result<(), KeyError> {
    if component.is_empty() {
        return Err(KeyError::Empty);
    }
    if component == "." || component == ".." {
        return Err(KeyError::Reserved {
            component: component.to_string(),
        });
    }
    if component.contains('/') {
        return Err(KeyError::ContainsSeparator {
            component: component.to_string(),
        });
    }
    if component.contains('\0') {
        return Err(KeyError::ContainsNul);
    }
    Ok(())
}

/// Validate a backend `dir_name` from configuration.
///
/// Same rules as [`validate_name_component`]; backends appear as top-level
/// directories of the mount and their names travel through the same kernel
/// interface.
pub fn validate_dir_name(dir_name: &str) -> Result<(), KeyError> {
    validate_name_component(dir_name)
}

/// Join a parent key (or prefix) with a child component.
///
/// An empty parent yields the bare component; otherwise a single `/` is
/// inserted. The parent is assumed not to carry a trailing slash.
pub fn join_key(parent: &str, component: &str) -> String {
    if parent.is_empty() {
        component.to_string()
    } else {
        format!("{parent}/{component}")
    }
}

/// Normalize an ETag by trimming surrounding double quotes.
///
/// S3 returns ETags wrapped in quotes; comparisons and `If-Match` headers
/// use the bare value.
pub fn trim_etag(etag: &str) -> &str {
    etag.trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_component() {
        assert!(validate_name_component("data").is_ok());
        assert!(validate_name_component("weights.bin").is_ok());
        assert_eq!(validate_name_component(""), Err(KeyError::Empty));
        assert!(matches!(
            validate_name_component("a/b"),
            Err(KeyError::ContainsSeparator { .. })
        ));
        assert!(matches!(
            validate_name_component("."),
            Err(KeyError::Reserved { .. })
        ));
        assert!(matches!(
            validate_name_component(".."),
            Err(KeyError::Reserved { .. })
        ));
        assert_eq!(validate_name_component("a\0b"), Err(KeyError::ContainsNul));
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "file"), "file");
        assert_eq!(join_key("dir", "file"), "dir/file");
        assert_eq!(join_key("a/b", "c"), "a/b/c");
    }

    #[test]
    fn test_trim_etag() {
        assert_eq!(trim_etag("\"abc123\""), "abc123");
        assert_eq!(trim_etag("abc123"), "abc123");
        assert_eq!(trim_etag("\"\""), "");
    }
}
