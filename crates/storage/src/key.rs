//! Object key validation.
//!
//! Record identifiers come straight out of the catalog and are used as object
//! keys, so they get normalized before they are sent anywhere (and before a
//! configured prefix is applied to them).

use crate::error::{ErrorKind, Result};

/// Validates and normalizes an object key.
/// Ensures that keys don't escape the bucket root or configured prefix (no
/// `..` traversal).
///
/// > **Note:** Only `/` is treated as a separator. Backslashes and any other
/// >           characters are passed through untouched. Null bytes are
/// >           explicitly rejected.
///
/// # Returns
/// Returns the normalized key if valid, or [`InvalidKey`](crate::error::ErrorKind::InvalidKey)
/// if invalid.
///
/// # Examples
///
/// ```
/// use stocktake_storage::validate_key;
/// // Valid keys
/// assert!(validate_key("5f2b7c1e9a").is_ok());
/// assert!(validate_key("objects/2024/5f2b7c1e9a").is_ok());
/// assert!(validate_key("a/../5f2b7c1e9a").is_ok()); // (never leaves root)
/// // Invalid keys
/// assert!(validate_key("../secret").is_err());
/// assert!(validate_key("a/../../b").is_err());
/// assert!(validate_key("a\0b").is_err());
/// assert!(validate_key("").is_err());
/// // Keys get resolved
/// assert_eq!(validate_key("/wrong/../objects//./5f2b/").unwrap(), "objects/5f2b");
/// ```
pub fn validate(key: impl AsRef<str>) -> Result<String> {
    let key = key.as_ref();
    if key.contains('\0') {
        exn::bail!(ErrorKind::InvalidKey(key.to_string()));
    }
    let mut segments = Vec::new();
    for segment in key.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidKey(key.to_string()));
                }
            },
            s => segments.push(s),
        }
    }
    match segments.is_empty() {
        true => exn::bail!(ErrorKind::InvalidKey(key.to_string())),
        false => Ok(segments.join("/")),
    }
}
