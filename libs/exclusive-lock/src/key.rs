//! Store key derivation.

/// Separator between the key prefix and the resource name.
pub const KEY_SEPARATOR: char = ':';

/// Collapse every run of characters outside `[A-Za-z0-9_]` into a single `-`.
///
/// Cosmetic differences in a resource name ("my app", "my  app", "my-app")
/// map to the same slug.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

/// Build the store key for a resource name under a key-space prefix.
pub fn lock_key(prefix: &str, name: &str) -> String {
    format!("{}{KEY_SEPARATOR}{}", slugify(prefix), slugify(name))
}
