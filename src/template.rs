//! Message template rendering.
//!
//! Templates carry a literal substitution token that gets replaced with the
//! recipient's display name before an entry is recorded.

/// Literal placeholder replaced by the contact name at render time.
pub const NAME_TOKEN: &str = "[Nome]";

/// Display name used when the import line carries no name field.
pub const DEFAULT_NAME: &str = "Cliente";

/// Replace every occurrence of the substitution token with the given name.
pub fn render(template: &str, name: &str) -> String {
    template.replace(NAME_TOKEN, name)
}
