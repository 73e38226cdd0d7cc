//! Sensor aliasing.
//!
//! Maps logical sensor ids (chip id, or colour name for Tilts) to
//! human-readable names for reporting.

use std::collections::BTreeMap;

/// A type alias for id-to-name mappings.
pub type AliasMap = BTreeMap<String, String>;

/// A parsed alias mapping a sensor id to a human-readable name.
#[derive(Debug, Clone)]
pub struct Alias {
    /// The logical id (e.g., "112233" or "Purple")
    pub id: String,
    /// The human-readable name (e.g., "Stout")
    pub name: String,
}

/// Parse an alias from a string in the format "ID=NAME".
///
/// # Example
/// ```
/// use brewbeacon::alias::parse_alias;
///
/// let alias = parse_alias("Purple=Stout").unwrap();
/// assert_eq!(alias.id, "Purple");
/// assert_eq!(alias.name, "Stout");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    match src.split_once('=') {
        Some((id, _)) if id.trim().is_empty() => Err("invalid alias: empty id".into()),
        Some((id, name)) => Ok(Alias {
            id: id.trim().into(),
            name: name.into(),
        }),
        None => Err("invalid alias: expected format ID=NAME".into()),
    }
}

/// Convert a slice of Alias values into an AliasMap.
pub fn to_map(aliases: &[Alias]) -> AliasMap {
    aliases
        .iter()
        .map(|a| (a.id.clone(), a.name.clone()))
        .collect()
}

/// Name to report for `id`: alias first, then the name the sensor reported, then the id.
pub fn resolve_name<'a>(id: &'a str, reported: Option<&'a str>, aliases: &'a AliasMap) -> &'a str {
    aliases
        .get(id)
        .map(String::as_str)
        .or(reported.filter(|name| !name.is_empty()))
        .unwrap_or(id)
}
