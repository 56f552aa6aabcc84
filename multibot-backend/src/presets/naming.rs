//! Namespaced preset names (`source:rawName`).

use crate::models::PresetSourceKind;

pub const NAMESPACE_SEPARATOR: char = ':';

/// A preset name split into its source and source-local name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPreset {
    pub name: String,
    pub source: PresetSourceKind,
}

/// Build the catalog name for a raw preset name from `source`
pub fn namespaced(source: PresetSourceKind, raw: &str) -> String {
    format!("{}{}{}", source.prefix(), NAMESPACE_SEPARATOR, raw)
}

/// Split a declared preset on the first separator. A known prefix selects that
/// source; anything else belongs to the default source as a whole.
pub fn resolve_name(raw: &str) -> ResolvedPreset {
    let raw = raw.trim();
    if let Some((prefix, rest)) = raw.split_once(NAMESPACE_SEPARATOR) {
        if let Some(source) = PresetSourceKind::from_prefix(prefix) {
            return ResolvedPreset {
                name: rest.to_string(),
                source,
            };
        }
    }
    ResolvedPreset {
        name: raw.to_string(),
        source: PresetSourceKind::default(),
    }
}
