//! The reference map: class-scoped author-facing reference resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Two-level map of `class name → (reference → remapped reference)`,
/// loaded from a serialized side table produced at compile time.
///
/// The optional `data` section carries per-environment override tables
/// keyed by obfuscation-environment name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefMap {
    /// The primary mapping table.
    #[serde(default)]
    pub mappings: BTreeMap<String, BTreeMap<String, String>>,
    /// Per-environment override tables.
    #[serde(default)]
    pub data: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

impl RefMap {
    /// Conventional resource name consumers may probe for.
    pub const DEFAULT_RESOURCE: &'static str = "mixin.refmap.json";

    /// An empty refmap; every lookup returns its input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a refmap from its JSON serialization.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Pretty-printed JSON serialization.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Resolve a reference in the scope of `class_name`.
    ///
    /// A known class answers its own bucket (falling back to the original
    /// reference); a `None` class scans every bucket and answers the first
    /// hit.
    pub fn remap<'a>(&'a self, class_name: Option<&str>, reference: &'a str) -> &'a str {
        match class_name {
            Some(class_name) => self
                .mappings
                .get(class_name)
                .and_then(|bucket| bucket.get(reference))
                .map(String::as_str)
                .unwrap_or(reference),
            None => self
                .mappings
                .values()
                .find_map(|bucket| bucket.get(reference))
                .map(String::as_str)
                .unwrap_or(reference),
        }
    }

    /// Resolve within a named environment table, falling back to the
    /// primary table when the environment has no answer.
    pub fn remap_using_env<'a>(
        &'a self,
        environment: &str,
        class_name: Option<&str>,
        reference: &'a str,
    ) -> &'a str {
        if let Some(table) = self.data.get(environment) {
            if let Some(class_name) = class_name {
                if let Some(mapped) = table.get(class_name).and_then(|b| b.get(reference)) {
                    return mapped;
                }
            }
        }
        self.remap(class_name, reference)
    }

    /// Record a mapping, used by tests and tooling.
    pub fn add_mapping(
        &mut self,
        class_name: &str,
        reference: impl Into<String>,
        remapped: impl Into<String>,
    ) {
        self.mappings
            .entry(class_name.into())
            .or_default()
            .insert(reference.into(), remapped.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RefMap {
        let mut refmap = RefMap::new();
        refmap.add_mapping("a/MixinOne", "compute(I)I", "func_1234(I)I");
        refmap.add_mapping("a/MixinTwo", "other()V", "func_9999()V");
        refmap
    }

    #[test]
    fn scoped_lookup_prefers_own_bucket() {
        let refmap = sample();
        assert_eq!(
            refmap.remap(Some("a/MixinOne"), "compute(I)I"),
            "func_1234(I)I"
        );
        assert_eq!(refmap.remap(Some("a/MixinOne"), "missing"), "missing");
        assert_eq!(refmap.remap(Some("a/Unknown"), "compute(I)I"), "compute(I)I");
    }

    #[test]
    fn null_class_scans_all_buckets() {
        let refmap = sample();
        assert_eq!(refmap.remap(None, "other()V"), "func_9999()V");
        assert_eq!(refmap.remap(None, "missing"), "missing");
    }

    #[test]
    fn environment_table_wins_when_present() {
        let mut refmap = sample();
        refmap
            .data
            .entry("named:srg".into())
            .or_default()
            .entry("a/MixinOne".into())
            .or_default()
            .insert("compute(I)I".into(), "srg_0001(I)I".into());

        assert_eq!(
            refmap.remap_using_env("named:srg", Some("a/MixinOne"), "compute(I)I"),
            "srg_0001(I)I"
        );
        // Unknown environment falls back to the primary table.
        assert_eq!(
            refmap.remap_using_env("notch", Some("a/MixinOne"), "compute(I)I"),
            "func_1234(I)I"
        );
    }

    #[test]
    fn json_roundtrip() {
        let refmap = sample();
        let parsed = RefMap::parse(&refmap.to_json()).expect("valid json");
        assert_eq!(parsed, refmap);
    }
}
