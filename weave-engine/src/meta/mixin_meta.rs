//! Per-mixin metadata records.

use weave_types::Visibility;

/// Metadata for one mixin class, resolved from its annotations and the
/// declaring config.
#[derive(Debug, Clone, PartialEq)]
pub struct MixinMeta {
    /// Internal name of the mixin class.
    pub name: String,
    /// Application priority; lower applies earlier.
    pub priority: i32,
    /// Targets declared by class reference.
    pub declared_targets: Vec<String>,
    /// Targets inferred from soft (string) target declarations.
    pub soft_targets: Vec<String>,
    /// Compatibility-level floor required by this mixin.
    pub compat_level: u32,
    /// Required visibility of merged members.
    pub visibility: Visibility,
    /// `true` when the mixin may only target interfaces.
    pub interface_only: bool,
    /// Permitted to target classes not present at compile time.
    pub pseudo: bool,
    /// Name of the config that declared this mixin.
    pub config: String,
}

impl MixinMeta {
    /// Priority assumed when neither the mixin nor its config declares one.
    pub const DEFAULT_PRIORITY: i32 = 1000;

    /// All targets, declared before inferred.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.declared_targets
            .iter()
            .chain(self.soft_targets.iter())
            .map(String::as_str)
    }

    /// `true` when this mixin names `target` directly or softly.
    pub fn targets_class(&self, target: &str) -> bool {
        self.targets().any(|declared| declared == target)
    }
}
