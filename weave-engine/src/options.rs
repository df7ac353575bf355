//! Process-wide engine options.
//!
//! Hosts construct one [`EngineOptions`] value and hand it to the engine;
//! there is no environment-variable discovery in the core.

/// Placement strategy for mixin constructor-initializer splicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialiserInjectionMode {
    /// After the last `putfield` to a target-declared field.
    #[default]
    Default,
    /// Immediately after the `super`/`this` delegate call.
    Safe,
}

/// Which side of a client/server split the host is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Side {
    /// No side filtering; all declared mixins load.
    #[default]
    Universal,
    /// Client-side lists apply.
    Client,
    /// Server-side lists apply.
    Server,
}

/// Engine configuration switches. Field names follow the option keys the
/// host exposes.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Master debug switch.
    pub debug: bool,
    /// Write transformed trees to the export sink.
    pub debug_export: bool,
    /// Glob on binary class names gating the export (`*`, `**`, `?`).
    pub debug_export_filter: Option<String>,
    /// Run the stricter verifier; promote its warnings to errors.
    pub debug_verify: bool,
    /// Elevate debug logs to info.
    pub debug_verbose: bool,
    /// Turn injector `expect` mismatches into errors.
    pub debug_count_injections: bool,
    /// Global strict checks.
    pub debug_strict: bool,
    /// Turn unique-conflict warnings into errors.
    pub debug_strict_unique: bool,
    /// Turn target-resolution warnings into errors.
    pub debug_strict_targets: bool,
    /// Write target bytes when application fails.
    pub dump_target_on_failure: bool,
    /// Post-application interface implementation check.
    pub checks_interfaces: bool,
    /// Promote interface-check warnings to errors.
    pub checks_interfaces_strict: bool,
    /// Never fail on constraint violations.
    pub ignore_constraints: bool,
    /// Enable the hot-swap agent hook.
    pub hot_swap: bool,
    /// Override the refmap obfuscation context.
    pub obf_environment: Option<String>,
    /// Bypass refmap lookups entirely.
    pub disable_refmap: bool,
    /// Ignore the `required` flag on configs.
    pub ignore_required: bool,
    /// Minimum compatibility level demanded of every config.
    pub compat_level: Option<u32>,
    /// Constructor-initializer splice placement.
    pub initialiser_injection_mode: InitialiserInjectionMode,
    /// Record applied mixin names in the target source-debug attribute.
    pub source_debug_extension: bool,
    /// Side filter for side-split mixin lists.
    pub side: Side,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debug: false,
            debug_export: false,
            debug_export_filter: None,
            debug_verify: false,
            debug_verbose: false,
            debug_count_injections: false,
            debug_strict: false,
            debug_strict_unique: false,
            debug_strict_targets: false,
            dump_target_on_failure: false,
            checks_interfaces: false,
            checks_interfaces_strict: false,
            ignore_constraints: false,
            hot_swap: false,
            obf_environment: None,
            disable_refmap: false,
            ignore_required: false,
            compat_level: None,
            initialiser_injection_mode: InitialiserInjectionMode::Default,
            source_debug_extension: false,
            side: Side::Universal,
        }
    }
}

impl EngineOptions {
    /// Whether unique-member conflicts are errors rather than warnings.
    pub fn strict_unique(&self) -> bool {
        self.debug_strict || self.debug_strict_unique
    }

    /// Whether target-resolution problems are errors rather than warnings.
    pub fn strict_targets(&self) -> bool {
        self.debug_strict || self.debug_strict_targets
    }

    /// `true` when the export filter admits the given binary class name.
    pub fn export_matches(&self, binary_name: &str) -> bool {
        match &self.debug_export_filter {
            Some(filter) => glob_matches(filter, binary_name),
            None => true,
        }
    }
}

/// Match a class-name glob against a binary name. `?` matches one
/// non-separator character, `*` any run of non-separator characters, and
/// `**` any run including separators.
pub(crate) fn glob_matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    glob_inner(&pattern, &name)
}

fn glob_inner(pattern: &[char], name: &[char]) -> bool {
    match pattern.first() {
        None => name.is_empty(),
        Some('*') if pattern.get(1) == Some(&'*') => {
            let rest = &pattern[2..];
            (0..=name.len()).any(|split| glob_inner(rest, &name[split..]))
        }
        Some('*') => {
            let rest = &pattern[1..];
            let limit = name
                .iter()
                .position(|c| *c == '.')
                .unwrap_or(name.len());
            (0..=limit).any(|split| glob_inner(rest, &name[split..]))
        }
        Some('?') => match name.first() {
            Some(c) if *c != '.' => glob_inner(&pattern[1..], &name[1..]),
            _ => false,
        },
        Some(literal) => match name.first() {
            Some(c) if c == literal => glob_inner(&pattern[1..], &name[1..]),
            _ => false,
        },
    }
}
