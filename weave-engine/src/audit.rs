//! Session statistics and the audit report.

use std::collections::BTreeMap;

/// Per-mixin application counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixinStats {
    /// Targets this mixin was applied to.
    pub targets_applied: usize,
    /// Methods merged across all targets.
    pub methods_merged: usize,
    /// Fields merged across all targets.
    pub fields_merged: usize,
}

/// Per-injector match counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectorStats {
    /// Declaring mixin.
    pub mixin: String,
    /// Handler method name.
    pub handler: String,
    /// Nodes actually rewritten.
    pub matched: usize,
    /// Matches the author expected.
    pub expected: usize,
}

/// Accumulates session statistics for the audit report.
#[derive(Debug, Default)]
pub struct Audit {
    mixins: BTreeMap<String, MixinStats>,
    injectors: Vec<InjectorStats>,
    warnings: Vec<String>,
}

impl Audit {
    /// Record a completed mixin application.
    pub fn record_applied(&mut self, mixin: &str) {
        self.mixins.entry(mixin.into()).or_default().targets_applied += 1;
    }

    /// Record a merged method.
    pub fn record_method(&mut self, mixin: &str) {
        self.mixins.entry(mixin.into()).or_default().methods_merged += 1;
    }

    /// Record a merged field.
    pub fn record_field(&mut self, mixin: &str) {
        self.mixins.entry(mixin.into()).or_default().fields_merged += 1;
    }

    /// Record an injector run.
    pub fn record_injector(&mut self, mixin: &str, handler: &str, matched: usize, expected: usize) {
        self.injectors.push(InjectorStats {
            mixin: mixin.into(),
            handler: handler.into(),
            matched,
            expected,
        });
    }

    /// Record a session warning for the report.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    /// Injectors that matched fewer nodes than their author expected.
    pub fn unsatisfied(&self) -> impl Iterator<Item = &InjectorStats> {
        self.injectors.iter().filter(|stats| stats.matched < stats.expected)
    }

    /// Collected warnings.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Render the pretty-printed report table.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Mixin audit\n===========\n");

        let name_width = self
            .mixins
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(5)
            .max("mixin".len());
        out.push_str(&format!(
            "{:<name_width$}  {:>8}  {:>8}  {:>8}\n",
            "mixin", "targets", "methods", "fields"
        ));
        for (name, stats) in &self.mixins {
            out.push_str(&format!(
                "{:<name_width$}  {:>8}  {:>8}  {:>8}\n",
                name, stats.targets_applied, stats.methods_merged, stats.fields_merged
            ));
        }

        if !self.injectors.is_empty() {
            out.push_str("\nInjectors\n---------\n");
            for stats in &self.injectors {
                let marker = if stats.matched < stats.expected {
                    "  (!)"
                } else {
                    ""
                };
                out.push_str(&format!(
                    "{}::{} matched {} (expected {}){}\n",
                    stats.mixin, stats.handler, stats.matched, stats.expected, marker
                ));
            }
        }

        if !self.warnings.is_empty() {
            out.push_str("\nWarnings\n--------\n");
            for warning in &self.warnings {
                out.push_str(&format!("- {warning}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_mixins_and_flags_unsatisfied_injectors() {
        let mut audit = Audit::default();
        audit.record_applied("a/MixinOne");
        audit.record_method("a/MixinOne");
        audit.record_method("a/MixinOne");
        audit.record_field("a/MixinOne");
        audit.record_injector("a/MixinOne", "hook", 0, 1);
        audit.record_injector("a/MixinOne", "other", 2, 2);
        audit.warn("something soft failed");

        assert_eq!(audit.unsatisfied().count(), 1);
        let report = audit.render();
        assert!(report.contains("a/MixinOne"));
        assert!(report.contains("hook matched 0 (expected 1)  (!)"));
        assert!(report.contains("something soft failed"));
    }
}
