//! Engine error taxonomy.
//!
//! Failures split into two families: per-mixin failures that skip the mixin
//! and let the rest of the session proceed, and applicator failures that
//! abandon the whole target. [`MixinError::is_recoverable`] encodes the
//! split; strict-mode options can promote the recoverable ones.

use weave_tree::TreeError;
use weave_types::TypeParseError;

use crate::selector::SelectorError;

/// Shorthand result for engine operations.
pub type Result<T> = core::result::Result<T, MixinError>;

/// Failure while reconstructing locals for a method.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidMethodError {
    /// Class metadata for the method owner could not be resolved.
    #[error("cannot resolve metadata for {class}")]
    UnresolvableClass {
        /// Internal name of the unresolvable class.
        class: String,
    },
    /// The frame analysis over the method body failed.
    #[error("frame analysis failed for {class}::{method}{desc}: {reason}")]
    FrameAnalysis {
        /// Internal name of the owner.
        class: String,
        /// Method name.
        method: String,
        /// Method descriptor.
        desc: String,
        /// What went wrong.
        reason: String,
    },
    /// The simulated frame shrank below the initial frame size, which
    /// indicates corrupt frame data in the method.
    #[error(
        "frame underflow in {class}::{method}{desc}: size {size} below initial {initial}"
    )]
    FrameUnderflow {
        /// Internal name of the owner.
        class: String,
        /// Method name.
        method: String,
        /// Method descriptor.
        desc: String,
        /// Simulated frame size at the failure point.
        size: usize,
        /// Initial frame size derived from the method arguments.
        initial: usize,
    },
}

/// Engine-wide error, one variant per observable failure kind.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MixinError {
    /// A member selector string failed to parse or validate.
    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),

    /// An injector annotation is semantically wrong.
    #[error("invalid injection {handler} in {mixin}: {reason}")]
    InvalidInjection {
        /// The mixin declaring the handler.
        mixin: String,
        /// Handler method name.
        handler: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A declared target class is missing at runtime.
    #[error("target {target} of mixin {mixin} was not found")]
    TargetNotFound {
        /// The mixin whose target is missing.
        mixin: String,
        /// The missing target class.
        target: String,
    },

    /// A compatibility-level or runtime constraint was breached.
    #[error("constraint violated by {mixin}: {constraint}")]
    ConstraintViolation {
        /// The offending mixin.
        mixin: String,
        /// Description of the breached constraint.
        constraint: String,
    },

    /// Two non-unique merges hit the same signature at equal priority.
    #[error("merge conflict on {target}::{member} from {mixin}")]
    MergeConflict {
        /// The target class.
        target: String,
        /// `name + desc` of the conflicted member.
        member: String,
        /// The mixin losing the merge.
        mixin: String,
    },

    /// A shadow member has no counterpart in the target hierarchy.
    #[error("shadow {member} in {mixin} does not resolve in the target")]
    ShadowUnresolved {
        /// The mixin declaring the shadow.
        mixin: String,
        /// `name + desc` of the unresolved shadow.
        member: String,
    },

    /// A shadow decorated final is written to by the mixin.
    #[error(
        "mixin {mixin} writes to final shadow {member} (instruction {insn_index})"
    )]
    FinalShadowWrite {
        /// The offending mixin.
        mixin: String,
        /// `name + desc` of the final shadow.
        member: String,
        /// Visit-order index of the offending write.
        insn_index: usize,
    },

    /// Unrecoverable failure while applying a mixin to a target.
    #[error("failed to apply mixins to {target}: {reason}")]
    ApplicatorFailure {
        /// The target class being transformed.
        target: String,
        /// Cause description.
        reason: String,
    },

    /// An injector matched fewer nodes than it requires.
    #[error("{handler} matched {matched} node(s), required {required}")]
    InjectionNotMatched {
        /// Handler method name.
        handler: String,
        /// Required match count.
        required: usize,
        /// Observed match count.
        matched: usize,
    },

    /// Two producers registered the same synthetic class name.
    #[error("synthetic class name collision: {name}")]
    SyntheticCollision {
        /// The colliding name.
        name: String,
    },

    /// The external provider failed to load a referenced class.
    #[error("failed to load class {name}")]
    ClassLoadFailure {
        /// Internal name of the class.
        name: String,
    },

    /// Local-variable reconstruction failed.
    #[error(transparent)]
    InvalidMethod(#[from] InvalidMethodError),

    /// A mixin configuration resource could not be parsed.
    #[error("invalid mixin config {name}: {reason}")]
    InvalidConfig {
        /// Config resource name.
        name: String,
        /// Parse diagnostic.
        reason: String,
    },

    /// The tree codec rejected input or output.
    #[error(transparent)]
    Codec(#[from] TreeError),

    /// A type or method descriptor failed to parse.
    #[error(transparent)]
    Type(#[from] TypeParseError),
}

impl MixinError {
    /// `true` when the failure is scoped to one mixin and the session can
    /// continue with the remaining mixins.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MixinError::InvalidSelector(_)
                | MixinError::InvalidInjection { .. }
                | MixinError::MergeConflict { .. }
                | MixinError::InjectionNotMatched { .. }
                | MixinError::ClassLoadFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_split() {
        let conflict = MixinError::MergeConflict {
            target: "a/B".into(),
            member: "f()V".into(),
            mixin: "a/MixinB".into(),
        };
        assert!(conflict.is_recoverable());

        let fatal = MixinError::ApplicatorFailure {
            target: "a/B".into(),
            reason: "boom".into(),
        };
        assert!(!fatal.is_recoverable());
    }
}
