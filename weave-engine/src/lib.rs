//! Weave mixin engine implementation.
//!
//! The engine composes fragments of annotated mixin classes into target
//! classes at load time: merging interfaces, fields, initializers and
//! methods, then rewriting target method bodies to install callbacks,
//! argument modifiers, call redirects and variable modifiers at resolved
//! injection points.
//!
//! Hosts drive the engine through [`transform::MixinEngine`]: queue parsed
//! [`config::MixinConfig`] resources, then hand every loaded class through
//! [`transform::MixinEngine::transform`] together with a
//! [`weave_tree::TreeCodec`] and a [`weave_tree::ClassSource`].

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod annotations;
pub mod apply;
pub mod audit;
pub mod config;
pub mod error;
pub mod inject;
pub mod locals;
pub mod meta;
pub mod options;
pub mod point;
pub mod remap;
pub mod selector;
pub mod target;
pub mod transform;

#[cfg(test)]
mod tests;

// Fully re-export the tree and type crates.
#[doc(no_inline)]
pub use weave_tree;
#[doc(no_inline)]
pub use weave_types;

pub mod prelude {
    //! Required implementations for full functionality.

    #[doc(no_inline)]
    pub use weave_tree::{
        AnnotationNode, AnnotationValue, ClassNode, ClassSource, FieldNode, Insn, InsnId,
        InsnList, MethodNode, Opcode, TreeCodec, TreeError,
    };
    #[doc(no_inline)]
    pub use weave_types::{Access, JavaType, MethodDescriptor, Visibility};

    pub use crate::{
        audit::Audit,
        config::MixinConfig,
        error::{InvalidMethodError, MixinError, Result},
        inject::{
            ArgsClassGenerator, InjectionInfo, InjectorKind, LocalCapture,
            SyntheticClassInfo,
        },
        locals::{locals_at, LocalSlot, LocalsSettings},
        meta::{ClassMeta, MemberMeta, MetaCache, MixinMeta, SearchType, Traversal},
        options::{EngineOptions, InitialiserInjectionMode, Side},
        point::{AtCode, AtPoint, InjectionPoint, Shift, Slice},
        remap::{RefMap, Remapper, RemapperChain},
        selector::{MatchResult, MemberSelector, Quantifier, SelectContext},
        target::{InjectionNodes, Target},
        transform::{ExportSink, MixinEngine},
    };
}
