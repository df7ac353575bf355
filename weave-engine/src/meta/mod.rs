//! The class metadata graph: lazily built, cached records of hierarchy,
//! members and mixin relationships.

mod cache;
mod class_meta;
mod mixin_meta;

pub use cache::{LookupFlags, MetaCache, SearchType, Traversal};
pub use class_meta::{ClassMeta, FrameRecord, MemberFlags, MemberMeta};
pub use mixin_meta::MixinMeta;
