//! The interface-target applicator variant.
//!
//! Interface mixins run the full method-merge rules (overwrite, intrinsic,
//! unique, accessor/invoker synthesis, priority and final checks). What
//! the variant disables is field merging (shadow fields are logged and
//! dropped), initializer splicing, and the injection passes; the merge
//! pass rejects injector-annotated methods outright.

use weave_tree::ClassNode;

use crate::annotations::MemberDecorations;
use crate::apply::class::{merge_interfaces, merge_methods};
use crate::apply::{ApplicatorContext, MergeState, MergeStyle, MixinTargetContext};
use crate::error::Result;

/// Apply one prepared mixin to an interface target.
pub fn apply_interface_mixin(
    target: &mut ClassNode,
    mixin: &mut MixinTargetContext,
    merge: &mut MergeState,
    ctx: &mut ApplicatorContext<'_>,
) -> Result<()> {
    let mixin_name = mixin.meta.name.clone();

    merge_interfaces(target, mixin, ctx);

    // Field merging is disabled on interface targets; shadow fields are
    // logged and dropped, everything else is dropped silently.
    for field in &mixin.node.fields {
        let decorations = MemberDecorations::parse(&field.annotations, &field.name);
        if decorations.shadow {
            ctx.audit.warn(format!(
                "shadow field {} dropped: interface mixin {mixin_name} cannot shadow",
                field.name
            ));
        }
    }

    // Initializers never run and injections never apply; the shared merge
    // pass errors on any injector-annotated method it encounters.
    let _handlers = merge_methods(target, mixin, merge, ctx, MergeStyle::Interface)?;

    ctx.audit.record_applied(&mixin_name);
    Ok(())
}
