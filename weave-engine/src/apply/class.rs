//! The class-target applicator: merges one mixin into one target class.

use tracing::debug;
use weave_tree::{ClassNode, Insn, InsnId, MethodNode, Opcode};
use weave_types::{Access, JavaType, MethodDescriptor, Visibility, CTOR_NAME};

use crate::annotations::{self, MemberDecorations, ReferenceResolver};
use crate::apply::{
    clone_with_fresh_labels, retarget_desc, retarget_insn, retarget_method,
    ApplicatorContext, MergeState, MergeStyle, MergedBy, MixinTargetContext,
};
use crate::error::{MixinError, Result};
use crate::inject::{inject, InjectionInfo, InjectorContext};
use crate::meta::{MemberMeta, SearchType};
use crate::options::InitialiserInjectionMode;
use crate::selector::SelectContext;
use crate::target::Target;

/// Apply one prepared mixin to a class target, in the canonical order:
/// interfaces, fields, initializers, methods, then injections.
pub fn apply_class_mixin(
    target: &mut ClassNode,
    mixin: &mut MixinTargetContext,
    merge: &mut MergeState,
    ctx: &mut ApplicatorContext<'_>,
) -> Result<()> {
    let mixin_name = mixin.meta.name.clone();
    let target_name = target.name.clone();

    merge_interfaces(target, mixin, ctx);
    merge_fields(target, mixin, ctx)?;
    check_final_shadow_writes(mixin, &target_name)?;
    splice_initializers(target, mixin, ctx)?;
    let handlers = merge_methods(target, mixin, merge, ctx, MergeStyle::Class)?;
    apply_injections(target, mixin, &handlers, ctx)?;

    ctx.audit.record_applied(&mixin_name);
    debug!(mixin = mixin_name, class = target_name, "mixin applied");
    Ok(())
}

pub(super) fn merge_interfaces(
    target: &mut ClassNode,
    mixin: &MixinTargetContext,
    ctx: &mut ApplicatorContext<'_>,
) {
    for itf in mixin.node.interfaces.clone() {
        if itf == target.name {
            continue;
        }
        if target.add_interface(&itf) {
            if let Some(meta) = ctx.cache.get_mut(&target.name) {
                meta.interfaces.push(itf);
            }
        }
    }
}

fn merge_fields(
    target: &mut ClassNode,
    mixin: &MixinTargetContext,
    ctx: &mut ApplicatorContext<'_>,
) -> Result<()> {
    let mixin_name = &mixin.meta.name;
    for field in mixin.node.fields.clone() {
        let decorations = MemberDecorations::parse(&field.annotations, &field.name);
        if decorations.shadow {
            let resolved = ctx.cache.find_field_in_hierarchy(
                &target.name,
                &field.name,
                None,
                SearchType::AllClasses,
                ctx.source,
            );
            match resolved {
                Some(found) => {
                    if found.access.visibility() < field.access.visibility() {
                        ctx.audit.warn(format!(
                            "shadow {} in {mixin_name} claims wider access than the target member",
                            field.name
                        ));
                    }
                }
                None if mixin.meta.pseudo => {
                    ctx.audit.warn(format!(
                        "pseudo mixin {mixin_name} shadows missing field {}",
                        field.name
                    ));
                }
                None => {
                    return Err(MixinError::ShadowUnresolved {
                        mixin: mixin_name.clone(),
                        member: format!("{}:{}", field.name, field.desc),
                    });
                }
            }
            continue;
        }

        if target.field(&field.name).is_some() {
            ctx.audit.warn(format!(
                "field {} from {mixin_name} already exists on {}; keeping the target's",
                field.name, target.name
            ));
            continue;
        }

        let mut merged = field;
        merged.desc = retarget_desc(&merged.desc, mixin_name, &target.name);
        merged
            .annotations
            .retain(|a| !a.desc.starts_with("Lweave/annotation/"));
        if let Some(meta) = ctx.cache.get_mut(&target.name) {
            meta.add_merged_field(MemberMeta::new(
                &target.name,
                &merged.name,
                &merged.desc,
                merged.access,
            ));
        }
        target.fields.push(merged);
        ctx.audit.record_field(mixin_name);
    }
    Ok(())
}

/// A mixin body writing through a final shadow is a hard error naming the
/// offending instruction.
fn check_final_shadow_writes(mixin: &MixinTargetContext, target_name: &str) -> Result<()> {
    if mixin.final_shadows.is_empty() {
        return Ok(());
    }
    for method in &mixin.node.methods {
        for (index, (_, insn)) in method.instructions.iter_insns().enumerate() {
            if let Insn::Field {
                op: Opcode::Putfield | Opcode::Putstatic,
                owner,
                name,
                ..
            } = insn
            {
                if owner != &mixin.meta.name && owner != target_name {
                    continue;
                }
                let resolved = mixin.renames.get(name).unwrap_or(name);
                if mixin.final_shadows.contains(resolved) {
                    return Err(MixinError::FinalShadowWrite {
                        mixin: mixin.meta.name.clone(),
                        member: resolved.clone(),
                        insn_index: index,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Locate the `super(...)`/`this(...)` delegate call of a constructor,
/// skipping inline constructions of the same types passed as arguments.
fn find_delegate_call(
    method: &MethodNode,
    class_name: &str,
    super_name: Option<&str>,
) -> Option<InsnId> {
    let mut pending_news = 0usize;
    for (id, insn) in method.instructions.iter_insns() {
        match insn {
            Insn::Type {
                op: Opcode::New,
                desc,
            } if Some(desc.as_str()) == super_name || desc == class_name => {
                pending_news += 1;
            }
            Insn::Method {
                op: Opcode::Invokespecial,
                owner,
                name,
                ..
            } if name == CTOR_NAME
                && (Some(owner.as_str()) == super_name || owner == class_name) =>
            {
                if pending_news > 0 {
                    pending_news -= 1;
                } else {
                    return Some(id);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the mixin's instance-initializer block: everything between the
/// delegate constructor call and the trailing return, minus frames and
/// line numbers.
fn extract_initializer(mixin: &MixinTargetContext) -> Vec<Insn> {
    let Some(ctor) = mixin.node.methods.iter().find(|m| m.is_ctor()) else {
        return Vec::new();
    };
    let Some(delegate) = find_delegate_call(
        ctor,
        &mixin.meta.name,
        mixin.node.super_name.as_deref(),
    ) else {
        return Vec::new();
    };
    let start = match ctor.instructions.index_of(delegate) {
        Some(index) => index + 1,
        None => return Vec::new(),
    };

    let body: Vec<Insn> = ctor
        .instructions
        .iter_insns()
        .skip(start)
        .map(|(_, insn)| insn.clone())
        .filter(|insn| {
            !matches!(insn, Insn::Frame(_) | Insn::LineNumber { .. })
                && insn.opcode() != Some(Opcode::Return)
        })
        .collect();

    if body.iter().any(Insn::is_real) {
        body
    } else {
        Vec::new()
    }
}

fn splice_initializers(
    target: &mut ClassNode,
    mixin: &MixinTargetContext,
    ctx: &mut ApplicatorContext<'_>,
) -> Result<()> {
    let mut body = extract_initializer(mixin);
    if body.is_empty() {
        return Ok(());
    }
    for insn in &mut body {
        retarget_insn(insn, &mixin.meta.name, &target.name, &mixin.renames);
    }

    let target_name = target.name.clone();
    let super_name = target.super_name.clone();
    let field_names: Vec<String> =
        target.fields.iter().map(|field| field.name.clone()).collect();

    for method in target.methods.iter_mut().filter(|m| m.is_ctor()) {
        let Some(delegate) = find_delegate_call(method, &target_name, super_name.as_deref())
        else {
            ctx.audit.warn(format!(
                "constructor {}{} has no delegate call; skipping initializer splice",
                target_name, method.desc
            ));
            continue;
        };

        let anchor = match ctx.options.initialiser_injection_mode {
            InitialiserInjectionMode::Safe => delegate,
            InitialiserInjectionMode::Default => {
                // Heuristic end of the existing initializer block: the last
                // write to a field the target declares.
                method
                    .instructions
                    .iter_insns()
                    .filter(|(_, insn)| {
                        matches!(
                            insn,
                            Insn::Field { op: Opcode::Putfield, owner, name, .. }
                                if *owner == target_name
                                    && field_names.iter().any(|f| f == name)
                        )
                    })
                    .map(|(id, _)| id)
                    .last()
                    .unwrap_or(delegate)
            }
        };

        let spliced = clone_with_fresh_labels(&body, method);
        method.instructions.insert_all_after(anchor, spliced);
    }
    Ok(())
}

/// What the merge pass decided to do with one mixin method.
pub(super) struct MergedHandler {
    name: String,
    desc: String,
}

pub(super) fn merge_methods(
    target: &mut ClassNode,
    mixin: &mut MixinTargetContext,
    merge: &mut MergeState,
    ctx: &mut ApplicatorContext<'_>,
    style: MergeStyle,
) -> Result<Vec<MergedHandler>> {
    let mixin_name = mixin.meta.name.clone();
    let target_name = target.name.clone();
    let mut handlers = Vec::new();

    // Unique-collision renames are decided before any body is merged so
    // every merged body sees the full rename table.
    let methods = mixin.node.methods.clone();
    for method in &methods {
        if method.is_ctor() || method.is_clinit() {
            continue;
        }
        let decorations = MemberDecorations::parse(&method.annotations, &method.name);
        if !decorations.unique || decorations.shadow {
            continue;
        }
        let desc = retarget_desc(&method.desc, &mixin_name, &target_name);
        if target.method(&method.name, &desc).is_some()
            && method.access.visibility() == Visibility::Private
        {
            let renamed = format!("{}${}", method.name, merge.next_unique_suffix());
            mixin.renames.insert(method.name.clone(), renamed);
        }
    }

    for method in methods {
        if method.is_ctor() || method.is_clinit() {
            continue;
        }
        let decorations = MemberDecorations::parse(&method.annotations, &method.name);

        if decorations.shadow {
            let found = ctx.cache.find_method_in_hierarchy(
                &target_name,
                &method.name,
                &retarget_desc(&method.desc, &mixin_name, &target_name),
                SearchType::AllClasses,
                crate::meta::Traversal::All,
                Default::default(),
                ctx.source,
            );
            if found.is_none() && !mixin.meta.pseudo {
                return Err(MixinError::ShadowUnresolved {
                    mixin: mixin_name.clone(),
                    member: format!("{}{}", method.name, method.desc),
                });
            }
            continue;
        }

        if let Some(field_name) = &decorations.accessor {
            let accessor = synthesize_accessor(target, &mixin_name, &method, field_name)?;
            push_merged(target, merge, ctx, &mixin_name, mixin.meta.priority, false, accessor);
            continue;
        }
        if let Some(method_name) = &decorations.invoker {
            let invoker = synthesize_invoker(target, &mixin_name, &method, method_name)?;
            push_merged(target, merge, ctx, &mixin_name, mixin.meta.priority, false, invoker);
            continue;
        }

        let mut merged = method.clone();
        if let Some(renamed) = mixin.renames.get(&merged.name) {
            merged.name = renamed.clone();
        }
        retarget_method(&mut merged, &mixin_name, &target_name, &mixin.renames);

        let is_handler = merged
            .annotations
            .iter()
            .any(|a| {
                matches!(
                    a.desc.as_str(),
                    annotations::INJECT
                        | annotations::MODIFY_ARG
                        | annotations::MODIFY_ARGS
                        | annotations::REDIRECT
                        | annotations::MODIFY_VARIABLE
                )
            });

        if is_handler {
            if style == MergeStyle::Interface {
                return Err(MixinError::InvalidInjection {
                    mixin: mixin_name.clone(),
                    handler: merged.name.clone(),
                    reason: "injectors are not supported on interface mixins".into(),
                });
            }
            // Handlers go in private so subclasses cannot override them.
            merged.access = merged.access.with_visibility(Visibility::Private);
            if target.method(&merged.name, &merged.desc).is_some() {
                let renamed = format!("{}${}", merged.name, merge.next_unique_suffix());
                mixin.renames.insert(merged.name.clone(), renamed.clone());
                merged.name = renamed;
            }
            handlers.push(MergedHandler {
                name: merged.name.clone(),
                desc: merged.desc.clone(),
            });
            push_merged(target, merge, ctx, &mixin_name, mixin.meta.priority, false, merged);
            continue;
        }

        if decorations.overwrite {
            match target
                .methods
                .iter()
                .position(|m| m.name == merged.name && m.desc == merged.desc)
            {
                Some(index) => {
                    strip_engine_annotations(&mut merged);
                    target.methods[index] = merged;
                    merge.record(
                        format!("{}{}", method.name, method.desc),
                        MergedBy {
                            mixin: mixin_name.clone(),
                            priority: mixin.meta.priority,
                            is_final: decorations.is_final,
                        },
                    );
                    ctx.audit.record_method(&mixin_name);
                }
                None => {
                    return Err(MixinError::InvalidInjection {
                        mixin: mixin_name.clone(),
                        handler: merged.name.clone(),
                        reason: "no method to overwrite in the target".into(),
                    });
                }
            }
            continue;
        }

        if let Some(displace) = decorations.intrinsic {
            if let Some(index) = target
                .methods
                .iter()
                .position(|m| m.name == merged.name && m.desc == merged.desc)
            {
                if !displace {
                    debug!(
                        method = merged.name,
                        "intrinsic target already present, skipping merge"
                    );
                    continue;
                }
                // Displace: rename the original out of the way and route the
                // intrinsic's self-calls to it.
                let displaced = format!("{}$original", merged.name);
                target.methods[index].name = displaced.clone();
                let self_renames: std::collections::HashMap<String, String> =
                    [(merged.name.clone(), displaced)].into();
                let ids: Vec<_> = merged.instructions.iter().collect();
                for id in ids {
                    retarget_insn(
                        merged.instructions.get_mut(id),
                        &mixin_name,
                        &target_name,
                        &self_renames,
                    );
                }
            }
            push_merged(
                target,
                merge,
                ctx,
                &mixin_name,
                mixin.meta.priority,
                decorations.is_final,
                merged,
            );
            continue;
        }

        match target
            .methods
            .iter()
            .position(|m| m.name == merged.name && m.desc == merged.desc)
        {
            None => {
                push_merged(
                    target,
                    merge,
                    ctx,
                    &mixin_name,
                    mixin.meta.priority,
                    decorations.is_final,
                    merged,
                );
            }
            Some(index) => {
                let key = format!("{}{}", merged.name, merged.desc);
                if decorations.unique {
                    // Public unique collisions never replace.
                    let message = format!(
                        "unique method {} from {mixin_name} collides on {target_name}",
                        merged.name
                    );
                    if ctx.options.strict_unique() {
                        return Err(MixinError::MergeConflict {
                            target: target_name.clone(),
                            member: key,
                            mixin: mixin_name.clone(),
                        });
                    }
                    ctx.audit.warn(message);
                    continue;
                }

                match merge.merged_by(&key).cloned() {
                    Some(previous) if previous.is_final => {
                        let conflict = MixinError::MergeConflict {
                            target: target_name.clone(),
                            member: key.clone(),
                            mixin: mixin_name.clone(),
                        };
                        if ctx.options.debug_strict {
                            return Err(conflict);
                        }
                        ctx.audit.warn(conflict.to_string());
                        continue;
                    }
                    Some(previous) if previous.priority > mixin.meta.priority => {
                        debug!(
                            method = key,
                            "earlier mixin has higher priority, keeping it"
                        );
                        continue;
                    }
                    Some(previous) => {
                        if previous.priority == mixin.meta.priority {
                            let conflict = MixinError::MergeConflict {
                                target: target_name.clone(),
                                member: key.clone(),
                                mixin: mixin_name.clone(),
                            };
                            if ctx.options.debug_strict {
                                return Err(conflict);
                            }
                            ctx.audit.warn(conflict.to_string());
                        }
                        replace_merged(
                            target,
                            merge,
                            ctx,
                            &mixin_name,
                            mixin.meta.priority,
                            decorations.is_final,
                            index,
                            merged,
                        );
                    }
                    None => {
                        // Plain merge over an original target method.
                        replace_merged(
                            target,
                            merge,
                            ctx,
                            &mixin_name,
                            mixin.meta.priority,
                            decorations.is_final,
                            index,
                            merged,
                        );
                    }
                }
            }
        }
    }

    Ok(handlers)
}

fn strip_engine_annotations(method: &mut MethodNode) {
    method
        .annotations
        .retain(|a| !a.desc.starts_with("Lweave/annotation/"));
}

fn push_merged(
    target: &mut ClassNode,
    merge: &mut MergeState,
    ctx: &mut ApplicatorContext<'_>,
    mixin_name: &str,
    priority: i32,
    is_final: bool,
    mut merged: MethodNode,
) {
    let key = format!("{}{}", merged.name, merged.desc);
    // Handler methods keep their injector annotations until the injection
    // pass has parsed them; everything else is cleaned on the way in.
    let is_handler = merged.annotations.iter().any(|a| {
        matches!(
            a.desc.as_str(),
            annotations::INJECT
                | annotations::MODIFY_ARG
                | annotations::MODIFY_ARGS
                | annotations::REDIRECT
                | annotations::MODIFY_VARIABLE
        )
    });
    if !is_handler {
        strip_engine_annotations(&mut merged);
    }
    if let Some(meta) = ctx.cache.get_mut(&target.name) {
        meta.add_merged_method(MemberMeta::new(
            &target.name,
            &merged.name,
            &merged.desc,
            merged.access,
        ));
    }
    merge.record(
        key,
        MergedBy {
            mixin: mixin_name.into(),
            priority,
            is_final,
        },
    );
    target.methods.push(merged);
    ctx.audit.record_method(mixin_name);
}

#[allow(clippy::too_many_arguments)]
fn replace_merged(
    target: &mut ClassNode,
    merge: &mut MergeState,
    ctx: &mut ApplicatorContext<'_>,
    mixin_name: &str,
    priority: i32,
    is_final: bool,
    index: usize,
    mut merged: MethodNode,
) {
    strip_engine_annotations(&mut merged);
    merge.record(
        format!("{}{}", merged.name, merged.desc),
        MergedBy {
            mixin: mixin_name.into(),
            priority,
            is_final,
        },
    );
    target.methods[index] = merged;
    ctx.audit.record_method(mixin_name);
}

/// Build the target-side bridge for an accessor declaration.
fn synthesize_accessor(
    target: &ClassNode,
    mixin_name: &str,
    declaration: &MethodNode,
    field_name: &str,
) -> Result<MethodNode> {
    let invalid = |reason: String| MixinError::InvalidInjection {
        mixin: mixin_name.into(),
        handler: declaration.name.clone(),
        reason,
    };
    let field = target
        .field(field_name)
        .ok_or_else(|| invalid(format!("accessor target field {field_name} not found")))?;
    let field_static = field.access.is_static();
    let field_type = JavaType::parse(&field.desc)?;
    let desc = MethodDescriptor::parse(&declaration.desc)?;

    let mut access = Access::PUBLIC | Access::SYNTHETIC;
    if declaration.is_static() {
        access |= Access::STATIC;
    }
    let mut bridge = MethodNode::new(access, declaration.name.clone(), declaration.desc.clone());

    let is_getter = desc.args.is_empty() && desc.ret != JavaType::Void;
    let is_setter = desc.args.len() == 1 && desc.ret == JavaType::Void;
    if is_getter {
        if field_static {
            bridge.instructions.push(Insn::field(
                Opcode::Getstatic,
                target.name.clone(),
                field_name,
                field.desc.clone(),
            ));
        } else {
            bridge.instructions.push(Insn::var(Opcode::Aload, 0));
            bridge.instructions.push(Insn::field(
                Opcode::Getfield,
                target.name.clone(),
                field_name,
                field.desc.clone(),
            ));
        }
        bridge
            .instructions
            .push(Insn::op(Opcode::return_for(&field_type)));
        bridge.max_stack = field_type.size().max(1);
        bridge.max_locals = usize::from(!declaration.is_static());
    } else if is_setter {
        let arg_slot = usize::from(!declaration.is_static());
        if !field_static {
            bridge.instructions.push(Insn::var(Opcode::Aload, 0));
        }
        bridge
            .instructions
            .push(Insn::var(Opcode::load_for(&field_type), arg_slot));
        bridge.instructions.push(Insn::field(
            if field_static {
                Opcode::Putstatic
            } else {
                Opcode::Putfield
            },
            target.name.clone(),
            field_name,
            field.desc.clone(),
        ));
        bridge.instructions.push(Insn::op(Opcode::Return));
        bridge.max_stack = field_type.size() + usize::from(!field_static);
        bridge.max_locals = arg_slot + field_type.size();
    } else {
        return Err(invalid(
            "accessor must be a no-arg getter or a single-arg void setter".into(),
        ));
    }
    Ok(bridge)
}

/// Build the target-side bridge for an invoker declaration.
fn synthesize_invoker(
    target: &ClassNode,
    mixin_name: &str,
    declaration: &MethodNode,
    method_name: &str,
) -> Result<MethodNode> {
    let invalid = |reason: String| MixinError::InvalidInjection {
        mixin: mixin_name.into(),
        handler: declaration.name.clone(),
        reason,
    };
    let desc = MethodDescriptor::parse(&declaration.desc)?;
    let callee = target
        .methods
        .iter()
        .find(|m| m.name == method_name && m.desc == declaration.desc)
        .ok_or_else(|| invalid(format!("invoker target method {method_name} not found")))?;
    let callee_static = callee.is_static();

    let mut access = Access::PUBLIC | Access::SYNTHETIC;
    if declaration.is_static() {
        access |= Access::STATIC;
    }
    let mut bridge = MethodNode::new(access, declaration.name.clone(), declaration.desc.clone());

    let mut slot = usize::from(!declaration.is_static());
    if !callee_static {
        bridge.instructions.push(Insn::var(Opcode::Aload, 0));
    }
    for arg in &desc.args {
        bridge
            .instructions
            .push(Insn::var(Opcode::load_for(arg), slot));
        slot += arg.size();
    }
    bridge.instructions.push(Insn::invoke(
        if callee_static {
            Opcode::Invokestatic
        } else {
            Opcode::Invokevirtual
        },
        target.name.clone(),
        method_name,
        declaration.desc.clone(),
    ));
    bridge
        .instructions
        .push(Insn::op(Opcode::return_for(&desc.ret)));
    bridge.max_stack = desc.arg_slots() + 1 + desc.ret.size();
    bridge.max_locals = slot;
    Ok(bridge)
}

fn apply_injections(
    target: &mut ClassNode,
    mixin: &MixinTargetContext,
    handlers: &[MergedHandler],
    ctx: &mut ApplicatorContext<'_>,
) -> Result<()> {
    let resolver = ReferenceResolver {
        refmap: ctx.refmap,
        class: &mixin.meta.name,
        environment: ctx.options.obf_environment.as_deref(),
        disabled: ctx.options.disable_refmap,
    };

    // Parse injector metadata off the merged handler methods so the final
    // (possibly renamed) handler names flow into the call sites.
    let mut infos: Vec<InjectionInfo> = Vec::new();
    for handler in handlers {
        let Some(method) = target.method(&handler.name, &handler.desc) else {
            continue;
        };
        if let Some(info) =
            annotations::parse_injector(&mixin.meta.name, method, &resolver)?
        {
            infos.push(info);
        }
    }
    for handler in handlers {
        if let Some(method) = target.method_mut(&handler.name, &handler.desc) {
            strip_engine_annotations(method);
        }
    }

    for info in infos {
        let mut matched_total = 0usize;
        let mut generated: Vec<MethodNode> = Vec::new();
        let mut target_indices: Vec<usize> = Vec::new();

        for selector in &info.targets {
            let mut matched_here = 0usize;
            for (index, method) in target.methods.iter().enumerate() {
                if method.name == info.handler_name {
                    continue;
                }
                if selector
                    .matches(
                        Some(&target.name),
                        Some(&method.name),
                        Some(&method.desc),
                    )
                    .is_match()
                    && !target_indices.contains(&index)
                {
                    target_indices.push(index);
                    matched_here += 1;
                }
            }
            if !selector
                .quantifier()
                .accepts(matched_here, SelectContext::Member)
            {
                let message = format!(
                    "selector {selector} matched {matched_here} method(s) on {}",
                    target.name
                );
                if ctx.options.strict_targets() {
                    return Err(MixinError::InvalidInjection {
                        mixin: info.mixin.clone(),
                        handler: info.handler_name.clone(),
                        reason: message,
                    });
                }
                ctx.audit.warn(message);
            }
        }

        for index in target_indices {
            let placeholder = MethodNode::new(Access::empty(), "<placeholder>", "()V");
            let method = core::mem::replace(&mut target.methods[index], placeholder);
            let mut method_target = Target::new(target.name.clone(), method)?;

            let mut injector_ctx = InjectorContext {
                cache: ctx.cache,
                source: ctx.source,
                options: ctx.options,
                lvt: ctx.lvt,
                args: ctx.args,
            };
            let outcome = inject(&info, &mut method_target, &mut injector_ctx)?;
            matched_total += outcome.matched;
            generated.extend(outcome.generated);

            method_target.check_bounds()?;
            target.methods[index] = method_target.into_method();
        }

        target.methods.extend(generated);
        ctx.audit
            .record_injector(&info.mixin, &info.handler_name, matched_total, info.expect);
    }
    Ok(())
}
