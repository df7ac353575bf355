//! Cross-cutting engine properties.

use std::collections::HashMap;

use strum::IntoEnumIterator;
use weave_tree::{ClassNode, Insn, MethodNode, NullSource, Opcode};
use weave_types::Access;

use crate::annotations;
use crate::locals::{locals_at, GeneratedLvtCache, LocalsSettings};
use crate::meta::MetaCache;
use crate::point::{AtCode, AtPoint, InjectionPoint};
use crate::selector::MemberSelector;
use crate::target::{Target, CALLBACK_INFO_RETURNABLE};
use crate::tests::test_helpers::*;

/// Repeated lookups answer one stable record per class name.
#[test]
fn metadata_lookups_are_idempotent() {
    let mut cache = MetaCache::new();
    let node = ClassNode::new("a/Stable");
    cache.from_class_node(&node);

    let first = cache.for_name("a/Stable", &NullSource).cloned().expect("cached");
    // A second construction attempt is equivalent, not a replacement.
    cache.from_class_node(&ClassNode::new("a/Stable"));
    let second = cache.for_name("a/Stable", &NullSource).cloned().expect("cached");
    assert_eq!(first, second);
}

/// Resolvers never fabricate nodes: every result is in the method body.
#[test]
fn resolvers_answer_subsets_of_the_instruction_list() {
    let mut method = MethodNode::new(Access::PUBLIC | Access::STATIC, "mixed", "(I)V");
    let label = method.new_label();
    method.instructions.extend(vec![
        Insn::var(Opcode::Iload, 0),
        Insn::Jump {
            op: Opcode::Ifeq,
            label,
        },
        Insn::Type {
            op: Opcode::New,
            desc: "a/Thing".into(),
        },
        Insn::op(Opcode::Dup),
        Insn::invoke(Opcode::Invokespecial, "a/Thing", "<init>", "()V"),
        Insn::op(Opcode::Pop),
        Insn::Label(label),
        Insn::field(Opcode::Getstatic, "a/Owner", "flag", "Z"),
        Insn::op(Opcode::Pop),
        Insn::Ldc(weave_tree::Constant::String("marker".into())),
        Insn::invoke(
            Opcode::Invokestatic,
            "a/Owner",
            "log",
            "(Ljava/lang/String;)V",
        ),
        Insn::op(Opcode::Return),
    ]);
    let target = Target::new("a/Owner", method).expect("valid");
    let body: Vec<_> = target.method.instructions.iter().collect();

    for code in AtCode::iter() {
        let mut point = AtPoint::of(code);
        point.selector = Some(MemberSelector::parse("*"));
        let found = match InjectionPoint::At(point).find(&target, &HashMap::new()) {
            Ok(found) => found,
            Err(_) => continue,
        };
        for id in found {
            assert!(
                body.contains(&id),
                "{code} fabricated an instruction node"
            );
        }
    }
}

/// Local reconstruction is conservative: every non-null slot was seeded
/// by the signature or written by a preceding store.
#[test]
fn reconstruction_only_reports_seeded_or_stored_slots() {
    let mut method = MethodNode::new(Access::PUBLIC | Access::STATIC, "work", "(J)V");
    method.max_locals = 8;
    let ids = method.instructions.extend(vec![
        Insn::push_int(1),
        Insn::var(Opcode::Istore, 3),
        Insn::Ldc(weave_tree::Constant::String("x".into())),
        Insn::var(Opcode::Astore, 5),
        Insn::op(Opcode::Nop),
        Insn::op(Opcode::Return),
    ]);

    let mut cache = MetaCache::new();
    let mut lvt = GeneratedLvtCache::default();
    let frame = locals_at(
        "a/Owner",
        &method,
        *ids.last().unwrap(),
        &LocalsSettings::default(),
        &mut cache,
        &NullSource,
        &mut lvt,
    )
    .expect("reconstructs");

    let allowed = [0usize, 3, 5];
    for (slot, entry) in frame.iter().enumerate() {
        if entry.is_some() {
            assert!(
                allowed.contains(&slot),
                "slot {slot} reported live without a source"
            );
        }
    }
    // And the seeded/stored slots are all present.
    assert!(frame[0].is_some());
    assert!(frame[3].is_some());
    assert!(frame[5].is_some());
}

/// Frame bounds only ever grow under transformation.
#[test]
fn frame_bounds_grow_monotonically() {
    let mut env = Env::new();
    let target = compute_target();
    let before = target.method("compute", "(I)I").unwrap().clone();
    env.add_class(target);

    let mut mixin = mixin_class("a/MixinTarget", "a/Target");
    let mut hook = MethodNode::new(
        Access::PRIVATE,
        "hook",
        &format!("(IL{CALLBACK_INFO_RETURNABLE};)V"),
    );
    annotate_handler(&mut hook, annotations::INJECT, "compute(I)I", at("HEAD"));
    mixin.methods.push(hook);
    env.add_class(mixin);
    env.add_config(&["MixinTarget"]);

    let transformed = env.transform("a.Target").expect("transforms");
    let after = transformed.method("compute", "(I)I").unwrap();
    assert!(after.max_stack >= before.max_stack);
    assert!(after.max_locals >= before.max_locals);
}

/// The transformed output is a deterministic function of the mixin set.
#[test]
fn transformation_is_deterministic() {
    let build = || {
        let mut env = Env::new();
        env.add_class(compute_target());
        let mut mixin = mixin_class("a/MixinTarget", "a/Target");
        let mut hook = MethodNode::new(
            Access::PRIVATE,
            "hook",
            &format!("(IL{CALLBACK_INFO_RETURNABLE};)V"),
        );
        annotate_handler(&mut hook, annotations::INJECT, "compute(I)I", at("HEAD"));
        mixin.methods.push(hook);
        env.add_class(mixin);
        env.add_config(&["MixinTarget"]);
        env.transform("a.Target").expect("transforms")
    };

    let first = build();
    let second = build();
    assert_eq!(first, second);
}
