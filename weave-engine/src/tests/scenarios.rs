//! End-to-end transformation scenarios driven through the engine.

use weave_tree::{AnnotationNode, AnnotationValue, ClassNode, FieldNode, Insn, MethodNode, Opcode};
use weave_types::Access;

use crate::annotations;
use crate::error::MixinError;
use crate::target::{CALLBACK_INFO, CALLBACK_INFO_RETURNABLE};
use crate::tests::test_helpers::*;

/// Callback at HEAD on a value-returning target, cancellable.
#[test]
fn callback_at_head_installs_cancellable_hook() {
    let mut env = Env::new();
    env.add_class(compute_target());

    let mut mixin = mixin_class("a/MixinTarget", "a/Target");
    let mut hook = MethodNode::new(
        Access::PRIVATE,
        "hook",
        &format!("(IL{CALLBACK_INFO_RETURNABLE};)V"),
    );
    annotate_handler(&mut hook, annotations::INJECT, "compute(I)I", at("HEAD"));
    hook.annotations[0] = hook.annotations[0]
        .clone()
        .with("cancellable", AnnotationValue::Bool(true));
    mixin.methods.push(hook);
    env.add_class(mixin);
    env.add_config(&["MixinTarget"]);

    let transformed = env.transform("a.Target").expect("transforms");

    // The handler was merged privately.
    let merged = transformed
        .method("hook", &format!("(IL{CALLBACK_INFO_RETURNABLE};)V"))
        .expect("handler merged");
    assert_eq!(
        merged.access.visibility(),
        weave_types::Visibility::Private
    );

    let insns = instructions_of(&transformed, "compute", "(I)I");
    // Callback info allocated ahead of the original first instruction.
    assert!(matches!(
        &insns[0],
        Insn::Type { op: Opcode::New, desc } if desc == CALLBACK_INFO_RETURNABLE
    ));
    assert!(insns.iter().any(|insn| matches!(
        insn,
        Insn::Method { owner, name, .. } if owner == "a/Target" && name == "hook"
    )));
    // Cancellation path: isCancelled branch returning the callback value.
    assert!(insns.iter().any(|insn| matches!(
        insn,
        Insn::Method { name, .. } if name == "isCancelled"
    )));
    assert!(insns.iter().any(|insn| matches!(
        insn,
        Insn::Method { name, desc, .. } if name == "getReturnValueI" && desc == "()I"
    )));
    // The original body still runs on the uncancelled path.
    let tail: Vec<_> = insns[insns.len() - 4..].to_vec();
    assert!(matches!(tail[0], Insn::Var { op: Opcode::Iload, var: 1 }));
    assert!(matches!(tail[3], Insn::Op(Opcode::Ireturn)));
}

/// Redirecting an invocation to a handler with the receiver prepended.
#[test]
fn redirect_replaces_println_call() {
    let mut env = Env::new();
    let mut target = ClassNode::new("a/Target");
    let mut f = MethodNode::new(Access::PUBLIC, "f", "()V");
    f.instructions.extend(vec![
        Insn::field(
            Opcode::Getstatic,
            "java/lang/System",
            "out",
            "Ljava/io/PrintStream;",
        ),
        Insn::Ldc(weave_tree::Constant::String("a".into())),
        Insn::invoke(
            Opcode::Invokevirtual,
            "java/io/PrintStream",
            "println",
            "(Ljava/lang/String;)V",
        ),
        Insn::op(Opcode::Return),
    ]);
    f.max_stack = 2;
    f.max_locals = 1;
    target.methods.push(f);
    env.add_class(target);

    let mut mixin = mixin_class("a/MixinTarget", "a/Target");
    let mut pr = MethodNode::new(
        Access::PRIVATE,
        "pr",
        "(Ljava/io/PrintStream;Ljava/lang/String;)V",
    );
    annotate_handler(
        &mut pr,
        annotations::REDIRECT,
        "f()V",
        at_invoke("Ljava/io/PrintStream;println(Ljava/lang/String;)V"),
    );
    mixin.methods.push(pr);
    env.add_class(mixin);
    env.add_config(&["MixinTarget"]);

    let transformed = env.transform("a.Target").expect("transforms");
    let insns = instructions_of(&transformed, "f", "()V");

    assert!(
        !insns.iter().any(|insn| matches!(
            insn,
            Insn::Method { owner, .. } if owner == "java/io/PrintStream"
        )),
        "original call site removed"
    );
    assert!(insns.iter().any(|insn| matches!(
        insn,
        Insn::Method { op: Opcode::Invokespecial, owner, name, .. }
            if owner == "a/Target" && name == "pr"
    )));
    // The receiver expression still executes.
    assert!(matches!(insns[0], Insn::Field { op: Opcode::Getstatic, .. }));
}

/// Modify-arg routes the argument through the handler before the call.
#[test]
fn modify_arg_increments_the_valueof_argument() {
    let mut env = Env::new();
    let mut target = ClassNode::new("a/Target");
    let mut g = MethodNode::new(Access::PUBLIC, "g", "(I)Ljava/lang/String;");
    g.instructions.extend(vec![
        Insn::var(Opcode::Iload, 1),
        Insn::invoke(
            Opcode::Invokestatic,
            "java/lang/String",
            "valueOf",
            "(I)Ljava/lang/String;",
        ),
        Insn::op(Opcode::Areturn),
    ]);
    g.max_stack = 1;
    g.max_locals = 2;
    target.methods.push(g);
    env.add_class(target);

    let mut mixin = mixin_class("a/MixinTarget", "a/Target");
    let mut inc = MethodNode::new(Access::PRIVATE, "inc", "(I)I");
    annotate_handler(
        &mut inc,
        annotations::MODIFY_ARG,
        "g(I)Ljava/lang/String;",
        at_invoke("Ljava/lang/String;valueOf(I)Ljava/lang/String;"),
    );
    mixin.methods.push(inc);
    env.add_class(mixin);
    env.add_config(&["MixinTarget"]);

    let transformed = env.transform("a.Target").expect("transforms");
    let insns = instructions_of(&transformed, "g", "(I)Ljava/lang/String;");

    let handler_pos = insns
        .iter()
        .position(|insn| matches!(insn, Insn::Method { name, .. } if name == "inc"))
        .expect("handler call inserted");
    let call_pos = insns
        .iter()
        .position(|insn| matches!(insn, Insn::Method { name, .. } if name == "valueOf"))
        .expect("original call survives");
    assert!(handler_pos < call_pos);
}

/// Modify-args bundles arguments once per unique descriptor.
#[test]
fn modify_args_generates_and_reuses_one_bundle_class() {
    let mut env = Env::new();
    let mut target = ClassNode::new("a/Target");
    let mut caller = MethodNode::new(Access::PUBLIC | Access::STATIC, "caller", "()V");
    caller.instructions.extend(vec![
        Insn::push_int(1),
        Insn::Ldc(weave_tree::Constant::Double(2.5)),
        Insn::Ldc(weave_tree::Constant::String("x".into())),
        Insn::invoke(
            Opcode::Invokestatic,
            "a/Target",
            "h",
            "(IDLjava/lang/String;)V",
        ),
        Insn::op(Opcode::Return),
    ]);
    caller.max_stack = 4;
    target.methods.push(caller);
    target
        .methods
        .push(MethodNode::new(Access::PUBLIC | Access::STATIC, "h", "(IDLjava/lang/String;)V"));
    env.add_class(target);

    for mixin_name in ["MixinOne", "MixinTwo"] {
        let mut mixin = mixin_class(&format!("a/{mixin_name}"), "a/Target");
        let mut handler = MethodNode::new(
            Access::PRIVATE | Access::STATIC,
            "mutate",
            "(Lweave/args/Args;)V",
        );
        annotate_handler(
            &mut handler,
            annotations::MODIFY_ARGS,
            "caller()V",
            at_invoke("La/Target;h(IDLjava/lang/String;)V"),
        );
        mixin.methods.push(handler);
        env.add_class(mixin);
    }
    env.add_config(&["MixinOne", "MixinTwo"]);

    let transformed = env.transform("a.Target").expect("transforms");
    let insns = instructions_of(&transformed, "caller", "()V");

    let factory_calls: Vec<String> = insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Method { owner, name, .. } if name == "of" => Some(owner.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(factory_calls.len(), 2, "both mixins wrap the call");
    assert_eq!(
        factory_calls[0], factory_calls[1],
        "identical descriptors share one bundle class"
    );
    assert_eq!(factory_calls[0], "weave/synthetic/args/Args$1");

    // The transformer serves the synthetic class on demand.
    let bundle = env
        .transform("weave.synthetic.args.Args$1")
        .expect("synthetic served");
    assert!(bundle.method("$0", "()I").is_some());
    assert!(bundle.method("$1", "()D").is_some());
    assert!(bundle.method("$2", "()Ljava/lang/String;").is_some());
    assert!(bundle.method("set", "(ILjava/lang/Object;)V").is_some());
    assert!(bundle.method("setAll", "([Ljava/lang/Object;)V").is_some());
}

/// TAIL on a void target with two returns hits only the last one.
#[test]
fn tail_injects_before_the_last_return_only() {
    let mut env = Env::new();
    let mut target = ClassNode::new("a/Target");
    target
        .fields
        .push(FieldNode::new(Access::PRIVATE, "cond", "Z"));
    let mut v = MethodNode::new(Access::PUBLIC, "v", "()V");
    let label = v.new_label();
    v.instructions.extend(vec![
        Insn::var(Opcode::Aload, 0),
        Insn::field(Opcode::Getfield, "a/Target", "cond", "Z"),
        Insn::Jump {
            op: Opcode::Ifeq,
            label,
        },
        Insn::op(Opcode::Return),
        Insn::Label(label),
        Insn::var(Opcode::Aload, 0),
        Insn::invoke(Opcode::Invokevirtual, "a/Target", "work", "()V"),
        Insn::op(Opcode::Return),
    ]);
    v.max_stack = 1;
    v.max_locals = 1;
    target.methods.push(v);
    target
        .methods
        .push(MethodNode::new(Access::PUBLIC, "work", "()V"));
    env.add_class(target);

    let mut mixin = mixin_class("a/MixinTarget", "a/Target");
    let mut tail = MethodNode::new(
        Access::PRIVATE,
        "tail",
        &format!("(L{CALLBACK_INFO};)V"),
    );
    annotate_handler(&mut tail, annotations::INJECT, "v()V", at("TAIL"));
    mixin.methods.push(tail);
    env.add_class(mixin);
    env.add_config(&["MixinTarget"]);

    let transformed = env.transform("a.Target").expect("transforms");
    let insns = instructions_of(&transformed, "v", "()V");

    let hook_positions: Vec<usize> = insns
        .iter()
        .enumerate()
        .filter_map(|(index, insn)| match insn {
            Insn::Method { name, .. } if name == "tail" => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(hook_positions.len(), 1, "only the textually last return");

    let work_pos = insns
        .iter()
        .position(|insn| matches!(insn, Insn::Method { name, .. } if name == "work"))
        .expect("work call");
    assert!(hook_positions[0] > work_pos, "hook sits on the second path");
    assert!(matches!(insns.last().unwrap(), Insn::Op(Opcode::Return)));
}

/// Writing through a shadow decorated final fails with a diagnostic
/// naming the mixin, the field, and the instruction.
#[test]
fn final_shadow_write_fails_with_diagnostic() {
    let mut env = Env::new();
    let mut target = ClassNode::new("a/Target");
    target
        .fields
        .push(FieldNode::new(Access::PRIVATE, "count", "I"));
    env.add_class(target);

    let mut mixin = mixin_class("a/MixinTarget", "a/Target");
    let mut shadow = FieldNode::new(Access::PRIVATE, "shadow$count", "I");
    shadow
        .annotations
        .push(AnnotationNode::new(annotations::SHADOW));
    shadow
        .annotations
        .push(AnnotationNode::new(annotations::FINAL));
    mixin.fields.push(shadow);

    let mut writer = MethodNode::new(Access::PUBLIC, "clobber", "()V");
    writer.instructions.extend(vec![
        Insn::var(Opcode::Aload, 0),
        Insn::push_int(0),
        Insn::field(Opcode::Putfield, "a/MixinTarget", "shadow$count", "I"),
        Insn::op(Opcode::Return),
    ]);
    mixin.methods.push(writer);
    env.add_class(mixin);
    env.add_config(&["MixinTarget"]);

    let error = env.transform("a.Target").unwrap_err();
    match error {
        MixinError::FinalShadowWrite {
            mixin,
            member,
            insn_index,
        } => {
            assert_eq!(mixin, "a/MixinTarget");
            assert_eq!(member, "count");
            assert_eq!(insn_index, 2);
        }
        other => panic!("unexpected error {other}"),
    }
}

/// Untargeted classes pass through byte-identical.
#[test]
fn untargeted_classes_pass_through() {
    let mut env = Env::new();
    env.add_class(ClassNode::new("a/Bystander"));
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

    let bytes = b"a/Bystander".to_vec();
    let out = env
        .engine
        .transform("a.Bystander", &bytes, &env.codec, &env.source)
        .expect("passes through");
    assert_eq!(out, bytes);
}

/// Shadow members resolve against the target hierarchy before merge;
/// missing shadows fail non-pseudo mixins.
#[test]
fn unresolved_shadow_fails_non_pseudo_mixins() {
    let mut env = Env::new();
    env.add_class(compute_target());

    let mut mixin = mixin_class("a/MixinTarget", "a/Target");
    let mut shadow = FieldNode::new(Access::PRIVATE, "missing", "I");
    shadow
        .annotations
        .push(AnnotationNode::new(annotations::SHADOW));
    mixin.fields.push(shadow);
    env.add_class(mixin);
    env.add_config(&["MixinTarget"]);

    let error = env.transform("a.Target").unwrap_err();
    assert!(matches!(error, MixinError::ShadowUnresolved { .. }));
}

/// The audit report reflects applied mixins and injector match counts.
#[test]
fn audit_reports_application_counts() {
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

    env.transform("a.Target").expect("transforms");
    let report = env.engine.audit();
    assert!(report.contains("a/MixinTarget"));
    assert!(report.contains("hook matched 1"));
}
