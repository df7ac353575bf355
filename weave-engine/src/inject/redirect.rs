//! The redirect injector: replaces an invocation or field access with a
//! call to the handler.

use weave_tree::{Insn, InsnId, Opcode};
use weave_types::{JavaType, MethodDescriptor};

use crate::error::Result;
use crate::inject::{handler_invoke, load_args, store_args, Applied, InjectionInfo};
use crate::target::Target;

pub(crate) fn apply(
    info: &InjectionInfo,
    target: &mut Target,
    node: InsnId,
) -> Result<Applied> {
    match target.method.instructions.get(node).clone() {
        Insn::Method {
            op,
            owner,
            name: _,
            desc,
            ..
        } => redirect_invoke(info, target, node, op, &owner, &desc),
        Insn::Field {
            op,
            owner,
            name: _,
            desc,
        } => redirect_field(info, target, node, op, &owner, &desc),
        _ => Err(info.invalid("redirect target must be an invocation or a field access")),
    }
}

fn redirect_invoke(
    info: &InjectionInfo,
    target: &mut Target,
    node: InsnId,
    op: Opcode,
    owner: &str,
    desc: &str,
) -> Result<Applied> {
    let invocation = MethodDescriptor::parse(desc)?;
    let has_receiver = op != Opcode::Invokestatic;

    // Expected handler shape: (receiver?, original args...) -> ret.
    let mut expected = MethodDescriptor {
        args: invocation.args.clone(),
        ret: invocation.ret.clone(),
    };
    if has_receiver {
        expected.args.insert(0, JavaType::of(owner));
    }
    if info.handler_desc != expected.descriptor() {
        return Err(info.invalid(format!(
            "redirect handler must have signature {}",
            expected.descriptor()
        )));
    }

    // Stack holds (receiver?, args...). Spill everything, optionally push
    // `this` underneath, then rebuild for the handler call.
    let (stores, slots) = store_args(target, &expected.args);
    let mut seq = stores;
    if !info.handler_static {
        seq.push(Insn::var(Opcode::Aload, 0));
    }
    seq.extend(load_args(&expected.args, &slots, 0..expected.args.len()));
    let champion = seq.len();
    seq.push(handler_invoke(info, target));

    target.replace_with(node, seq, champion);
    target.add_to_stack(expected.arg_slots() + 1);
    Ok(Applied::Yes)
}

fn redirect_field(
    info: &InjectionInfo,
    target: &mut Target,
    node: InsnId,
    op: Opcode,
    owner: &str,
    desc: &str,
) -> Result<Applied> {
    let field_type = JavaType::parse(desc)?;
    let is_get = op.is_field_get();
    let has_receiver = matches!(op, Opcode::Getfield | Opcode::Putfield);

    let mut expected = MethodDescriptor {
        args: Vec::new(),
        ret: if is_get {
            field_type.clone()
        } else {
            JavaType::Void
        },
    };
    if has_receiver {
        expected.args.push(JavaType::of(owner));
    }
    if !is_get {
        expected.args.push(field_type);
    }
    if info.handler_desc != expected.descriptor() {
        return Err(info.invalid(format!(
            "redirect handler must have signature {}",
            expected.descriptor()
        )));
    }

    let (stores, slots) = store_args(target, &expected.args);
    let mut seq = stores;
    if !info.handler_static {
        seq.push(Insn::var(Opcode::Aload, 0));
    }
    seq.extend(load_args(&expected.args, &slots, 0..expected.args.len()));
    let champion = seq.len();
    seq.push(handler_invoke(info, target));

    target.replace_with(node, seq, champion);
    target.add_to_stack(expected.arg_slots() + 1);
    Ok(Applied::Yes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::{inject, ArgsClassGenerator, InjectionInfo, InjectorContext, InjectorKind};
    use crate::locals::GeneratedLvtCache;
    use crate::meta::MetaCache;
    use crate::options::EngineOptions;
    use crate::point::{AtCode, AtPoint, InjectionPoint};
    use crate::selector::MemberSelector;
    use weave_tree::{MethodNode, NullSource};
    use weave_types::Access;

    fn run(info: &InjectionInfo, target: &mut Target) -> Result<()> {
        let mut cache = MetaCache::new();
        let mut lvt = GeneratedLvtCache::default();
        let mut args = ArgsClassGenerator::default();
        let options = EngineOptions::default();
        let mut ctx = InjectorContext {
            cache: &mut cache,
            source: &NullSource,
            options: &options,
            lvt: &mut lvt,
            args: &mut args,
        };
        inject(info, target, &mut ctx).map(|_| ())
    }

    fn println_target() -> Target {
        // void f() { System.out.println("a"); }
        let mut method = MethodNode::new(Access::PUBLIC | Access::STATIC, "f", "()V");
        method.instructions.extend(vec![
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
        method.max_stack = 2;
        method.max_locals = 0;
        Target::new("a/Owner", method).expect("valid")
    }

    fn redirect_info(handler_desc: &str, selector: &str, code: AtCode) -> InjectionInfo {
        let mut info = InjectionInfo::callback("a/MixinOwner", "pr", handler_desc);
        info.kind = InjectorKind::Redirect;
        info.handler_static = true;
        info.points.push(InjectionPoint::At(
            AtPoint::of(code).with_selector(MemberSelector::parse(selector)),
        ));
        info
    }

    #[test]
    fn invoke_redirect_replaces_the_call_site() {
        let mut target = println_target();
        let info = redirect_info(
            "(Ljava/io/PrintStream;Ljava/lang/String;)V",
            "Ljava/io/PrintStream;println*",
            AtCode::Invoke,
        );
        run(&info, &mut target).expect("redirects");

        let insns: Vec<_> = target
            .method
            .instructions
            .iter_insns()
            .map(|(_, insn)| insn.clone())
            .collect();
        assert!(
            !insns.iter().any(|insn| matches!(
                insn,
                Insn::Method { name, owner, .. } if name == "println" && owner == "java/io/PrintStream"
            )),
            "original call removed"
        );
        assert!(insns.iter().any(|insn| matches!(
            insn,
            Insn::Method { op: Opcode::Invokestatic, owner, name, .. }
                if owner == "a/Owner" && name == "pr"
        )));
    }

    #[test]
    fn invoke_redirect_validates_receiver_argument() {
        let mut target = println_target();
        // Receiver type missing from the handler signature.
        let info = redirect_info(
            "(Ljava/lang/String;)V",
            "Ljava/io/PrintStream;println*",
            AtCode::Invoke,
        );
        assert!(run(&info, &mut target).is_err());
    }

    #[test]
    fn static_field_read_redirects_to_handler() {
        let mut target = println_target();
        let info = redirect_info(
            "()Ljava/io/PrintStream;",
            "Ljava/lang/System;out:Ljava/io/PrintStream;",
            AtCode::Field,
        );
        run(&info, &mut target).expect("redirects");
        assert!(target.method.instructions.iter_insns().all(|(_, insn)| {
            !matches!(insn, Insn::Field { op: Opcode::Getstatic, .. })
        }));
    }

    #[test]
    fn field_write_handler_takes_receiver_and_value() {
        // void bump() { this.count = 5; }
        let mut method = MethodNode::new(Access::PUBLIC | Access::STATIC, "bump", "()V");
        method.instructions.extend(vec![
            Insn::field(Opcode::Getstatic, "a/Owner", "self", "La/Owner;"),
            Insn::push_int(5),
            Insn::field(Opcode::Putfield, "a/Owner", "count", "I"),
            Insn::op(Opcode::Return),
        ]);
        let mut target = Target::new("a/Owner", method).expect("valid");

        let mut info = redirect_info("(La/Owner;I)V", "count*:I", AtCode::Field);
        if let InjectionPoint::At(at) = &mut info.points[0] {
            at.opcode = Some(Opcode::Putfield);
        }
        run(&info, &mut target).expect("redirects");
        assert!(target.method.instructions.iter_insns().any(|(_, insn)| {
            matches!(insn, Insn::Method { name, desc, .. } if name == "pr" && desc == "(La/Owner;I)V")
        }));
    }
}
