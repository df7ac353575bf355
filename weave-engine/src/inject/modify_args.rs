//! The modify-args injector: bundles every argument of an invocation into
//! a synthetic `Args` object, hands the bundle to the handler for
//! mutation, then unpacks it back onto the stack.

use weave_tree::{Insn, InsnId, Opcode};
use weave_types::MethodDescriptor;

use crate::error::Result;
use crate::inject::{handler_invoke, Applied, InjectionInfo, InjectorContext, ARGS_BASE_CLASS};
use crate::target::Target;

pub(crate) fn apply(
    info: &InjectionInfo,
    target: &mut Target,
    node: InsnId,
    ctx: &mut InjectorContext<'_>,
) -> Result<Applied> {
    let Insn::Method { desc, .. } = target.method.instructions.get(node).clone() else {
        return Err(info.invalid("modify-args target must be a method invocation"));
    };
    let invocation = MethodDescriptor::parse(&desc)?;
    if invocation.args.is_empty() {
        return Err(info.invalid("modify-args target invocation takes no arguments"));
    }

    let expected = format!("(L{ARGS_BASE_CLASS};)V");
    if info.handler_desc != expected {
        return Err(info.invalid(format!(
            "modify-args handler must have signature {expected}"
        )));
    }

    let bundle = ctx.args.class_for(&invocation, Some(&info.mixin));
    let mut factory_desc = String::from("(");
    for ty in &invocation.args {
        factory_desc.push_str(&ty.descriptor());
    }
    factory_desc.push_str(&format!(")L{bundle};"));

    let bundle_slot = target.allocate_locals(1);
    let mut seq = vec![
        Insn::invoke(Opcode::Invokestatic, bundle.clone(), "of", factory_desc),
        Insn::var(Opcode::Astore, bundle_slot),
    ];
    if !info.handler_static {
        seq.push(Insn::var(Opcode::Aload, 0));
    }
    seq.push(Insn::var(Opcode::Aload, bundle_slot));
    seq.push(handler_invoke(info, target));
    for (index, ty) in invocation.args.iter().enumerate() {
        seq.push(Insn::var(Opcode::Aload, bundle_slot));
        seq.push(Insn::invoke(
            Opcode::Invokevirtual,
            bundle.clone(),
            format!("${index}"),
            format!("(){}", ty.descriptor()),
        ));
    }

    target.insert_before(node, seq);
    target.add_to_stack(invocation.arg_slots().max(2) + 1);
    Ok(Applied::Yes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::{inject, ArgsClassGenerator, InjectionInfo, InjectorKind};
    use crate::locals::GeneratedLvtCache;
    use crate::meta::MetaCache;
    use crate::options::EngineOptions;
    use crate::point::{AtCode, AtPoint, InjectionPoint};
    use crate::selector::MemberSelector;
    use weave_tree::{MethodNode, NullSource};
    use weave_types::Access;

    fn bundled_target() -> Target {
        // calls h(1, 2.5, "x")
        let mut method = MethodNode::new(Access::PUBLIC | Access::STATIC, "caller", "()V");
        method.instructions.extend(vec![
            Insn::push_int(1),
            Insn::Ldc(weave_tree::Constant::Double(2.5)),
            Insn::Ldc(weave_tree::Constant::String("x".into())),
            Insn::invoke(
                Opcode::Invokestatic,
                "a/Owner",
                "h",
                "(IDLjava/lang/String;)V",
            ),
            Insn::op(Opcode::Return),
        ]);
        method.max_stack = 4;
        method.max_locals = 0;
        Target::new("a/Owner", method).expect("valid")
    }

    fn bundle_info() -> InjectionInfo {
        let mut info = InjectionInfo::callback(
            "a/MixinOwner",
            "mutate",
            &format!("(L{ARGS_BASE_CLASS};)V"),
        );
        info.kind = InjectorKind::ModifyArgs;
        info.handler_static = true;
        info.points.push(InjectionPoint::At(
            AtPoint::of(AtCode::Invoke).with_selector(MemberSelector::parse("h(IDLjava/lang/String;)V")),
        ));
        info
    }

    #[test]
    fn bundles_and_unpacks_around_the_call() {
        let mut target = bundled_target();
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

        let outcome = inject(&bundle_info(), &mut target, &mut ctx).expect("injects");
        assert_eq!(outcome.matched, 1);
        assert_eq!(args.classes().len(), 1);
        let bundle = args.classes()[0].name.clone();

        let insns: Vec<_> = target
            .method
            .instructions
            .iter_insns()
            .map(|(_, insn)| insn.clone())
            .collect();
        let of_pos = insns
            .iter()
            .position(|insn| matches!(insn, Insn::Method { owner, name, .. } if *owner == bundle && name == "of"))
            .expect("factory call");
        let handler_pos = insns
            .iter()
            .position(|insn| matches!(insn, Insn::Method { name, .. } if name == "mutate"))
            .expect("handler call");
        let unpack_pos = insns
            .iter()
            .position(|insn| matches!(insn, Insn::Method { name, .. } if name == "$0"))
            .expect("unpack call");
        let call_pos = insns
            .iter()
            .position(|insn| matches!(insn, Insn::Method { name, .. } if name == "h"))
            .expect("original call");
        assert!(of_pos < handler_pos && handler_pos < unpack_pos && unpack_pos < call_pos);
    }

    #[test]
    fn identical_descriptors_reuse_the_bundle_class() {
        let mut cache = MetaCache::new();
        let mut lvt = GeneratedLvtCache::default();
        let mut args = ArgsClassGenerator::default();
        let options = EngineOptions::default();

        for _ in 0..2 {
            let mut target = bundled_target();
            let mut ctx = InjectorContext {
                cache: &mut cache,
                source: &NullSource,
                options: &options,
                lvt: &mut lvt,
                args: &mut args,
            };
            inject(&bundle_info(), &mut target, &mut ctx).expect("injects");
        }
        assert_eq!(args.classes().len(), 1);
        assert_eq!(args.classes()[0].loads, 2);
    }

    #[test]
    fn wrong_handler_signature_is_rejected() {
        let mut target = bundled_target();
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
        let mut info = bundle_info();
        info.handler_desc = "(I)V".into();
        assert!(inject(&info, &mut target, &mut ctx).is_err());
    }
}
