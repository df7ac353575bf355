//! The callback injector: installs a handler call at resolved nodes,
//! passing a callback-info record and optionally the reconstructed locals.

use tracing::{info, warn};
use weave_tree::{Insn, InsnId, MethodNode, Opcode};
use weave_types::{Access, JavaType, CTOR_NAME};

use crate::error::Result;
use crate::inject::{Applied, InjectionInfo, InjectorContext, LocalCapture};
use crate::locals::{locals_at, LocalsSettings};
use crate::target::Target;

pub(crate) fn apply(
    info: &InjectionInfo,
    target: &mut Target,
    node: InsnId,
    ctx: &mut InjectorContext<'_>,
) -> Result<Applied> {
    // Captured locals: everything live past the argument frame.
    let captured: Vec<(usize, JavaType)> = if info.locals.captures()
        || info.locals == LocalCapture::Print
    {
        let frame = locals_at(
            &target.class_name,
            &target.method,
            node,
            &LocalsSettings::default(),
            ctx.cache,
            ctx.source,
            ctx.lvt,
        )?;
        frame
            .iter()
            .enumerate()
            .skip(target.frame_size())
            .filter_map(|(slot, entry)| entry.as_ref().map(|e| (slot, e.ty.clone())))
            .collect()
    } else {
        Vec::new()
    };

    let captured_types: Vec<JavaType> = captured.iter().map(|(_, ty)| ty.clone()).collect();
    let expected = target.callback_descriptor(&captured_types);

    let (invoke_name, invoke_desc, stub) = if expected == info.handler_desc {
        (info.handler_name.clone(), expected.clone(), None)
    } else {
        match info.locals {
            LocalCapture::Print => {
                info!(
                    handler = info.handler_name,
                    expected,
                    "expected callback signature: private void {}{}",
                    info.handler_name,
                    expected
                );
                return Ok(Applied::Skipped);
            }
            LocalCapture::CaptureSoft => {
                warn!(
                    handler = info.handler_name,
                    found = info.handler_desc,
                    expected,
                    "callback descriptor mismatch, skipping injection"
                );
                return Ok(Applied::Skipped);
            }
            LocalCapture::CaptureStub => {
                let stub = error_stub(info, &expected);
                (stub.name.clone(), expected.clone(), Some(stub))
            }
            _ => {
                return Err(info.invalid(format!(
                    "callback descriptor mismatch: handler is {}, target requires {}",
                    info.handler_desc, expected
                )));
            }
        }
    };

    let node_is_value_return = target.return_type != JavaType::Void
        && target.method.instructions.get(node).opcode() == Some(target.return_opcode());

    let callback_class = target.callback_info_class();
    let marshall = target.allocate_locals(1);
    let mut seq: Vec<Insn> = Vec::new();

    // Preserve the in-flight return value for the callback-info record.
    let return_slot = if node_is_value_return {
        let slot = target.allocate_locals(target.return_type.size());
        seq.push(Insn::op(Opcode::dup_for(&target.return_type)));
        seq.push(Insn::var(Opcode::store_for(&target.return_type), slot));
        Some(slot)
    } else {
        None
    };

    // Allocate and initialise the callback info.
    seq.push(Insn::Type {
        op: Opcode::New,
        desc: callback_class.into(),
    });
    seq.push(Insn::op(Opcode::Dup));
    seq.push(Insn::Ldc(weave_tree::Constant::String(
        target.method.name.clone(),
    )));
    seq.push(Insn::push_int(i32::from(info.cancellable)));
    let ctor_desc = match return_slot {
        Some(slot) => {
            seq.push(Insn::var(Opcode::load_for(&target.return_type), slot));
            if target.return_type.is_primitive() {
                format!("(Ljava/lang/String;Z{})V", target.return_type.descriptor())
            } else {
                "(Ljava/lang/String;ZLjava/lang/Object;)V".into()
            }
        }
        None => "(Ljava/lang/String;Z)V".into(),
    };
    seq.push(Insn::invoke(
        Opcode::Invokespecial,
        callback_class,
        CTOR_NAME,
        ctor_desc,
    ));
    seq.push(Insn::var(Opcode::Astore, marshall));

    // Invoke the handler with (this?, args…, info, captured…).
    if !info.handler_static {
        seq.push(Insn::var(Opcode::Aload, 0));
    }
    for (index, ty) in target.arg_types.iter().enumerate() {
        seq.push(Insn::var(Opcode::load_for(ty), target.arg_indices[index]));
    }
    seq.push(Insn::var(Opcode::Aload, marshall));
    for (slot, ty) in &captured {
        seq.push(Insn::var(Opcode::load_for(ty), *slot));
    }
    let handler_op = if info.handler_static {
        Opcode::Invokestatic
    } else {
        Opcode::Invokespecial
    };
    seq.push(Insn::invoke(
        handler_op,
        target.class_name.clone(),
        invoke_name,
        invoke_desc,
    ));

    // Early-return path when the handler cancelled.
    if info.cancellable {
        let resume = target.method.new_label();
        seq.push(Insn::var(Opcode::Aload, marshall));
        seq.push(Insn::invoke(
            Opcode::Invokevirtual,
            callback_class,
            "isCancelled",
            "()Z",
        ));
        seq.push(Insn::Jump {
            op: Opcode::Ifeq,
            label: resume,
        });
        match &target.return_type {
            JavaType::Void => seq.push(Insn::op(Opcode::Return)),
            ret if ret.is_primitive() => {
                let tag = ret.descriptor();
                seq.push(Insn::var(Opcode::Aload, marshall));
                seq.push(Insn::invoke(
                    Opcode::Invokevirtual,
                    callback_class,
                    format!("getReturnValue{tag}"),
                    format!("(){tag}"),
                ));
                seq.push(Insn::op(Opcode::return_for(ret)));
            }
            ret => {
                seq.push(Insn::var(Opcode::Aload, marshall));
                seq.push(Insn::invoke(
                    Opcode::Invokevirtual,
                    callback_class,
                    "getReturnValue",
                    "()Ljava/lang/Object;",
                ));
                if let Some(reference) = ret.reference_name() {
                    seq.push(Insn::Type {
                        op: Opcode::Checkcast,
                        desc: reference,
                    });
                }
                seq.push(Insn::op(Opcode::return_for(ret)));
            }
        }
        seq.push(Insn::Label(resume));
    }

    target.insert_before(node, seq);

    let arg_slots: usize = target.arg_types.iter().map(JavaType::size).sum();
    let captured_slots: usize = captured.iter().map(|(_, ty)| ty.size()).sum();
    let invoke_stack =
        usize::from(!info.handler_static) + arg_slots + 1 + captured_slots;
    let ctor_stack = 4 + target.return_type.size();
    target.add_to_stack(invoke_stack.max(ctor_stack));

    Ok(match stub {
        Some(stub) => Applied::Stub(stub),
        None => Applied::Yes,
    })
}

/// A throwing stand-in with the expected descriptor, installed when the
/// handler's signature does not line up under the stub-fail policy.
fn error_stub(info: &InjectionInfo, expected: &str) -> MethodNode {
    let mut access = Access::PRIVATE | Access::SYNTHETIC;
    if info.handler_static {
        access |= Access::STATIC;
    }
    let mut stub = MethodNode::new(
        access,
        format!("{}$missing", info.handler_name),
        expected,
    );
    let message = format!(
        "Mixin handler {}::{} does not match the required signature {}",
        info.mixin, info.handler_name, expected
    );
    stub.instructions.extend(vec![
        Insn::Type {
            op: Opcode::New,
            desc: "java/lang/NoSuchMethodError".into(),
        },
        Insn::op(Opcode::Dup),
        Insn::Ldc(weave_tree::Constant::String(message)),
        Insn::invoke(
            Opcode::Invokespecial,
            "java/lang/NoSuchMethodError",
            CTOR_NAME,
            "(Ljava/lang/String;)V",
        ),
        Insn::op(Opcode::Athrow),
    ]);
    stub.max_stack = 3;
    stub.max_locals = weave_types::MethodDescriptor::parse(expected)
        .map(|desc| desc.arg_slots() + usize::from(!info.handler_static))
        .unwrap_or(4);
    stub
}
