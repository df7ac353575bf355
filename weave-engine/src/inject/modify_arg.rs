//! The modify-arg injector: passes one argument of an invocation through
//! the handler before the call proceeds.

use weave_tree::{Insn, InsnId, Opcode};
use weave_types::MethodDescriptor;

use crate::error::Result;
use crate::inject::{handler_invoke, load_args, store_args, Applied, InjectionInfo};
use crate::target::Target;

pub(crate) fn apply(
    info: &InjectionInfo,
    target: &mut Target,
    node: InsnId,
    explicit_index: Option<usize>,
) -> Result<Applied> {
    let Insn::Method { desc, .. } = target.method.instructions.get(node).clone() else {
        return Err(info.invalid("modify-arg target must be a method invocation"));
    };
    let invocation = MethodDescriptor::parse(&desc)?;
    let handler = MethodDescriptor::parse(&info.handler_desc)?;

    let value_type = handler
        .args
        .first()
        .filter(|first| **first == handler.ret)
        .ok_or_else(|| {
            info.invalid("modify-arg handler must have shape (T)T or (T, args...)T")
        })?
        .clone();

    // Single-arg form, or the context form carrying the full original
    // argument list after the modified value.
    let with_context = match handler.args.len() {
        1 => false,
        len if len == invocation.args.len() + 1 => {
            if handler.args[1..] != invocation.args[..] {
                return Err(info.invalid(
                    "context arguments of modify-arg handler must match the invocation",
                ));
            }
            true
        }
        _ => {
            return Err(info.invalid("modify-arg handler must have shape (T)T or (T, args...)T"))
        }
    };

    let index = match explicit_index {
        Some(index) => {
            if invocation.args.get(index) != Some(&value_type) {
                return Err(info.invalid(format!(
                    "argument {index} of the invocation is not {}",
                    value_type.descriptor()
                )));
            }
            index
        }
        None => {
            let mut matching = invocation
                .args
                .iter()
                .enumerate()
                .filter(|(_, ty)| **ty == value_type)
                .map(|(index, _)| index);
            let index = matching.next().ok_or_else(|| {
                info.invalid(format!(
                    "invocation has no argument of type {}",
                    value_type.descriptor()
                ))
            })?;
            if matching.next().is_some() {
                return Err(info.invalid(format!(
                    "invocation has several arguments of type {}; an explicit index is required",
                    value_type.descriptor()
                )));
            }
            index
        }
    };

    let (stores, slots) = store_args(target, &invocation.args);
    let mut seq = stores;
    // Rebuild the stack below the modified argument.
    seq.extend(load_args(&invocation.args, &slots, 0..index));
    if !info.handler_static {
        seq.push(Insn::var(Opcode::Aload, 0));
    }
    seq.push(Insn::var(
        Opcode::load_for(&value_type),
        slots[index],
    ));
    if with_context {
        seq.extend(load_args(&invocation.args, &slots, 0..invocation.args.len()));
    }
    seq.push(handler_invoke(info, target));
    seq.extend(load_args(&invocation.args, &slots, index + 1..invocation.args.len()));

    target.insert_before(node, seq);
    target.add_to_stack(invocation.arg_slots() + value_type.size() + 1);
    Ok(Applied::Yes)
}
