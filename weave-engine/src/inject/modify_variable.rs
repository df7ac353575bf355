//! The modify-variable injector: routes one local variable through the
//! handler at the resolved node.

use tracing::info as log_info;
use weave_tree::{Insn, InsnId, Opcode};
use weave_types::MethodDescriptor;

use crate::error::Result;
use crate::inject::{handler_invoke, Applied, InjectionInfo, InjectorContext};
use crate::locals::{locals_at, LocalsSettings};
use crate::target::Target;

pub(crate) fn apply(
    info: &InjectionInfo,
    target: &mut Target,
    node: InsnId,
    ctx: &mut InjectorContext<'_>,
) -> Result<Applied> {
    let handler = MethodDescriptor::parse(&info.handler_desc)?;
    let value_type = match handler.args.as_slice() {
        [only] if *only == handler.ret => only.clone(),
        _ => {
            return Err(info.invalid("modify-variable handler must have shape (T)T"));
        }
    };

    let frame = locals_at(
        &target.class_name,
        &target.method,
        node,
        &LocalsSettings::default(),
        ctx.cache,
        ctx.source,
        ctx.lvt,
    )?;

    let discriminator = &info.discriminator;
    let candidates: Vec<(usize, &crate::locals::LocalSlot)> = frame
        .iter()
        .enumerate()
        .filter_map(|(slot, entry)| entry.as_ref().map(|e| (slot, e)))
        .filter(|(slot, entry)| {
            entry.ty == value_type
                && (!discriminator.args_only || *slot < target.frame_size())
        })
        .collect();

    if discriminator.print {
        log_info!(
            handler = info.handler_name,
            "candidate locals for {}: {:?}",
            value_type.descriptor(),
            candidates
                .iter()
                .map(|(slot, entry)| format!("{}: {}", slot, entry.name))
                .collect::<Vec<_>>()
        );
        return Ok(Applied::Skipped);
    }

    let slot = if let Some(index) = discriminator.index {
        let valid = candidates.iter().any(|(slot, _)| *slot == index);
        if !valid {
            return Err(info.invalid(format!(
                "explicit index {index} does not hold a {}",
                value_type.descriptor()
            )));
        }
        index
    } else if let Some(ordinal) = discriminator.ordinal {
        candidates
            .get(ordinal)
            .map(|(slot, _)| *slot)
            .ok_or_else(|| {
                info.invalid(format!(
                    "ordinal {ordinal} out of range, only {} candidate(s)",
                    candidates.len()
                ))
            })?
    } else if !discriminator.names.is_empty() {
        candidates
            .iter()
            .find(|(_, entry)| discriminator.names.contains(&entry.name))
            .map(|(slot, _)| *slot)
            .ok_or_else(|| info.invalid("no candidate local matches the declared names"))?
    } else {
        // Implicit mode requires the type match to be unambiguous.
        match candidates.as_slice() {
            [(slot, _)] => *slot,
            [] => {
                return Err(info.invalid(format!(
                    "no local of type {} in scope",
                    value_type.descriptor()
                )))
            }
            _ => {
                return Err(info.invalid(format!(
                    "several locals of type {} in scope; use ordinal, index or name",
                    value_type.descriptor()
                )))
            }
        }
    };

    let mut seq = Vec::new();
    if !info.handler_static {
        seq.push(Insn::var(Opcode::Aload, 0));
    }
    seq.push(Insn::var(Opcode::load_for(&value_type), slot));
    seq.push(handler_invoke(info, target));
    seq.push(Insn::var(Opcode::store_for(&value_type), slot));

    target.insert_before(node, seq);
    target.add_to_stack(value_type.size() + 1);
    Ok(Applied::Yes)
}
