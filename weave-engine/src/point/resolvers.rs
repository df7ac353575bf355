//! The per-code scan strategies.

use weave_tree::{Insn, InsnId, Opcode};

use crate::point::{AtCode, AtPoint, PointError};
use crate::selector::SelectContext;
use crate::target::Target;

/// Run the scan strategy for `point` over `range` (inclusive positions in
/// the target's instruction list).
pub(super) fn find(
    point: &AtPoint,
    target: &Target,
    range: (usize, usize),
) -> Result<Vec<InsnId>, PointError> {
    match point.code {
        AtCode::Head => Ok(head(target, range)),
        AtCode::Return => Ok(returns(target, range, point)),
        AtCode::Tail => tail(target, range),
        AtCode::Invoke => matched(point, target, range, |insn| {
            matches!(insn, Insn::Method { .. } | Insn::InvokeDynamic { .. })
        }),
        AtCode::InvokeString => invoke_string(point, target, range),
        AtCode::New => new_insn(point, target, range),
        AtCode::Field => matched(point, target, range, |insn| {
            matches!(insn, Insn::Field { .. })
        }),
        AtCode::Jump => jump(point, target, range),
    }
}

fn in_range<'a>(
    target: &'a Target,
    range: (usize, usize),
) -> impl Iterator<Item = (usize, InsnId, &'a Insn)> + 'a {
    target
        .method
        .instructions
        .iter_insns()
        .enumerate()
        .filter(move |(index, _)| *index >= range.0 && *index <= range.1)
        .map(|(index, (id, insn))| (index, id, insn))
}

/// The first real instruction after any frame/label/line-number prefix.
fn head(target: &Target, range: (usize, usize)) -> Vec<InsnId> {
    in_range(target, range)
        .find(|(_, _, insn)| insn.is_real())
        .map(|(_, id, _)| vec![id])
        .unwrap_or_default()
}

/// Every return opcode matching the method's computed return opcode.
fn returns(target: &Target, range: (usize, usize), point: &AtPoint) -> Vec<InsnId> {
    let expected = target.return_opcode();
    let nodes: Vec<InsnId> = in_range(target, range)
        .filter(|(_, _, insn)| insn.opcode() == Some(expected))
        .map(|(_, id, _)| id)
        .collect();
    pick_ordinal(nodes, point.ordinal)
}

/// The last matching return; an error when the method has none in range.
fn tail(target: &Target, range: (usize, usize)) -> Result<Vec<InsnId>, PointError> {
    let expected = target.return_opcode();
    in_range(target, range)
        .filter(|(_, _, insn)| insn.opcode() == Some(expected))
        .map(|(_, id, _)| id)
        .last()
        .map(|id| vec![id])
        .ok_or(PointError::NoReturn)
}

/// Shared scan for selector-driven strategies: collect matches, apply the
/// ordinal, then check the selector's quantifier against the total count.
fn matched(
    point: &AtPoint,
    target: &Target,
    range: (usize, usize),
    kind: impl Fn(&Insn) -> bool,
) -> Result<Vec<InsnId>, PointError> {
    let selector = point
        .selector
        .as_ref()
        .ok_or(PointError::MissingSelector(point.code))?;

    let mut all = Vec::new();
    for (_, id, insn) in in_range(target, range) {
        if !kind(insn) {
            continue;
        }
        if let Some(opcode) = point.opcode {
            if insn.opcode() != Some(opcode) {
                continue;
            }
        }
        if selector.matches_insn(insn) {
            all.push(id);
        }
    }

    let count = all.len();
    if !selector
        .quantifier()
        .accepts(count, SelectContext::Instruction)
    {
        return Err(PointError::QuantifierBounds { count });
    }
    Ok(pick_ordinal(all, point.ordinal))
}

/// As INVOKE, additionally requiring the preceding real instruction to be
/// a string constant, optionally matching the named `ldc` argument.
fn invoke_string(
    point: &AtPoint,
    target: &Target,
    range: (usize, usize),
) -> Result<Vec<InsnId>, PointError> {
    let wanted = point.args.get("ldc").map(String::as_str);
    let candidates = matched(point, target, range, |insn| {
        matches!(insn, Insn::Method { .. })
    })?;

    Ok(candidates
        .into_iter()
        .filter(|id| {
            let mut cursor = *id;
            // Walk back over pseudo-instructions to the previous real one.
            while let Some(prev) = target.method.instructions.offset_from(cursor, -1) {
                cursor = prev;
                let insn = target.method.instructions.get(prev);
                if insn.is_real() {
                    return matches!(
                        insn,
                        Insn::Ldc(weave_tree::Constant::String(text))
                            if wanted.map_or(true, |wanted| wanted == text)
                    );
                }
            }
            false
        })
        .collect())
}

/// Matching `new` allocations; the selector's descriptor (or owner, or
/// bare name) is interpreted as the allocated type.
fn new_insn(
    point: &AtPoint,
    target: &Target,
    range: (usize, usize),
) -> Result<Vec<InsnId>, PointError> {
    let nodes: Vec<InsnId> = in_range(target, range)
        .filter(|(_, _, insn)| match insn {
            Insn::Type {
                op: Opcode::New,
                desc,
            } => match &point.selector {
                None => true,
                Some(selector) => {
                    let as_desc = format!("L{desc};");
                    selector.desc().map_or(false, |d| d == as_desc || d == *desc)
                        || selector.owner().map_or(false, |o| o == desc)
                        || selector.name().map_or(false, |n| n == desc)
                }
            },
            _ => false,
        })
        .map(|(_, id, _)| id)
        .collect();
    Ok(pick_ordinal(nodes, point.ordinal))
}

/// Matching conditional jumps, optionally narrowed to one opcode.
fn jump(
    point: &AtPoint,
    target: &Target,
    range: (usize, usize),
) -> Result<Vec<InsnId>, PointError> {
    let nodes: Vec<InsnId> = in_range(target, range)
        .filter(|(_, _, insn)| match insn.opcode() {
            Some(op) if op.is_conditional_jump() => {
                point.opcode.map_or(true, |wanted| wanted == op)
            }
            _ => false,
        })
        .map(|(_, id, _)| id)
        .collect();
    Ok(pick_ordinal(nodes, point.ordinal))
}

fn pick_ordinal(nodes: Vec<InsnId>, ordinal: Option<usize>) -> Vec<InsnId> {
    match ordinal {
        None => nodes,
        Some(n) => nodes.into_iter().nth(n).map(|id| vec![id]).unwrap_or_default(),
    }
}
