//! Local-variable reconstruction.
//!
//! Given a method body and an instruction, compute the best approximation
//! of the local variable table *immediately before* that instruction by
//! simulating stack-map frames and stores. Slots removed by `CHOP` or by a
//! shrinking `FULL` frame linger as "zombies" for a bounded number of
//! instructions and frames, because compilers routinely emit the access one
//! instruction after the frame that formally ends the variable's range.

use std::collections::HashMap;

use tracing::debug;
use weave_tree::{
    ClassSource, FrameEntry, FrameKind, Insn, InsnId, MethodNode, Opcode,
};
use weave_types::JavaType;

use crate::error::InvalidMethodError;
use crate::meta::MetaCache;

/// Zombie survival thresholds.
#[derive(Debug, Clone)]
pub struct LocalsSettings {
    /// Instruction budget for a chop-zombie.
    pub chopped_insn_threshold: usize,
    /// Frame budget for a chop-zombie.
    pub chopped_frame_threshold: usize,
    /// Instruction budget for a trim-zombie.
    pub trimmed_insn_threshold: usize,
    /// Frame budget for a trim-zombie.
    pub trimmed_frame_threshold: usize,
}

impl Default for LocalsSettings {
    fn default() -> Self {
        Self {
            chopped_insn_threshold: 8,
            chopped_frame_threshold: 1,
            trimmed_insn_threshold: 16,
            trimmed_frame_threshold: 2,
        }
    }
}

/// One reconstructed local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSlot {
    /// Variable name, synthesized as `var<slot>` when no table names it.
    pub name: String,
    /// Variable type.
    pub ty: JavaType,
}

impl LocalSlot {
    fn synthetic(slot: usize, ty: JavaType) -> Self {
        Self {
            name: format!("var{slot}"),
            ty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZombieKind {
    Chop,
    Trim,
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Empty,
    Live(LocalSlot),
    Zombie {
        slot: LocalSlot,
        kind: ZombieKind,
        insns: usize,
        frames: usize,
    },
}

impl Slot {
    fn demote(&mut self, kind: ZombieKind) {
        if let Slot::Live(slot) = self {
            *self = Slot::Zombie {
                slot: slot.clone(),
                kind,
                insns: 0,
                frames: 0,
            };
        }
    }

    fn resurrect(&mut self) {
        if let Slot::Zombie { slot, .. } = self {
            *self = Slot::Live(slot.clone());
        }
    }
}

/// A generated local-variable range, positions instead of labels.
#[derive(Debug, Clone, PartialEq)]
struct GeneratedLocal {
    slot: usize,
    ty: JavaType,
    start: usize,
    end: usize,
}

/// Cache of generated local-variable tables, keyed by
/// `class.method.desc`. One generation per method per session.
#[derive(Debug, Default)]
pub struct GeneratedLvtCache {
    tables: HashMap<String, Vec<GeneratedLocal>>,
}

fn method_key(class: &str, method: &MethodNode) -> String {
    format!("{}.{}.{}", class, method.name, method.desc)
}

/// Reconstruct the local variable table immediately before `at`.
#[allow(clippy::too_many_arguments)]
pub fn locals_at(
    class_name: &str,
    method: &MethodNode,
    at: InsnId,
    settings: &LocalsSettings,
    cache: &mut MetaCache,
    source: &dyn ClassSource,
    lvt_cache: &mut GeneratedLvtCache,
) -> Result<Vec<Option<LocalSlot>>, InvalidMethodError> {
    let desc = method.descriptor().map_err(|err| {
        InvalidMethodError::FrameAnalysis {
            class: class_name.to_string(),
            method: method.name.clone(),
            desc: method.desc.clone(),
            reason: err.to_string(),
        }
    })?;

    let mut frame: Vec<Slot> = vec![Slot::Empty; method.max_locals.max(1)];
    let mut cursor = 0usize;
    if !method.is_static() {
        ensure_len(&mut frame, 1);
        frame[0] = Slot::Live(LocalSlot {
            name: "this".into(),
            ty: JavaType::of(class_name.to_string()),
        });
        cursor = 1;
    }
    for arg in &desc.args {
        ensure_len(&mut frame, cursor + arg.size());
        frame[cursor] = Slot::Live(LocalSlot::synthetic(cursor, arg.clone()));
        if arg.is_wide() {
            frame[cursor + 1] = Slot::Empty;
        }
        cursor += arg.size();
    }
    let initial_frame_size = cursor;
    let mut frame_size = initial_frame_size;
    let mut last_frame_size = initial_frame_size;
    let mut known_frame_size = frame.len();

    let resolver = SlotResolver::build(class_name, method, cache, source, lvt_cache)?;

    let mut pending_store: Option<(usize, Opcode)> = None;

    for (index, (id, insn)) in method.instructions.iter_insns().enumerate() {
        // A store becomes visible at the instruction after it.
        if let Some((var, op)) = pending_store.take() {
            let ty = resolver.slot_type(var, index).unwrap_or_else(|| store_type(op));
            ensure_len(&mut frame, var + ty.size().max(1));
            frame[var] = Slot::Live(
                resolver
                    .slot_entry(var, index)
                    .unwrap_or_else(|| LocalSlot::synthetic(var, ty.clone())),
            );
            if ty.is_wide() {
                frame[var + 1] = Slot::Empty;
            }
            frame_size = frame_size.max(var + ty.size());
            known_frame_size = known_frame_size.max(frame.len());
        }

        if id == at {
            return Ok(finish(frame, settings));
        }

        match insn {
            Insn::Var { op, var } if op.is_store() => {
                pending_store = Some((*var, *op));
            }
            Insn::Var { op, var } if op.is_load() => {
                if let Some(entry) = resolver.slot_entry(*var, index) {
                    ensure_len(&mut frame, var + 1);
                    frame[*var] = Slot::Live(entry);
                } else {
                    ensure_len(&mut frame, var + 1);
                    frame[*var].resurrect();
                }
                if var + 1 > known_frame_size {
                    known_frame_size = var + 1;
                    // Growing the known frame exposes trailing zombies.
                    for slot in frame.iter_mut().take(known_frame_size) {
                        slot.resurrect();
                    }
                }
            }
            Insn::Frame(node) => {
                apply_frame(
                    node.kind,
                    &node.locals,
                    node.chopped,
                    &mut frame,
                    &mut frame_size,
                    &mut last_frame_size,
                    &resolver,
                    index,
                );
                if frame_size < initial_frame_size {
                    return Err(InvalidMethodError::FrameUnderflow {
                        class: class_name.to_string(),
                        method: method.name.clone(),
                        desc: method.desc.clone(),
                        size: frame_size,
                        initial: initial_frame_size,
                    });
                }
                tick_zombies(&mut frame, settings, 0, 1);
            }
            _ => {}
        }

        tick_zombies(&mut frame, settings, 1, 0);
    }

    debug!(
        class = class_name,
        method = method.name,
        "target instruction not reached; returning trailing frame"
    );
    Ok(finish(frame, settings))
}

fn ensure_len(frame: &mut Vec<Slot>, len: usize) {
    if frame.len() < len {
        frame.resize(len, Slot::Empty);
    }
}

fn store_type(op: Opcode) -> JavaType {
    match op {
        Opcode::Istore => JavaType::Int,
        Opcode::Lstore => JavaType::Long,
        Opcode::Fstore => JavaType::Float,
        Opcode::Dstore => JavaType::Double,
        _ => JavaType::object(),
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_frame(
    kind: FrameKind,
    locals: &[FrameEntry],
    chopped: usize,
    frame: &mut Vec<Slot>,
    frame_size: &mut usize,
    last_frame_size: &mut usize,
    resolver: &SlotResolver,
    index: usize,
) {
    match kind {
        FrameKind::Same | FrameKind::Same1 => {}
        FrameKind::Full | FrameKind::New => {
            let previous = *frame_size;
            *last_frame_size = previous;
            let declared = write_entries(frame, locals, 0, resolver, index);
            // Anything past the declared size was trimmed away.
            for slot in frame.iter_mut().skip(declared) {
                slot.demote(ZombieKind::Trim);
            }
            *frame_size = declared;
        }
        FrameKind::Append => {
            let previous = *frame_size;
            let declared = write_entries(frame, locals, *last_frame_size, resolver, index);
            *last_frame_size = previous;
            *frame_size = declared.max(previous);
        }
        FrameKind::Chop => {
            let previous = *frame_size;
            *last_frame_size = previous;
            let new_size = previous.saturating_sub(chopped);
            for slot in frame.iter_mut().skip(new_size) {
                slot.demote(ZombieKind::Chop);
            }
            *frame_size = new_size;
        }
    }
}

/// Write frame entries starting at `base`; answers the resulting size in
/// slots, wide entries counted twice.
fn write_entries(
    frame: &mut Vec<Slot>,
    entries: &[FrameEntry],
    base: usize,
    resolver: &SlotResolver,
    index: usize,
) -> usize {
    let mut slot = base;
    for entry in entries {
        ensure_len(frame, slot + 2);
        match entry {
            FrameEntry::Top => {
                // TOP may stand for a live-but-unknown local; give a
                // lingering zombie its slot back.
                frame[slot].resurrect();
                slot += 1;
            }
            FrameEntry::Integer => {
                frame[slot] = live_entry(resolver, slot, index, JavaType::Int);
                slot += 1;
            }
            FrameEntry::Float => {
                frame[slot] = live_entry(resolver, slot, index, JavaType::Float);
                slot += 1;
            }
            FrameEntry::Long => {
                frame[slot] = live_entry(resolver, slot, index, JavaType::Long);
                frame[slot + 1] = Slot::Empty;
                slot += 2;
            }
            FrameEntry::Double => {
                frame[slot] = live_entry(resolver, slot, index, JavaType::Double);
                frame[slot + 1] = Slot::Empty;
                slot += 2;
            }
            FrameEntry::Null | FrameEntry::Uninitialized(_) => {
                frame[slot] = Slot::Empty;
                slot += 1;
            }
            FrameEntry::Object(name) => {
                frame[slot] = live_entry(resolver, slot, index, JavaType::of(name.clone()));
                slot += 1;
            }
            FrameEntry::UninitializedThis => {
                frame[slot] = Slot::Live(LocalSlot {
                    name: "this".into(),
                    ty: JavaType::object(),
                });
                slot += 1;
            }
        }
    }
    slot
}

fn live_entry(resolver: &SlotResolver, slot: usize, index: usize, fallback: JavaType) -> Slot {
    Slot::Live(
        resolver
            .slot_entry(slot, index)
            .unwrap_or_else(|| LocalSlot::synthetic(slot, fallback)),
    )
}

fn tick_zombies(frame: &mut [Slot], settings: &LocalsSettings, insns: usize, frames: usize) {
    for slot in frame.iter_mut() {
        if let Slot::Zombie {
            kind,
            insns: i,
            frames: f,
            ..
        } = slot
        {
            *i += insns;
            *f += frames;
            let (insn_limit, frame_limit) = match kind {
                ZombieKind::Chop => (
                    settings.chopped_insn_threshold,
                    settings.chopped_frame_threshold,
                ),
                ZombieKind::Trim => (
                    settings.trimmed_insn_threshold,
                    settings.trimmed_frame_threshold,
                ),
            };
            if *i > insn_limit || *f > frame_limit {
                *slot = Slot::Empty;
            }
        }
    }
}

fn finish(frame: Vec<Slot>, _settings: &LocalsSettings) -> Vec<Option<LocalSlot>> {
    frame
        .into_iter()
        .map(|slot| match slot {
            Slot::Live(entry) => Some(entry),
            // A zombie that survived to the end was demoted at most one
            // step before the target node; treat it as live.
            Slot::Zombie { slot, insns, .. } if insns <= 1 => Some(slot),
            _ => None,
        })
        .collect()
}

/// Resolves `(slot, position)` against the declared LVT, or against a
/// generated table when the method carries none.
struct SlotResolver {
    declared: Vec<GeneratedLocal>,
    named: HashMap<(usize, usize), String>,
}

impl SlotResolver {
    fn build(
        class_name: &str,
        method: &MethodNode,
        cache: &mut MetaCache,
        source: &dyn ClassSource,
        lvt_cache: &mut GeneratedLvtCache,
    ) -> Result<Self, InvalidMethodError> {
        if !method.local_variables.is_empty() {
            let mut declared = Vec::new();
            let mut named = HashMap::new();
            for (ordinal, local) in method.local_variables.iter().enumerate() {
                let ty = JavaType::parse(&local.desc).map_err(|err| {
                    InvalidMethodError::FrameAnalysis {
                        class: class_name.to_string(),
                        method: method.name.clone(),
                        desc: method.desc.clone(),
                        reason: err.to_string(),
                    }
                })?;
                let start = method
                    .instructions
                    .label_index(local.start)
                    .unwrap_or(0);
                let end = method
                    .instructions
                    .label_index(local.end)
                    .unwrap_or(method.instructions.len());
                declared.push(GeneratedLocal {
                    slot: local.index,
                    ty,
                    start,
                    end,
                });
                named.insert((local.index, ordinal), local.name.clone());
            }
            return Ok(Self { declared, named });
        }

        let key = method_key(class_name, method);
        if !lvt_cache.tables.contains_key(&key) {
            let generated = generate_lvt(class_name, method, cache, source)?;
            lvt_cache.tables.insert(key.clone(), generated);
        }
        Ok(Self {
            declared: lvt_cache.tables[&key].clone(),
            named: HashMap::new(),
        })
    }

    fn entries_for(&self, slot: usize, index: usize) -> Option<(usize, &GeneratedLocal)> {
        self.declared
            .iter()
            .enumerate()
            .find(|(_, local)| {
                local.slot == slot && index >= local.start && index < local.end
            })
            .or_else(|| {
                // Fall back to a unique by-slot entry; ranges are often a
                // hair narrower than actual liveness.
                let mut matching = self
                    .declared
                    .iter()
                    .enumerate()
                    .filter(|(_, local)| local.slot == slot);
                let first = matching.next();
                matching.next().is_none().then_some(first).flatten()
            })
    }

    fn slot_type(&self, slot: usize, index: usize) -> Option<JavaType> {
        self.entries_for(slot, index).map(|(_, local)| local.ty.clone())
    }

    fn slot_entry(&self, slot: usize, index: usize) -> Option<LocalSlot> {
        let (ordinal, local) = self.entries_for(slot, index)?;
        let name = self
            .named
            .get(&(slot, ordinal))
            .cloned()
            .unwrap_or_else(|| format!("var{slot}"));
        Some(LocalSlot {
            name,
            ty: local.ty.clone(),
        })
    }
}

/// Produce an approximate LVT for a method that carries none: a linear
/// pass recording store sites and their inferred types, merging divergent
/// reference types through the common-superclass query.
fn generate_lvt(
    class_name: &str,
    method: &MethodNode,
    cache: &mut MetaCache,
    source: &dyn ClassSource,
) -> Result<Vec<GeneratedLocal>, InvalidMethodError> {
    let desc = method.descriptor().map_err(|err| {
        InvalidMethodError::FrameAnalysis {
            class: class_name.to_string(),
            method: method.name.clone(),
            desc: method.desc.clone(),
            reason: err.to_string(),
        }
    })?;

    let mut slots: HashMap<usize, GeneratedLocal> = HashMap::new();
    let end = method.instructions.len();

    let mut cursor = 0usize;
    if !method.is_static() {
        slots.insert(
            0,
            GeneratedLocal {
                slot: 0,
                ty: JavaType::of(class_name.to_string()),
                start: 0,
                end,
            },
        );
        cursor = 1;
    }
    for arg in &desc.args {
        slots.insert(
            cursor,
            GeneratedLocal {
                slot: cursor,
                ty: arg.clone(),
                start: 0,
                end,
            },
        );
        cursor += arg.size();
    }

    let mut previous: Option<&Insn> = None;
    for (index, (_, insn)) in method.instructions.iter_insns().enumerate() {
        if let Insn::Var { op, var } = insn {
            if op.is_store() {
                let inferred = match op {
                    Opcode::Astore => infer_reference(previous),
                    other => store_type(*other),
                };
                merge_slot(&mut slots, *var, inferred, index, end, cache, source);
            }
        }
        if let Insn::Frame(frame) = insn {
            let mut slot = 0usize;
            for entry in &frame.locals {
                match entry {
                    FrameEntry::Object(name) => {
                        merge_slot(
                            &mut slots,
                            slot,
                            JavaType::of(name.clone()),
                            index,
                            end,
                            cache,
                            source,
                        );
                        slot += 1;
                    }
                    FrameEntry::Long | FrameEntry::Double => slot += 2,
                    _ => slot += 1,
                }
            }
        }
        previous = Some(insn);
    }

    let mut table: Vec<GeneratedLocal> = slots.into_values().collect();
    table.sort_by_key(|local| local.slot);
    Ok(table)
}

fn infer_reference(previous: Option<&Insn>) -> JavaType {
    match previous {
        Some(Insn::Type { op, desc })
            if matches!(op, Opcode::New | Opcode::Checkcast | Opcode::Anewarray) =>
        {
            if desc.starts_with('[') {
                JavaType::parse(desc).unwrap_or_else(|_| JavaType::object())
            } else {
                JavaType::of(desc.clone())
            }
        }
        Some(Insn::Method { desc, .. }) => weave_types::MethodDescriptor::parse(desc)
            .map(|d| d.ret)
            .unwrap_or_else(|_| JavaType::object()),
        Some(Insn::Field { op, desc, .. }) if op.is_field_get() => {
            JavaType::parse(desc).unwrap_or_else(|_| JavaType::object())
        }
        Some(Insn::Ldc(weave_tree::Constant::String(_))) => JavaType::of("java/lang/String"),
        _ => JavaType::object(),
    }
}

#[allow(clippy::too_many_arguments)]
fn merge_slot(
    slots: &mut HashMap<usize, GeneratedLocal>,
    slot: usize,
    ty: JavaType,
    index: usize,
    end: usize,
    cache: &mut MetaCache,
    source: &dyn ClassSource,
) {
    match slots.get_mut(&slot) {
        Some(existing) if existing.ty == ty => {}
        Some(existing) => {
            if let (JavaType::Object(a), JavaType::Object(b)) = (&existing.ty, &ty) {
                let merged = cache.common_super(a, b, false, source);
                existing.ty = JavaType::of(merged);
            } else {
                existing.ty = ty;
            }
            existing.start = existing.start.min(index);
        }
        None => {
            slots.insert(
                slot,
                GeneratedLocal {
                    slot,
                    ty,
                    start: index,
                    end,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_tree::{FrameNode, NullSource};
    use weave_types::Access;

    fn body_method(desc: &str, static_: bool) -> MethodNode {
        let access = if static_ {
            Access::PUBLIC | Access::STATIC
        } else {
            Access::PUBLIC
        };
        let mut method = MethodNode::new(access, "body", desc);
        method.max_locals = 8;
        method
    }

    fn reconstruct(method: &MethodNode, at: InsnId) -> Vec<Option<LocalSlot>> {
        let mut cache = MetaCache::new();
        let mut lvt = GeneratedLvtCache::default();
        locals_at(
            "a/Owner",
            method,
            at,
            &LocalsSettings::default(),
            &mut cache,
            &NullSource,
            &mut lvt,
        )
        .expect("reconstruction succeeds")
    }

    #[test]
    fn seeds_this_and_wide_args() {
        let mut method = body_method("(IDLjava/lang/String;)V", false);
        let at = method.instructions.push(Insn::op(Opcode::Return));

        let frame = reconstruct(&method, at);
        assert_eq!(frame[0].as_ref().map(|s| s.name.as_str()), Some("this"));
        assert_eq!(frame[1].as_ref().map(|s| s.ty.clone()), Some(JavaType::Int));
        assert_eq!(
            frame[2].as_ref().map(|s| s.ty.clone()),
            Some(JavaType::Double)
        );
        assert!(frame[3].is_none(), "upper half of wide arg stays empty");
        assert_eq!(
            frame[4].as_ref().map(|s| s.ty.descriptor()),
            Some("Ljava/lang/String;".into())
        );
    }

    #[test]
    fn store_becomes_visible_at_next_instruction() {
        let mut method = body_method("()V", true);
        let store = method
            .instructions
            .extend(vec![
                Insn::push_int(7),
                Insn::var(Opcode::Istore, 0),
                Insn::op(Opcode::Nop),
                Insn::op(Opcode::Return),
            ]);

        // Immediately before the store itself: nothing yet.
        let before = reconstruct(&method, store[1]);
        assert!(before[0].is_none());

        // Immediately before the following instruction: visible.
        let after = reconstruct(&method, store[2]);
        assert_eq!(after[0].as_ref().map(|s| s.ty.clone()), Some(JavaType::Int));
    }

    #[test]
    fn chop_frame_kills_locals_past_threshold() {
        let mut method = body_method("(I)V", true);
        let mut insns = vec![
            Insn::push_int(1),
            Insn::var(Opcode::Istore, 1),
            Insn::op(Opcode::Nop),
            Insn::Frame(FrameNode::chop(1)),
        ];
        // Outlive the chop-zombie instruction budget.
        for _ in 0..12 {
            insns.push(Insn::op(Opcode::Nop));
        }
        insns.push(Insn::op(Opcode::Return));
        let ids = method.instructions.extend(insns);

        let frame = reconstruct(&method, *ids.last().unwrap());
        assert!(frame[1].is_none(), "chopped local expired");
        assert_eq!(
            frame[0].as_ref().map(|s| s.ty.clone()),
            Some(JavaType::Int),
            "argument slot survives"
        );
    }

    #[test]
    fn chopped_local_survives_within_threshold() {
        let mut method = body_method("(I)V", true);
        let ids = method.instructions.extend(vec![
            Insn::push_int(1),
            Insn::var(Opcode::Istore, 1),
            Insn::op(Opcode::Nop),
            Insn::Frame(FrameNode::chop(1)),
            Insn::op(Opcode::Return),
        ]);

        let frame = reconstruct(&method, *ids.last().unwrap());
        assert!(
            frame[1].is_some(),
            "zombie within one instruction of the target resurrects"
        );
    }

    #[test]
    fn full_frame_replaces_contents() {
        let mut method = body_method("(I)V", true);
        let ids = method.instructions.extend(vec![
            Insn::op(Opcode::Nop),
            Insn::Frame(FrameNode::full(
                vec![
                    FrameEntry::Integer,
                    FrameEntry::Object("java/lang/String".into()),
                ],
                vec![],
            )),
            Insn::op(Opcode::Nop),
            Insn::op(Opcode::Return),
        ]);

        let frame = reconstruct(&method, ids[3]);
        assert_eq!(frame[0].as_ref().map(|s| s.ty.clone()), Some(JavaType::Int));
        assert_eq!(
            frame[1].as_ref().map(|s| s.ty.descriptor()),
            Some("Ljava/lang/String;".into())
        );
    }

    #[test]
    fn generated_lvt_is_cached_per_method() {
        let mut method = body_method("()V", true);
        let ids = method.instructions.extend(vec![
            Insn::Ldc(weave_tree::Constant::String("x".into())),
            Insn::var(Opcode::Astore, 0),
            Insn::op(Opcode::Nop),
            Insn::op(Opcode::Return),
        ]);

        let mut cache = MetaCache::new();
        let mut lvt = GeneratedLvtCache::default();
        let settings = LocalsSettings::default();
        let first = locals_at(
            "a/Owner", &method, ids[2], &settings, &mut cache, &NullSource, &mut lvt,
        )
        .expect("first pass");
        assert_eq!(
            first[0].as_ref().map(|s| s.ty.descriptor()),
            Some("Ljava/lang/String;".into())
        );
        assert_eq!(lvt.tables.len(), 1);

        let _ = locals_at(
            "a/Owner", &method, ids[3], &settings, &mut cache, &NullSource, &mut lvt,
        )
        .expect("second pass");
        assert_eq!(lvt.tables.len(), 1, "generation happens once");
    }
}
