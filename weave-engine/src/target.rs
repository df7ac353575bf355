//! The per-method injection target model.

use std::collections::HashMap;

use weave_tree::{ClassSource, Insn, InsnId, MethodNode, Opcode};
use weave_types::{JavaType, MethodDescriptor, CTOR_NAME};

use crate::error::{MixinError, Result};
use crate::meta::MetaCache;

/// Internal name of the void-target callback info class.
pub const CALLBACK_INFO: &str = "weave/callback/CallbackInfo";

/// Internal name of the value-target callback info class.
pub const CALLBACK_INFO_RETURNABLE: &str = "weave/callback/CallbackInfoReturnable";

/// Bookkeeping for one rewritten instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    /// The instruction currently standing in for the original.
    pub champion: InsnId,
    /// The original was replaced by the champion.
    pub replaced: bool,
    /// The original was removed outright.
    pub removed: bool,
    /// Instructions were wrapped around the original.
    pub wrapped: bool,
}

/// Tracks instruction replacement chains so injectors composing on the
/// same logical instruction cooperate regardless of visit order.
#[derive(Debug, Clone, Default)]
pub struct InjectionNodes {
    states: HashMap<InsnId, NodeState>,
}

impl InjectionNodes {
    /// Follow the replacement chain from an originally-resolved node to
    /// the instruction currently standing in for it.
    pub fn resolve(&self, id: InsnId) -> InsnId {
        let mut current = id;
        while let Some(state) = self.states.get(&current) {
            if state.champion == current {
                break;
            }
            current = state.champion;
        }
        current
    }

    /// State recorded for a node, if any injector touched it.
    pub fn get(&self, id: InsnId) -> Option<&NodeState> {
        self.states.get(&id)
    }

    /// `true` when the resolved node was removed.
    pub fn is_removed(&self, id: InsnId) -> bool {
        self.states
            .get(&self.resolve(id))
            .map_or(false, |state| state.removed)
    }

    fn record_replace(&mut self, original: InsnId, champion: InsnId) {
        self.states
            .entry(original)
            .and_modify(|state| {
                state.champion = champion;
                state.replaced = true;
            })
            .or_insert(NodeState {
                champion,
                replaced: true,
                removed: false,
                wrapped: false,
            });
    }

    fn record_removed(&mut self, id: InsnId) {
        self.states
            .entry(id)
            .and_modify(|state| state.removed = true)
            .or_insert(NodeState {
                champion: id,
                replaced: false,
                removed: true,
                wrapped: false,
            });
    }

    fn record_wrapped(&mut self, id: InsnId) {
        self.states
            .entry(id)
            .and_modify(|state| state.wrapped = true)
            .or_insert(NodeState {
                champion: id,
                replaced: false,
                removed: false,
                wrapped: true,
            });
    }
}

/// One target method under transformation: the method tree, its computed
/// argument layout, and the shared rewrite bookkeeping.
#[derive(Debug)]
pub struct Target {
    /// Internal name of the class declaring the method.
    pub class_name: String,
    /// The method tree, owned for the duration of the rewrite.
    pub method: MethodNode,
    /// Argument types, in order.
    pub arg_types: Vec<JavaType>,
    /// Local slot of each argument, wide types accounted for.
    pub arg_indices: Vec<usize>,
    /// Return type.
    pub return_type: JavaType,
    /// Shared rewrite bookkeeping.
    pub nodes: InjectionNodes,
    original_max_stack: usize,
    original_max_locals: usize,
}

impl Target {
    /// Wrap a method for rewriting.
    pub fn new(class_name: impl Into<String>, method: MethodNode) -> Result<Self> {
        let desc = MethodDescriptor::parse(&method.desc)?;
        let start = usize::from(!method.is_static());
        let arg_indices = Self::arg_map(&desc.args, start);
        let original_max_stack = method.max_stack;
        let original_max_locals = method.max_locals;
        Ok(Self {
            class_name: class_name.into(),
            arg_types: desc.args,
            arg_indices,
            return_type: desc.ret,
            nodes: InjectionNodes::default(),
            original_max_stack,
            original_max_locals,
            method,
        })
    }

    fn arg_map(types: &[JavaType], start: usize) -> Vec<usize> {
        let mut indices = Vec::with_capacity(types.len());
        let mut slot = start;
        for ty in types {
            indices.push(slot);
            slot += ty.size();
        }
        indices
    }

    /// Compute a slot-per-argument array for arbitrary types.
    pub fn generate_arg_map(types: &[JavaType], start: usize) -> Vec<usize> {
        Self::arg_map(types, start)
    }

    /// `true` when the target method is static.
    pub fn is_static(&self) -> bool {
        self.method.is_static()
    }

    /// `true` when the target method is a constructor.
    pub fn is_ctor(&self) -> bool {
        self.method.is_ctor()
    }

    /// First local slot past `this` and the arguments.
    pub fn frame_size(&self) -> usize {
        usize::from(!self.is_static())
            + self.arg_types.iter().map(JavaType::size).sum::<usize>()
    }

    /// The return opcode this method uses.
    pub fn return_opcode(&self) -> Opcode {
        Opcode::return_for(&self.return_type)
    }

    /// Atomically advance `max_locals`, answering the first new slot.
    pub fn allocate_locals(&mut self, count: usize) -> usize {
        let first = self.method.max_locals;
        self.method.max_locals += count;
        first
    }

    /// Raise `max_stack` to at least `size` above the original value.
    pub fn add_to_stack(&mut self, size: usize) {
        self.method.max_stack = self.method.max_stack.max(self.original_max_stack + size);
    }

    /// Raise `max_locals` to at least `size` above the original value.
    pub fn add_to_locals(&mut self, size: usize) {
        self.method.max_locals = self
            .method
            .max_locals
            .max(self.original_max_locals + size);
    }

    /// The callback info class for this target's return shape.
    pub fn callback_info_class(&self) -> &'static str {
        if self.return_type == JavaType::Void {
            CALLBACK_INFO
        } else {
            CALLBACK_INFO_RETURNABLE
        }
    }

    /// Handler descriptor for a plain callback: the target arguments plus
    /// the callback info, returning void.
    pub fn simple_callback_descriptor(&self) -> String {
        self.callback_descriptor(&[])
    }

    /// Handler descriptor for a callback capturing the given local types.
    pub fn callback_descriptor(&self, captured: &[JavaType]) -> String {
        let mut desc = String::from("(");
        for arg in &self.arg_types {
            desc.push_str(&arg.descriptor());
        }
        desc.push('L');
        desc.push_str(self.callback_info_class());
        desc.push(';');
        for local in captured {
            desc.push_str(&local.descriptor());
        }
        desc.push_str(")V");
        desc
    }

    /// Walk forward from a `new` to the `invokespecial <init>` that
    /// initializes it.
    pub fn find_init_for(&self, new_insn: InsnId) -> Option<InsnId> {
        let Insn::Type { desc: new_type, .. } = self.method.instructions.get(new_insn) else {
            return None;
        };
        let new_type = new_type.clone();
        let start = self.method.instructions.index_of(new_insn)?;
        self.method
            .instructions
            .iter_insns()
            .skip(start + 1)
            .find(|(_, insn)| {
                matches!(
                    insn,
                    Insn::Method { op: Opcode::Invokespecial, owner, name, .. }
                        if *name == CTOR_NAME && *owner == new_type
                )
            })
            .map(|(id, _)| id)
    }

    /// For a constructor target, locate the delegate `super(...)`/`this(...)`
    /// call, skipping over inline constructions passed as its arguments.
    pub fn find_super_init(
        &self,
        cache: &mut MetaCache,
        source: &dyn ClassSource,
    ) -> Option<InsnId> {
        if !self.is_ctor() {
            return None;
        }
        let superclass = cache
            .for_name(&self.class_name, source)
            .and_then(|meta| meta.superclass.clone());

        let mut pending_news = 0usize;
        for (id, insn) in self.method.instructions.iter_insns() {
            match insn {
                Insn::Type {
                    op: Opcode::New,
                    desc,
                } if Some(desc.as_str()) == superclass.as_deref()
                    || *desc == self.class_name =>
                {
                    pending_news += 1;
                }
                Insn::Method {
                    op: Opcode::Invokespecial,
                    owner,
                    name,
                    ..
                } if name == CTOR_NAME
                    && (Some(owner.as_str()) == superclass.as_deref()
                        || *owner == self.class_name) =>
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

    /// Replace one instruction, rerouting later injectors to the champion.
    pub fn replace(&mut self, at: InsnId, insn: Insn) -> InsnId {
        let at = self.nodes.resolve(at);
        let champion = self.method.instructions.replace(at, insn);
        self.nodes.record_replace(at, champion);
        champion
    }

    /// Replace one instruction with a sequence; `champion_index` selects
    /// which new instruction stands in for the original.
    pub fn replace_with(
        &mut self,
        at: InsnId,
        insns: Vec<Insn>,
        champion_index: usize,
    ) -> Vec<InsnId> {
        let at = self.nodes.resolve(at);
        let ids = self.method.instructions.insert_all_before(at, insns);
        self.method.instructions.remove(at);
        let champion = ids
            .get(champion_index)
            .copied()
            .unwrap_or_else(|| *ids.last().expect("non-empty replacement"));
        self.nodes.record_replace(at, champion);
        ids
    }

    /// Wrap an instruction with sequences before and after it.
    pub fn wrap(&mut self, at: InsnId, before: Vec<Insn>, after: Vec<Insn>) {
        let at = self.nodes.resolve(at);
        self.method.instructions.insert_all_before(at, before);
        self.method.instructions.insert_all_after(at, after);
        self.nodes.record_wrapped(at);
    }

    /// Insert a sequence before an instruction.
    pub fn insert_before(&mut self, at: InsnId, insns: Vec<Insn>) -> Vec<InsnId> {
        let at = self.nodes.resolve(at);
        self.method.instructions.insert_all_before(at, insns)
    }

    /// Remove an instruction, recording the removal.
    pub fn remove(&mut self, at: InsnId) {
        let at = self.nodes.resolve(at);
        self.method.instructions.remove(at);
        self.nodes.record_removed(at);
    }

    /// Tear down into the rewritten method.
    pub fn into_method(self) -> MethodNode {
        self.method
    }

    /// Validate the monotonic-growth invariant; used by post-apply checks.
    pub fn check_bounds(&self) -> Result<()> {
        if self.method.max_stack < self.original_max_stack
            || self.method.max_locals < self.original_max_locals
        {
            return Err(MixinError::ApplicatorFailure {
                target: self.class_name.clone(),
                reason: format!(
                    "method {}{} shrank its frame bounds",
                    self.method.name, self.method.desc
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_tree::NullSource;
    use weave_types::Access;

    fn target_for(desc: &str, static_: bool) -> Target {
        let access = if static_ {
            Access::PUBLIC | Access::STATIC
        } else {
            Access::PUBLIC
        };
        let mut method = MethodNode::new(access, "work", desc);
        method.max_stack = 2;
        method.max_locals = 4;
        Target::new("a/Owner", method).expect("valid descriptor")
    }

    #[test]
    fn arg_indices_account_for_this_and_wide_types() {
        let target = target_for("(IDJ)V", false);
        assert_eq!(target.arg_indices, vec![1, 2, 4]);
        assert_eq!(target.frame_size(), 6);

        let static_target = target_for("(II)I", true);
        assert_eq!(static_target.arg_indices, vec![0, 1]);
        assert_eq!(static_target.return_opcode(), Opcode::Ireturn);
    }

    #[test]
    fn locals_allocation_is_monotonic() {
        let mut target = target_for("()V", true);
        let first = target.allocate_locals(2);
        assert_eq!(first, 4);
        assert_eq!(target.method.max_locals, 6);

        target.add_to_stack(3);
        assert_eq!(target.method.max_stack, 5);
        // A smaller request never shrinks the bound.
        target.add_to_stack(1);
        assert_eq!(target.method.max_stack, 5);
        assert!(target.check_bounds().is_ok());
    }

    #[test]
    fn callback_descriptor_shapes() {
        let void_target = target_for("(I)V", false);
        assert_eq!(
            void_target.simple_callback_descriptor(),
            "(ILweave/callback/CallbackInfo;)V"
        );

        let value_target = target_for("(I)I", false);
        assert_eq!(
            value_target.simple_callback_descriptor(),
            "(ILweave/callback/CallbackInfoReturnable;)V"
        );
        assert_eq!(
            value_target.callback_descriptor(&[JavaType::Int, JavaType::object()]),
            "(ILweave/callback/CallbackInfoReturnable;ILjava/lang/Object;)V"
        );
    }

    #[test]
    fn replacement_chains_compose() {
        let mut target = target_for("()V", true);
        let a = target.method.instructions.push(Insn::op(Opcode::Nop));
        target.method.instructions.push(Insn::op(Opcode::Return));

        let b = target.replace(a, Insn::op(Opcode::Iconst0));
        // A second injector still holding `a` is routed to `b`.
        let c = target.replace(a, Insn::op(Opcode::Iconst1));
        assert_eq!(target.nodes.resolve(a), c);
        assert_ne!(b, c);
        assert!(target.method.instructions.contains(c));
        assert!(!target.method.instructions.contains(b));
    }

    #[test]
    fn find_init_matches_new_type() {
        let mut target = target_for("()V", true);
        let new_id = target.method.instructions.push(Insn::Type {
            op: Opcode::New,
            desc: "a/Thing".into(),
        });
        target.method.instructions.push(Insn::op(Opcode::Dup));
        // An unrelated constructor call in between.
        target.method.instructions.push(Insn::invoke(
            Opcode::Invokespecial,
            "a/Other",
            "<init>",
            "()V",
        ));
        let init = target.method.instructions.push(Insn::invoke(
            Opcode::Invokespecial,
            "a/Thing",
            "<init>",
            "()V",
        ));

        assert_eq!(target.find_init_for(new_id), Some(init));
    }

    #[test]
    fn find_super_init_skips_inline_constructions() {
        let mut method = MethodNode::new(Access::PUBLIC, "<init>", "()V");
        method.instructions.push(Insn::var(Opcode::Aload, 0));
        // new Owner(...) passed as an argument to the delegate call.
        method.instructions.push(Insn::Type {
            op: Opcode::New,
            desc: "a/Owner".into(),
        });
        method.instructions.push(Insn::op(Opcode::Dup));
        method.instructions.push(Insn::invoke(
            Opcode::Invokespecial,
            "a/Owner",
            "<init>",
            "()V",
        ));
        let delegate = method.instructions.push(Insn::invoke(
            Opcode::Invokespecial,
            "a/Owner",
            "<init>",
            "(La/Owner;)V",
        ));
        method.instructions.push(Insn::op(Opcode::Return));

        let target = Target::new("a/Owner", method).expect("valid");
        let mut cache = MetaCache::new();
        assert_eq!(
            target.find_super_init(&mut cache, &NullSource),
            Some(delegate)
        );
    }
}
