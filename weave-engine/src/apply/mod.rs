//! Mixin application: merging one mixin into one target class, and the
//! per-target orchestration across all assigned mixins.

mod class;
mod context;
mod interface;

pub use class::apply_class_mixin;
pub use context::TargetClassContext;
pub use interface::apply_interface_mixin;

use std::collections::{HashMap, HashSet};

use weave_tree::{ClassNode, ClassSource, Insn, LabelId, MethodNode};
use weave_types::OBJECT_INTERNAL_NAME;

use crate::annotations::{self, MemberDecorations, SHADOW_PREFIX};
use crate::audit::Audit;
use crate::error::{MixinError, Result};
use crate::inject::ArgsClassGenerator;
use crate::locals::GeneratedLvtCache;
use crate::meta::{MetaCache, Traversal};
use crate::options::EngineOptions;
use crate::remap::RefMap;

/// Engine collaborators threaded through one application run.
pub struct ApplicatorContext<'a> {
    /// The metadata cache.
    pub cache: &'a mut MetaCache,
    /// The class provider.
    pub source: &'a dyn ClassSource,
    /// Engine options.
    pub options: &'a EngineOptions,
    /// Generated-LVT cache.
    pub lvt: &'a mut GeneratedLvtCache,
    /// Argument-bundle registry.
    pub args: &'a mut ArgsClassGenerator,
    /// Session statistics.
    pub audit: &'a mut Audit,
    /// Refmap of the mixin's config.
    pub refmap: &'a RefMap,
}

/// Who merged a member, at what priority, and whether it is sealed.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedBy {
    /// Internal name of the merging mixin.
    pub mixin: String,
    /// That mixin's priority.
    pub priority: i32,
    /// Decorated final: replacement by later mixins is forbidden.
    pub is_final: bool,
}

/// Which applicator variant is running the method-merge pass. Both
/// variants share the full merge rules; interface targets additionally
/// reject injector-annotated methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeStyle {
    /// Class targets: handlers are merged and injected.
    Class,
    /// Interface targets: handlers are an error.
    Interface,
}

/// Cross-mixin merge bookkeeping for one target class.
#[derive(Debug, Default, Clone)]
pub struct MergeState {
    members: HashMap<String, MergedBy>,
    unique_counter: usize,
}

impl MergeState {
    /// Record a merged member under its `name + desc` key.
    pub fn record(&mut self, key: String, by: MergedBy) {
        self.members.insert(key, by);
    }

    /// Who merged `key`, if anyone did during this session.
    pub fn merged_by(&self, key: &str) -> Option<&MergedBy> {
        self.members.get(key)
    }

    /// A fresh suffix for unique-member renaming.
    pub fn next_unique_suffix(&mut self) -> usize {
        self.unique_counter += 1;
        self.unique_counter
    }
}

/// One mixin prepared for application to one target: metadata, the mixin
/// tree, and the member rename table (shadow prefixes, soft-implements
/// prefixes, unique renames added during merging).
#[derive(Debug)]
pub struct MixinTargetContext {
    /// Mixin metadata.
    pub meta: crate::meta::MixinMeta,
    /// The mixin's class tree.
    pub node: ClassNode,
    /// Member renames applied while retargeting bodies.
    pub renames: HashMap<String, String>,
    /// Shadow fields decorated final (and not mutable).
    pub final_shadows: HashSet<String>,
}

impl MixinTargetContext {
    /// Validate applicability and pre-process the mixin tree: strip shadow
    /// prefixes and resolve soft-implements prefixes.
    pub fn prepare(
        meta: crate::meta::MixinMeta,
        mut node: ClassNode,
        target: &ClassNode,
        cache: &mut MetaCache,
        source: &dyn ClassSource,
    ) -> Result<Self> {
        if meta.interface_only && !target.is_interface() {
            return Err(MixinError::ConstraintViolation {
                mixin: meta.name.clone(),
                constraint: format!(
                    "interface mixin cannot target class {}",
                    target.name
                ),
            });
        }

        // The target must satisfy the mixin's superclass requirement.
        if !meta.pseudo {
            if let Some(required) = node.super_name.as_deref() {
                if required != OBJECT_INTERNAL_NAME
                    && target.name != required
                    && !cache.has_super(&target.name, required, Traversal::All, source)
                {
                    return Err(MixinError::ConstraintViolation {
                        mixin: meta.name.clone(),
                        constraint: format!(
                            "target {} does not extend required superclass {required}",
                            target.name
                        ),
                    });
                }
            }
        }

        let mut renames = HashMap::new();
        let mut final_shadows = HashSet::new();

        // Shadow prefix stripping.
        for field in &mut node.fields {
            let decorations = MemberDecorations::parse(&field.annotations, &field.name);
            if decorations.shadow {
                if let Some(stripped) = field.name.strip_prefix(SHADOW_PREFIX) {
                    renames.insert(field.name.clone(), stripped.to_string());
                    field.name = stripped.to_string();
                }
                if decorations.is_final && !decorations.mutable {
                    final_shadows.insert(field.name.clone());
                }
            }
        }
        for method in &mut node.methods {
            let decorations = MemberDecorations::parse(&method.annotations, &method.name);
            if decorations.shadow {
                if let Some(stripped) = method.name.strip_prefix(SHADOW_PREFIX) {
                    renames.insert(method.name.clone(), stripped.to_string());
                    method.name = stripped.to_string();
                }
            }
        }

        // Soft implements: add the interface, strip member prefixes.
        for soft in annotations::soft_implements(&node) {
            node.add_interface(&soft.iface);
            if soft.prefix.is_empty() {
                continue;
            }
            for method in &mut node.methods {
                if let Some(stripped) = method.name.strip_prefix(&soft.prefix) {
                    renames.insert(method.name.clone(), stripped.to_string());
                    method.name = stripped.to_string();
                }
            }
        }

        Ok(Self {
            meta,
            node,
            renames,
            final_shadows,
        })
    }
}

/// Rewrite a member descriptor so references to the mixin type point at
/// the target type.
pub(crate) fn retarget_desc(desc: &str, mixin: &str, target: &str) -> String {
    desc.replace(&format!("L{mixin};"), &format!("L{target};"))
}

/// Rewrite one instruction for its new home class.
pub(crate) fn retarget_insn(
    insn: &mut Insn,
    mixin: &str,
    target: &str,
    renames: &HashMap<String, String>,
) {
    match insn {
        Insn::Field {
            owner, name, desc, ..
        }
        | Insn::Method {
            owner, name, desc, ..
        } => {
            if owner == mixin || owner == target {
                if let Some(renamed) = renames.get(name) {
                    *name = renamed.clone();
                }
            }
            if owner == mixin {
                *owner = target.into();
            }
            *desc = retarget_desc(desc, mixin, target);
        }
        Insn::Type { desc, .. } => {
            if desc == mixin {
                *desc = target.into();
            } else {
                *desc = retarget_desc(desc, mixin, target);
            }
        }
        Insn::InvokeDynamic { desc, .. } => {
            *desc = retarget_desc(desc, mixin, target);
        }
        _ => {}
    }
}

/// Rewrite a merged method body for its new home: owner references to the
/// mixin become the target, renamed members are followed, and type
/// references to the mixin are replaced.
pub(crate) fn retarget_method(
    method: &mut MethodNode,
    mixin: &str,
    target: &str,
    renames: &HashMap<String, String>,
) {
    method.desc = retarget_desc(&method.desc, mixin, target);

    let ids: Vec<_> = method.instructions.iter().collect();
    for id in ids {
        retarget_insn(method.instructions.get_mut(id), mixin, target, renames);
    }

    for local in &mut method.local_variables {
        local.desc = retarget_desc(&local.desc, mixin, target);
    }
}

/// Clone an instruction sequence into another method, remapping labels so
/// they cannot collide with the host method's label space.
pub(crate) fn clone_with_fresh_labels(
    insns: &[Insn],
    host: &mut MethodNode,
) -> Vec<Insn> {
    let mut mapping: HashMap<LabelId, LabelId> = HashMap::new();
    let mut remap = |label: LabelId, host: &mut MethodNode| -> LabelId {
        *mapping.entry(label).or_insert_with(|| host.new_label())
    };

    insns
        .iter()
        .cloned()
        .map(|insn| match insn {
            Insn::Label(label) => Insn::Label(remap(label, host)),
            Insn::Jump { op, label } => Insn::Jump {
                op,
                label: remap(label, host),
            },
            Insn::LineNumber { line, start } => Insn::LineNumber {
                line,
                start: remap(start, host),
            },
            Insn::Switch {
                keys,
                labels,
                default,
            } => {
                let labels = labels
                    .into_iter()
                    .map(|label| remap(label, host))
                    .collect();
                Insn::Switch {
                    keys,
                    labels,
                    default: remap(default, host),
                }
            }
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_tree::Opcode;
    use weave_types::Access;

    #[test]
    fn retarget_rewrites_owner_and_desc() {
        let mut method = MethodNode::new(Access::PRIVATE, "helper", "(La/MixinTarget;)V");
        method.instructions.extend(vec![
            Insn::var(Opcode::Aload, 0),
            Insn::field(Opcode::Getfield, "a/MixinTarget", "shadow$count", "I"),
            Insn::invoke(Opcode::Invokespecial, "a/MixinTarget", "helper", "(La/MixinTarget;)V"),
            Insn::op(Opcode::Return),
        ]);
        let renames: HashMap<String, String> =
            [("shadow$count".to_string(), "count".to_string())].into();

        retarget_method(&mut method, "a/MixinTarget", "a/Target", &renames);
        assert_eq!(method.desc, "(La/Target;)V");
        assert!(method.instructions.iter_insns().any(|(_, insn)| matches!(
            insn,
            Insn::Field { owner, name, .. } if owner == "a/Target" && name == "count"
        )));
        assert!(method.instructions.iter_insns().any(|(_, insn)| matches!(
            insn,
            Insn::Method { owner, desc, .. } if owner == "a/Target" && desc == "(La/Target;)V"
        )));
    }

    #[test]
    fn fresh_labels_avoid_collisions() {
        let mut host = MethodNode::new(Access::PUBLIC, "ctor", "()V");
        let host_label = host.new_label();

        let donor_label = LabelId(0);
        let seq = vec![
            Insn::Label(donor_label),
            Insn::Jump {
                op: Opcode::Goto,
                label: donor_label,
            },
        ];
        let cloned = clone_with_fresh_labels(&seq, &mut host);
        match (&cloned[0], &cloned[1]) {
            (Insn::Label(a), Insn::Jump { label: b, .. }) => {
                assert_eq!(a, b, "internal consistency preserved");
                assert_ne!(*a, host_label, "no collision with host labels");
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }
}
