//! The per-target orchestration context.

use std::collections::HashMap;

use tracing::debug;
use weave_tree::{ClassNode, ClassSource};

use crate::apply::{
    apply_class_mixin, apply_interface_mixin, ApplicatorContext, MergeState,
    MixinTargetContext,
};
use crate::audit::Audit;
use crate::error::{MixinError, Result};
use crate::inject::ArgsClassGenerator;
use crate::locals::GeneratedLvtCache;
use crate::meta::MetaCache;
use crate::options::EngineOptions;
use crate::remap::RefMap;

/// One target class mid-transformation: the class tree and the mixins
/// assigned to it in application order.
pub struct TargetClassContext {
    node: ClassNode,
    mixins: Vec<MixinTargetContext>,
    merge: MergeState,
}

impl TargetClassContext {
    /// Order the assigned mixins by priority (ascending, registration
    /// order preserved within one priority) and wrap the target tree.
    pub fn new(node: ClassNode, mut mixins: Vec<MixinTargetContext>) -> Self {
        mixins.sort_by_key(|mixin| mixin.meta.priority);
        Self {
            node,
            mixins,
            merge: MergeState::default(),
        }
    }

    /// Internal name of the target.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// The assigned mixins, in application order.
    pub fn mixins(&self) -> impl Iterator<Item = &MixinTargetContext> {
        self.mixins.iter()
    }

    /// Run the applicator for every assigned mixin, then the post-apply
    /// checks.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_all(
        &mut self,
        cache: &mut MetaCache,
        source: &dyn ClassSource,
        options: &EngineOptions,
        lvt: &mut GeneratedLvtCache,
        args: &mut ArgsClassGenerator,
        audit: &mut Audit,
        refmaps: &HashMap<String, RefMap>,
    ) -> Result<()> {
        let empty_refmap = RefMap::new();
        let is_interface = self.node.is_interface();

        for mixin in &mut self.mixins {
            // A failing mixin must not leave the target half-applied: take
            // a snapshot and restore it when the failure is one the session
            // can absorb.
            let snapshot = (self.node.clone(), self.merge.clone());
            let refmap = refmaps
                .get(&mixin.meta.config)
                .unwrap_or(&empty_refmap);
            let mut ctx = ApplicatorContext {
                cache,
                source,
                options,
                lvt,
                args,
                audit,
                refmap,
            };
            let applied = if is_interface {
                apply_interface_mixin(&mut self.node, mixin, &mut self.merge, &mut ctx)
            } else {
                apply_class_mixin(&mut self.node, mixin, &mut self.merge, &mut ctx)
            };
            if let Err(error) = applied {
                let absorbable = error.is_recoverable()
                    || (options.ignore_constraints
                        && matches!(error, MixinError::ConstraintViolation { .. }));
                if !absorbable {
                    return Err(error);
                }
                (self.node, self.merge) = snapshot;
                audit.warn(format!(
                    "mixin {} rolled back: {error}",
                    mixin.meta.name
                ));
            }
        }

        if options.checks_interfaces {
            self.check_interfaces(cache, source, options, audit)?;
        }
        if options.source_debug_extension && !self.mixins.is_empty() {
            let applied: Vec<&str> =
                self.mixins.iter().map(|m| m.meta.name.as_str()).collect();
            self.node.source_debug = Some(format!("Mixins: {}", applied.join(", ")));
        }
        Ok(())
    }

    /// Verify that every abstract method of every implemented interface
    /// has an implementation on the target.
    fn check_interfaces(
        &mut self,
        cache: &mut MetaCache,
        source: &dyn ClassSource,
        options: &EngineOptions,
        audit: &mut Audit,
    ) -> Result<()> {
        let interfaces = self.node.interfaces.clone();
        for itf in interfaces {
            let Some(meta) = cache.for_name(&itf, source) else {
                debug!(interface = itf, "interface unavailable, skipping check");
                continue;
            };
            let required: Vec<(String, String)> = meta
                .methods
                .iter()
                .filter(|member| member.access.is_abstract())
                .map(|member| (member.name.clone(), member.desc.clone()))
                .collect();
            for (name, desc) in required {
                if self.node.method(&name, &desc).is_none() {
                    let message = format!(
                        "{} does not implement {name}{desc} from {itf}",
                        self.node.name
                    );
                    if options.checks_interfaces_strict {
                        return Err(MixinError::ApplicatorFailure {
                            target: self.node.name.clone(),
                            reason: message,
                        });
                    }
                    audit.warn(message);
                }
            }
        }
        Ok(())
    }

    /// Tear down into the transformed tree.
    pub fn into_node(self) -> ClassNode {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MixinMeta;
    use weave_tree::NullSource;
    use weave_types::Visibility;

    fn mixin_ctx(name: &str, priority: i32) -> MixinTargetContext {
        let node = ClassNode::new(name);
        let target = ClassNode::new("a/Target");
        let mut cache = MetaCache::new();
        MixinTargetContext::prepare(
            MixinMeta {
                name: name.into(),
                priority,
                declared_targets: vec!["a/Target".into()],
                soft_targets: Vec::new(),
                compat_level: 6,
                visibility: Visibility::Package,
                interface_only: false,
                pseudo: false,
                config: "test".into(),
            },
            node,
            &target,
            &mut cache,
            &NullSource,
        )
        .expect("prepares")
    }

    #[test]
    fn mixins_apply_in_priority_order_stably() {
        let context = TargetClassContext::new(
            ClassNode::new("a/Target"),
            vec![
                mixin_ctx("a/Late", 2000),
                mixin_ctx("a/FirstDefault", 1000),
                mixin_ctx("a/Early", 500),
                mixin_ctx("a/SecondDefault", 1000),
            ],
        );
        let order: Vec<&str> = context.mixins().map(|m| m.meta.name.as_str()).collect();
        assert_eq!(
            order,
            vec!["a/Early", "a/FirstDefault", "a/SecondDefault", "a/Late"]
        );
    }
}
