//! The mixin transformer: the engine's "transform one class" entry point.

use std::collections::HashMap;

use tracing::{debug, error, warn};
use weave_tree::{ClassNode, ClassSource, TreeCodec};
use weave_types::internal_name;

use crate::annotations::{self, MixinAnnotation};
use crate::apply::{MixinTargetContext, TargetClassContext};
use crate::audit::Audit;
use crate::config::MixinConfig;
use crate::error::{MixinError, Result};
use crate::inject::ArgsClassGenerator;
use crate::locals::GeneratedLvtCache;
use crate::meta::MetaCache;
use crate::options::EngineOptions;
use crate::remap::RefMap;

/// Receives transformed class bytes when debug export is enabled.
pub trait ExportSink {
    /// Called with the binary class name and the emitted bytes.
    fn export(&mut self, binary_name: &str, bytes: &[u8]);
}

/// The engine context: every piece of session state, owned in one place
/// and threaded through the transformation explicitly. Hosts construct
/// one engine and call [`transform`](Self::transform) from one thread at
/// a time; tests construct a fresh engine per case.
pub struct MixinEngine {
    options: EngineOptions,
    cache: MetaCache,
    lvt: GeneratedLvtCache,
    args: ArgsClassGenerator,
    audit: Audit,
    pending: Vec<(MixinConfig, Option<RefMap>)>,
    refmaps: HashMap<String, RefMap>,
    mixin_trees: HashMap<String, ClassNode>,
    registration_order: Vec<String>,
    export: Option<Box<dyn ExportSink>>,
}

impl MixinEngine {
    /// An engine with no configs registered.
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            cache: MetaCache::new(),
            lvt: GeneratedLvtCache::default(),
            args: ArgsClassGenerator::default(),
            audit: Audit::default(),
            pending: Vec::new(),
            refmaps: HashMap::new(),
            mixin_trees: HashMap::new(),
            registration_order: Vec::new(),
            export: None,
        }
    }

    /// The engine options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Queue a configuration for processing at the next `transform` call.
    /// The pending set is append-only.
    pub fn add_config(&mut self, config: MixinConfig, refmap: Option<RefMap>) {
        self.pending.push((config, refmap));
    }

    /// Install the debug-export sink.
    pub fn set_export_sink(&mut self, sink: Box<dyn ExportSink>) {
        self.export = Some(sink);
    }

    /// Transform one class: resolve pending configurations, serve
    /// synthetic classes, and apply every assigned mixin to the target.
    /// Untargeted classes pass through byte-identical.
    #[tracing::instrument(name = "transform", skip(self, bytes, codec, source))]
    pub fn transform(
        &mut self,
        binary_name: &str,
        bytes: &[u8],
        codec: &dyn TreeCodec,
        source: &dyn ClassSource,
    ) -> Result<Vec<u8>> {
        self.process_pending(source)?;
        let name = internal_name(binary_name);

        if self.args.is_synthetic(&name) {
            let node = self.args.generate(&name)?;
            return Ok(codec.emit(&node)?);
        }

        let mut assigned: Vec<String> = self
            .cache
            .mixins_for(&name)
            .into_iter()
            .map(|meta| meta.name.clone())
            .collect();
        if assigned.is_empty() {
            return Ok(bytes.to_vec());
        }
        // Priority sorting happens in the target context; pre-sorting by
        // registration order here keeps equal priorities stable.
        assigned.sort_by_key(|mixin| {
            self.registration_order
                .iter()
                .position(|name| name == mixin)
                .unwrap_or(usize::MAX)
        });

        let node = codec.parse(&name, bytes)?;
        self.cache.from_class_node(&node);

        let mut contexts = Vec::new();
        for mixin_name in assigned {
            let Some(meta) = self.cache.mixin(&mixin_name).cloned() else {
                continue;
            };
            let Some(tree) = self.mixin_trees.get(&mixin_name).cloned() else {
                warn!(mixin = mixin_name, "mixin tree unavailable, skipping");
                continue;
            };
            match MixinTargetContext::prepare(meta, tree, &node, &mut self.cache, source) {
                Ok(context) => contexts.push(context),
                Err(err)
                    if err.is_recoverable()
                        || (self.options.ignore_constraints
                            && matches!(err, MixinError::ConstraintViolation { .. })) =>
                {
                    self.audit
                        .warn(format!("mixin {mixin_name} skipped: {err}"));
                }
                Err(err) => return Err(err),
            }
        }
        if contexts.is_empty() {
            return Ok(bytes.to_vec());
        }

        let mut context = TargetClassContext::new(node, contexts);
        let applied = context.apply_all(
            &mut self.cache,
            source,
            &self.options,
            &mut self.lvt,
            &mut self.args,
            &mut self.audit,
            &self.refmaps,
        );
        if let Err(err) = applied {
            error!(class = name, "mixin application failed: {err}");
            if self.options.dump_target_on_failure {
                if let (Some(sink), Ok(partial)) =
                    (self.export.as_mut(), codec.emit(&context.into_node()))
                {
                    sink.export(binary_name, &partial);
                }
            }
            return Err(err);
        }

        let node = context.into_node();
        let out = codec.emit(&node)?;
        if self.options.debug_export && self.options.export_matches(binary_name) {
            if let Some(sink) = self.export.as_mut() {
                sink.export(binary_name, &out);
            }
        }
        Ok(out)
    }

    /// Process every queued configuration: load and register its mixins
    /// against their declared targets.
    fn process_pending(&mut self, source: &dyn ClassSource) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        for (config, refmap) in pending {
            if let (Some(minimum), Some(declared)) =
                (self.options.compat_level, config.compatibility_level)
            {
                if declared > minimum {
                    let violation = MixinError::ConstraintViolation {
                        mixin: config.name.clone(),
                        constraint: format!(
                            "config requires compatibility level {declared}, host offers {minimum}"
                        ),
                    };
                    if config.required
                        && !self.options.ignore_required
                        && !self.options.ignore_constraints
                    {
                        return Err(violation);
                    }
                    self.audit.warn(violation.to_string());
                    continue;
                }
            }

            if let Some(refmap) = refmap {
                self.refmaps.insert(config.name.clone(), refmap);
            }

            for mixin_name in config.mixin_classes(self.options.side) {
                self.register_mixin(&config, &mixin_name, source)?;
            }
        }
        Ok(())
    }

    fn register_mixin(
        &mut self,
        config: &MixinConfig,
        mixin_name: &str,
        source: &dyn ClassSource,
    ) -> Result<()> {
        let Some(tree) = source.class_node(mixin_name) else {
            if config.required && !self.options.ignore_required {
                return Err(MixinError::ClassLoadFailure {
                    name: mixin_name.into(),
                });
            }
            self.audit
                .warn(format!("declared mixin {mixin_name} could not be loaded"));
            return Ok(());
        };
        let Some(annotation) = MixinAnnotation::parse(&tree) else {
            self.audit
                .warn(format!("{mixin_name} carries no mixin annotation"));
            return Ok(());
        };

        let pseudo = tree.annotation(annotations::PSEUDO).is_some();
        let meta = annotation.into_meta(
            mixin_name,
            &config.name,
            config.default_priority(),
            tree.is_interface(),
            pseudo,
        );

        for target in meta.targets() {
            if !self.cache.ensure(target, source) && !pseudo {
                let missing = MixinError::TargetNotFound {
                    mixin: mixin_name.into(),
                    target: target.into(),
                };
                if (config.required && !self.options.ignore_required)
                    || self.options.strict_targets()
                {
                    return Err(missing);
                }
                self.audit.warn(missing.to_string());
            }
        }

        self.cache.from_class_node(&tree);
        self.cache.register_mixin(meta);
        self.mixin_trees.insert(mixin_name.into(), tree);
        self.registration_order.push(mixin_name.into());
        debug!(mixin = mixin_name, config = config.name, "mixin registered");
        Ok(())
    }

    /// Render the session audit report: per-mixin application counts,
    /// per-injector match counts, and accumulated warnings.
    pub fn audit(&self) -> String {
        self.audit.render()
    }

    /// Direct access to the metadata cache, mainly for tests and tooling.
    pub fn cache(&self) -> &MetaCache {
        &self.cache
    }
}

impl core::fmt::Debug for MixinEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MixinEngine")
            .field("pending", &self.pending.len())
            .field("registered", &self.registration_order.len())
            .finish()
    }
}
