//! Injectors: strategies that rewrite a target method at resolved
//! injection points.

mod args;
mod callback;
mod modify_arg;
mod modify_args;
mod modify_variable;
mod redirect;

pub use args::{ArgsClassGenerator, SyntheticClassInfo, ARGS_BASE_CLASS};

use std::collections::HashMap;

use tracing::warn;
use weave_tree::{ClassSource, Insn, InsnId, MethodNode, Opcode};
use weave_types::JavaType;

use crate::error::{MixinError, Result};
use crate::locals::GeneratedLvtCache;
use crate::meta::MetaCache;
use crate::options::EngineOptions;
use crate::point::{AtCode, InjectionPoint, Slice};
use crate::selector::MemberSelector;
use crate::target::Target;

/// What kind of rewrite an injector performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectorKind {
    /// Install a callback (`inject`).
    Callback,
    /// Replace one argument of an invocation; `index` picks the argument,
    /// inferred from the handler signature when absent.
    ModifyArg {
        /// Explicit argument index.
        index: Option<usize>,
    },
    /// Bundle all arguments of an invocation for mutation.
    ModifyArgs,
    /// Redirect an invocation or field access to the handler.
    Redirect,
    /// Pass one local variable through the handler.
    ModifyVariable,
}

/// Local-capture policy for callback injectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalCapture {
    /// Do not capture locals.
    #[default]
    NoCapture,
    /// Print the expected signature and abort this injection.
    Print,
    /// Capture; on mismatch log a warning and skip the node.
    CaptureSoft,
    /// Capture; on mismatch fail fatally.
    CaptureHard,
    /// Capture; on mismatch generate a throwing stub and call it.
    CaptureStub,
}

impl LocalCapture {
    /// `true` for the capturing policies.
    pub fn captures(self) -> bool {
        matches!(
            self,
            LocalCapture::CaptureSoft | LocalCapture::CaptureHard | LocalCapture::CaptureStub
        )
    }
}

/// Discriminator selecting the target slot of a modify-variable handler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalVariableDiscriminator {
    /// Print the candidate table instead of injecting.
    pub print: bool,
    /// Only consider argument slots.
    pub args_only: bool,
    /// Pick the nth type-matched candidate.
    pub ordinal: Option<usize>,
    /// Pick an explicit slot.
    pub index: Option<usize>,
    /// Pick by declared variable name.
    pub names: Vec<String>,
}

/// An injector bound to one annotated mixin handler method.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionInfo {
    /// The rewrite category.
    pub kind: InjectorKind,
    /// Internal name of the declaring mixin.
    pub mixin: String,
    /// Handler method name as merged into the target class.
    pub handler_name: String,
    /// Handler method descriptor.
    pub handler_desc: String,
    /// `true` when the handler is static.
    pub handler_static: bool,
    /// Selectors for the target methods.
    pub targets: Vec<MemberSelector>,
    /// Injection points to resolve per target method.
    pub points: Vec<InjectionPoint>,
    /// Named slices available to the points.
    pub slices: HashMap<String, Slice>,
    /// Whether the callback may cancel the target.
    pub cancellable: bool,
    /// Local-capture policy.
    pub locals: LocalCapture,
    /// Modify-variable discriminator.
    pub discriminator: LocalVariableDiscriminator,
    /// Author-facing identifier.
    pub id: Option<String>,
    /// Minimum matches, fatal when unmet.
    pub require: Option<usize>,
    /// Expected matches, a warning when unmet.
    pub expect: usize,
    /// Maximum matches, fatal when exceeded.
    pub allow: Option<usize>,
}

impl InjectionInfo {
    /// A minimal callback info, used by tests and builders.
    pub fn callback(mixin: &str, handler_name: &str, handler_desc: &str) -> Self {
        Self {
            kind: InjectorKind::Callback,
            mixin: mixin.into(),
            handler_name: handler_name.into(),
            handler_desc: handler_desc.into(),
            handler_static: false,
            targets: Vec::new(),
            points: Vec::new(),
            slices: HashMap::new(),
            cancellable: false,
            locals: LocalCapture::NoCapture,
            discriminator: LocalVariableDiscriminator::default(),
            id: None,
            require: None,
            expect: 0,
            allow: None,
        }
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> MixinError {
        MixinError::InvalidInjection {
            mixin: self.mixin.clone(),
            handler: self.handler_name.clone(),
            reason: reason.into(),
        }
    }
}

/// Shared state handed to every injector invocation.
pub struct InjectorContext<'a> {
    /// The metadata cache.
    pub cache: &'a mut MetaCache,
    /// The class provider.
    pub source: &'a dyn ClassSource,
    /// Engine options.
    pub options: &'a EngineOptions,
    /// Generated-LVT cache shared across injectors.
    pub lvt: &'a mut GeneratedLvtCache,
    /// The argument-bundle class registry.
    pub args: &'a mut ArgsClassGenerator,
}

/// Result of applying one injector to one target method.
#[derive(Debug, Default)]
pub struct InjectOutcome {
    /// Number of nodes rewritten.
    pub matched: usize,
    /// Support methods generated along the way (error stubs), to be
    /// appended to the target class.
    pub generated: Vec<MethodNode>,
}

/// Apply one injector to one target method: resolve every injection
/// point, then rewrite each resolved node.
pub fn inject(
    info: &InjectionInfo,
    target: &mut Target,
    ctx: &mut InjectorContext<'_>,
) -> Result<InjectOutcome> {
    precheck(info, target)?;

    let mut nodes: Vec<InsnId> = Vec::new();
    for point in &info.points {
        let found = point
            .find(target, &info.slices)
            .map_err(|err| info.invalid(err.to_string()))?;
        for id in found {
            if !nodes.contains(&id) {
                nodes.push(id);
            }
        }
    }

    let mut outcome = InjectOutcome::default();
    for node in nodes {
        let node = target.nodes.resolve(node);
        if target.nodes.is_removed(node) {
            warn!(
                handler = info.handler_name,
                "skipping node removed by an earlier injector"
            );
            continue;
        }
        let applied = match &info.kind {
            InjectorKind::Callback => callback::apply(info, target, node, ctx)?,
            InjectorKind::ModifyArg { index } => {
                modify_arg::apply(info, target, node, *index)?
            }
            InjectorKind::ModifyArgs => modify_args::apply(info, target, node, ctx)?,
            InjectorKind::Redirect => redirect::apply(info, target, node)?,
            InjectorKind::ModifyVariable => {
                modify_variable::apply(info, target, node, ctx)?
            }
        };
        match applied {
            Applied::Yes => outcome.matched += 1,
            Applied::Stub(stub) => {
                outcome.matched += 1;
                outcome.generated.push(stub);
            }
            Applied::Skipped => {}
        }
    }

    enforce_counts(info, outcome.matched, ctx.options)?;
    Ok(outcome)
}

/// Per-node application result.
pub(crate) enum Applied {
    /// The node was rewritten.
    Yes,
    /// The node was rewritten to call a generated stub.
    Stub(MethodNode),
    /// The node was skipped under a soft policy.
    Skipped,
}

fn precheck(info: &InjectionInfo, target: &Target) -> Result<()> {
    if target.is_static() && !info.handler_static {
        return Err(info.invalid("instance handler cannot attach to a static target"));
    }
    if target.is_ctor() && !points_are_return_only(&info.points) {
        return Err(info.invalid("constructors only accept RETURN injection points"));
    }
    Ok(())
}

fn points_are_return_only(points: &[InjectionPoint]) -> bool {
    points.iter().all(point_is_return_only)
}

fn point_is_return_only(point: &InjectionPoint) -> bool {
    match point {
        InjectionPoint::At(at) => matches!(at.code, AtCode::Return | AtCode::Tail),
        InjectionPoint::Union(inner) | InjectionPoint::Intersection(inner) => {
            inner.iter().all(point_is_return_only)
        }
        InjectionPoint::Shift(inner, _) => point_is_return_only(inner),
    }
}

fn enforce_counts(info: &InjectionInfo, matched: usize, options: &EngineOptions) -> Result<()> {
    if let Some(require) = info.require {
        if matched < require {
            return Err(MixinError::InjectionNotMatched {
                handler: info.handler_name.clone(),
                required: require,
                matched,
            });
        }
    }
    if let Some(allow) = info.allow {
        if matched > allow {
            return Err(info.invalid(format!(
                "matched {matched} node(s), more than allowed {allow}"
            )));
        }
    }
    if matched < info.expect {
        if options.debug_count_injections {
            return Err(MixinError::InjectionNotMatched {
                handler: info.handler_name.clone(),
                required: info.expect,
                matched,
            });
        }
        warn!(
            handler = info.handler_name,
            expected = info.expect,
            matched,
            "injector matched fewer nodes than expected"
        );
    }
    Ok(())
}

/// Store the given stack values (deepest first in `args`) into freshly
/// allocated locals, answering the store sequence and the slot per value.
pub(crate) fn store_args(target: &mut Target, args: &[JavaType]) -> (Vec<Insn>, Vec<usize>) {
    let slots: Vec<usize> = args
        .iter()
        .map(|ty| target.allocate_locals(ty.size()))
        .collect();
    let insns = args
        .iter()
        .zip(&slots)
        .rev()
        .map(|(ty, slot)| Insn::var(Opcode::store_for(ty), *slot))
        .collect();
    (insns, slots)
}

/// Load a contiguous range of previously stored values back to the stack.
pub(crate) fn load_args(
    args: &[JavaType],
    slots: &[usize],
    range: core::ops::Range<usize>,
) -> Vec<Insn> {
    range
        .map(|index| Insn::var(Opcode::load_for(&args[index]), slots[index]))
        .collect()
}

/// The opcode for invoking a merged handler: merged handlers are private,
/// so instance handlers use `invokespecial`.
pub(crate) fn handler_invoke(info: &InjectionInfo, target: &Target) -> Insn {
    let op = if info.handler_static {
        Opcode::Invokestatic
    } else {
        Opcode::Invokespecial
    };
    Insn::invoke(op, target.class_name.clone(), info.handler_name.clone(), info.handler_desc.clone())
}
