//! Typed views over the structured annotation records the host parses out
//! of mixin class files. The engine never touches annotation bytes; it
//! interprets `AnnotationNode` data by well-known type descriptors.

use std::collections::HashMap;
use std::str::FromStr;

use weave_tree::{AnnotationNode, AnnotationValue, ClassNode, MethodNode, Opcode};
use weave_types::internal_name;

use crate::error::{MixinError, Result};
use crate::inject::{
    InjectionInfo, InjectorKind, LocalCapture, LocalVariableDiscriminator,
};
use crate::meta::MixinMeta;
use crate::point::{AtCode, AtPoint, InjectionPoint, Shift, Slice};
use crate::remap::RefMap;
use crate::selector::MemberSelector;

/// Descriptor of the mixin marker annotation.
pub const MIXIN: &str = "Lweave/annotation/Mixin;";
/// Descriptor of the shadow-member annotation.
pub const SHADOW: &str = "Lweave/annotation/Shadow;";
/// Descriptor of the overwrite annotation.
pub const OVERWRITE: &str = "Lweave/annotation/Overwrite;";
/// Descriptor of the unique-member annotation.
pub const UNIQUE: &str = "Lweave/annotation/Unique;";
/// Descriptor of the final decoration.
pub const FINAL: &str = "Lweave/annotation/Final;";
/// Descriptor of the mutable decoration.
pub const MUTABLE: &str = "Lweave/annotation/Mutable;";
/// Descriptor of the intrinsic annotation.
pub const INTRINSIC: &str = "Lweave/annotation/Intrinsic;";
/// Descriptor of the accessor-generation annotation.
pub const ACCESSOR: &str = "Lweave/annotation/Accessor;";
/// Descriptor of the invoker-generation annotation.
pub const INVOKER: &str = "Lweave/annotation/Invoker;";
/// Descriptor of the soft-implements annotation.
pub const IMPLEMENTS: &str = "Lweave/annotation/Implements;";
/// Descriptor of the pseudo-mixin marker.
pub const PSEUDO: &str = "Lweave/annotation/Pseudo;";
/// Descriptor of the callback-injector annotation.
pub const INJECT: &str = "Lweave/annotation/Inject;";
/// Descriptor of the modify-arg injector annotation.
pub const MODIFY_ARG: &str = "Lweave/annotation/ModifyArg;";
/// Descriptor of the modify-args injector annotation.
pub const MODIFY_ARGS: &str = "Lweave/annotation/ModifyArgs;";
/// Descriptor of the redirect injector annotation.
pub const REDIRECT: &str = "Lweave/annotation/Redirect;";
/// Descriptor of the modify-variable injector annotation.
pub const MODIFY_VARIABLE: &str = "Lweave/annotation/ModifyVariable;";
/// Descriptor of the injection-point sub-annotation.
pub const AT: &str = "Lweave/annotation/At;";
/// Descriptor of the slice sub-annotation.
pub const SLICE: &str = "Lweave/annotation/Slice;";

/// Prefix stripped from shadow members when resolving against the target.
pub const SHADOW_PREFIX: &str = "shadow$";

/// Resolves author-facing references through the refmap before parsing.
pub struct ReferenceResolver<'a> {
    /// The refmap of the declaring config.
    pub refmap: &'a RefMap,
    /// Internal name of the mixin class scoping lookups.
    pub class: &'a str,
    /// Environment override, when configured.
    pub environment: Option<&'a str>,
    /// `true` bypasses the refmap entirely.
    pub disabled: bool,
}

impl ReferenceResolver<'_> {
    /// Resolve one reference string.
    pub fn resolve<'r>(&'r self, reference: &'r str) -> &'r str {
        if self.disabled {
            return reference;
        }
        match self.environment {
            Some(env) => self
                .refmap
                .remap_using_env(env, Some(self.class), reference),
            None => self.refmap.remap(Some(self.class), reference),
        }
    }
}

/// Parsed `@Mixin` data.
#[derive(Debug, Clone, PartialEq)]
pub struct MixinAnnotation {
    /// Hard targets, by internal name.
    pub targets: Vec<String>,
    /// Soft targets, resolved from strings.
    pub soft_targets: Vec<String>,
    /// Declared priority, when present.
    pub priority: Option<i32>,
}

impl MixinAnnotation {
    /// Read the `@Mixin` annotation off a class, if present.
    pub fn parse(node: &ClassNode) -> Option<Self> {
        let annotation = node.annotation(MIXIN)?;
        let targets = annotation
            .get("value")
            .map(|value| {
                value
                    .as_array()
                    .iter()
                    .filter_map(|v| v.as_class().map(Into::into))
                    .collect()
            })
            .unwrap_or_default();
        let soft_targets = annotation
            .get("targets")
            .map(|value| {
                value
                    .as_array()
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(internal_name)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            targets,
            soft_targets,
            priority: annotation.get_int("priority"),
        })
    }

    /// Promote to a [`MixinMeta`], filling config-derived defaults.
    pub fn into_meta(
        self,
        name: &str,
        config: &str,
        default_priority: i32,
        interface_only: bool,
        pseudo: bool,
    ) -> MixinMeta {
        MixinMeta {
            name: name.into(),
            priority: self.priority.unwrap_or(default_priority),
            declared_targets: self.targets,
            soft_targets: self.soft_targets,
            compat_level: 6,
            visibility: weave_types::Visibility::Package,
            interface_only,
            pseudo,
            config: config.into(),
        }
    }
}

/// Engine-relevant decorations of one mixin member.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberDecorations {
    /// `@Shadow`: resolves against the target, never merged.
    pub shadow: bool,
    /// `@Overwrite`: replaces the target method wholesale.
    pub overwrite: bool,
    /// `@Unique`: must not collide.
    pub unique: bool,
    /// `@Final`: replacement forbidden / writes checked.
    pub is_final: bool,
    /// `@Mutable`: lifts the final write check.
    pub mutable: bool,
    /// `@Intrinsic`, with its `displace` element.
    pub intrinsic: Option<bool>,
    /// `@Accessor` with the explicit or inferred field name.
    pub accessor: Option<String>,
    /// `@Invoker` with the explicit or inferred method name.
    pub invoker: Option<String>,
}

impl MemberDecorations {
    /// Collect decorations from a member's annotation list. `member_name`
    /// feeds accessor/invoker name inference.
    pub fn parse(annotations: &[AnnotationNode], member_name: &str) -> Self {
        let mut decorations = Self::default();
        for annotation in annotations {
            match annotation.desc.as_str() {
                SHADOW => decorations.shadow = true,
                OVERWRITE => decorations.overwrite = true,
                UNIQUE => decorations.unique = true,
                FINAL => decorations.is_final = true,
                MUTABLE => decorations.mutable = true,
                INTRINSIC => {
                    decorations.intrinsic =
                        Some(annotation.get_bool("displace").unwrap_or(false));
                }
                ACCESSOR => {
                    decorations.accessor = Some(
                        annotation
                            .get_str("value")
                            .map(Into::into)
                            .unwrap_or_else(|| infer_accessor_name(member_name)),
                    );
                }
                INVOKER => {
                    decorations.invoker = Some(
                        annotation
                            .get_str("value")
                            .map(Into::into)
                            .unwrap_or_else(|| infer_invoker_name(member_name)),
                    );
                }
                _ => {}
            }
        }
        decorations
    }
}

/// `getFoo`/`setFoo`/`isFoo` → `foo`; anything else passes through.
fn infer_accessor_name(method_name: &str) -> String {
    for prefix in ["get", "set", "is"] {
        if let Some(rest) = method_name.strip_prefix(prefix) {
            let mut chars = rest.chars();
            if let Some(first) = chars.next() {
                if first.is_uppercase() {
                    return first.to_lowercase().chain(chars).collect();
                }
            }
        }
    }
    method_name.into()
}

/// `callFoo`/`invokeFoo`/`newFoo` → `foo`; anything else passes through.
fn infer_invoker_name(method_name: &str) -> String {
    for prefix in ["call", "invoke", "new", "create"] {
        if let Some(rest) = method_name.strip_prefix(prefix) {
            let mut chars = rest.chars();
            if let Some(first) = chars.next() {
                if first.is_uppercase() {
                    return first.to_lowercase().chain(chars).collect();
                }
            }
        }
    }
    method_name.into()
}

/// A soft-implements declaration: interface plus member prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftImplements {
    /// Internal name of the interface.
    pub iface: String,
    /// Prefix marking the implementing methods.
    pub prefix: String,
}

/// Read `@Implements` declarations off a mixin class.
pub fn soft_implements(node: &ClassNode) -> Vec<SoftImplements> {
    let Some(annotation) = node.annotation(IMPLEMENTS) else {
        return Vec::new();
    };
    annotation
        .get("value")
        .map(|value| {
            value
                .as_array()
                .iter()
                .filter_map(|v| v.as_annotation())
                .filter_map(|nested| {
                    Some(SoftImplements {
                        iface: nested.get("iface")?.as_class()?.into(),
                        prefix: nested.get_str("prefix").unwrap_or_default().into(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse an injector annotation off a merged handler method, answering
/// `None` for plain methods.
pub fn parse_injector(
    mixin: &str,
    method: &MethodNode,
    resolver: &ReferenceResolver<'_>,
) -> Result<Option<InjectionInfo>> {
    let mut found = None;
    for annotation in &method.annotations {
        let kind = match annotation.desc.as_str() {
            INJECT => InjectorKind::Callback,
            MODIFY_ARG => InjectorKind::ModifyArg {
                index: annotation
                    .get_int("index")
                    .and_then(|index| usize::try_from(index).ok()),
            },
            MODIFY_ARGS => InjectorKind::ModifyArgs,
            REDIRECT => InjectorKind::Redirect,
            MODIFY_VARIABLE => InjectorKind::ModifyVariable,
            _ => continue,
        };
        found = Some((annotation, kind));
        break;
    }
    let Some((annotation, kind)) = found else {
        return Ok(None);
    };

    let invalid = |reason: String| MixinError::InvalidInjection {
        mixin: mixin.into(),
        handler: method.name.clone(),
        reason,
    };

    let targets: Vec<MemberSelector> = annotation
        .get("method")
        .map(|value| {
            value
                .as_array()
                .iter()
                .filter_map(|v| v.as_str())
                .map(|reference| MemberSelector::parse(resolver.resolve(reference)))
                .collect()
        })
        .unwrap_or_default();
    if targets.is_empty() {
        return Err(invalid("injector declares no target method".into()));
    }
    for target in &targets {
        target.validate()?;
    }

    let mut points = Vec::new();
    if let Some(value) = annotation.get("at") {
        for at in value.as_array() {
            let nested = at
                .as_annotation()
                .ok_or_else(|| invalid("at element must be an annotation".into()))?;
            points.push(parse_at(mixin, &method.name, nested, resolver)?);
        }
    }
    if points.is_empty() {
        return Err(invalid("injector declares no injection point".into()));
    }

    let mut slices = HashMap::new();
    if let Some(value) = annotation.get("slice") {
        for slice in value.as_array() {
            let nested = slice
                .as_annotation()
                .ok_or_else(|| invalid("slice element must be an annotation".into()))?;
            let parsed = parse_slice(mixin, &method.name, nested, resolver)?;
            slices.insert(parsed.id.clone(), parsed);
        }
    }

    let locals = match annotation.get("locals").and_then(AnnotationValue::as_enum) {
        None | Some("NO_CAPTURE") => LocalCapture::NoCapture,
        Some("PRINT") => LocalCapture::Print,
        Some("CAPTURE_FAILSOFT") => LocalCapture::CaptureSoft,
        Some("CAPTURE_FAILHARD") => LocalCapture::CaptureHard,
        Some("CAPTURE_FAILEXCEPTION") => LocalCapture::CaptureStub,
        Some(other) => {
            return Err(invalid(format!("unknown locals capture mode {other:?}")))
        }
    };

    let discriminator = LocalVariableDiscriminator {
        print: annotation.get_bool("print").unwrap_or(false),
        args_only: annotation.get_bool("argsOnly").unwrap_or(false),
        ordinal: annotation
            .get_int("ordinal")
            .and_then(|ordinal| usize::try_from(ordinal).ok()),
        index: annotation
            .get_int("index")
            .filter(|_| kind == InjectorKind::ModifyVariable)
            .and_then(|index| usize::try_from(index).ok()),
        names: annotation
            .get("name")
            .map(|value| {
                value
                    .as_array()
                    .iter()
                    .filter_map(|v| v.as_str().map(Into::into))
                    .collect()
            })
            .unwrap_or_default(),
    };

    Ok(Some(InjectionInfo {
        kind,
        mixin: mixin.into(),
        handler_name: method.name.clone(),
        handler_desc: method.desc.clone(),
        handler_static: method.is_static(),
        targets,
        points,
        slices,
        cancellable: annotation.get_bool("cancellable").unwrap_or(false),
        locals,
        discriminator,
        id: annotation.get_str("id").map(Into::into),
        require: annotation
            .get_int("require")
            .and_then(|n| usize::try_from(n).ok()),
        expect: annotation
            .get_int("expect")
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0),
        allow: annotation
            .get_int("allow")
            .and_then(|n| usize::try_from(n).ok()),
    }))
}

/// Parse one `@At` sub-annotation.
pub fn parse_at(
    mixin: &str,
    handler: &str,
    annotation: &AnnotationNode,
    resolver: &ReferenceResolver<'_>,
) -> Result<InjectionPoint> {
    let invalid = |reason: String| MixinError::InvalidInjection {
        mixin: mixin.into(),
        handler: handler.into(),
        reason,
    };

    let code_text = annotation
        .get_str("value")
        .ok_or_else(|| invalid("@At requires a value".into()))?;
    let code = AtCode::from_str(code_text)
        .map_err(|_| invalid(format!("unknown injection point {code_text:?}")))?;

    let selector = annotation
        .get_str("target")
        .map(|reference| MemberSelector::parse(resolver.resolve(reference)));
    if let Some(selector) = &selector {
        selector.validate()?;
    }

    let opcode = match annotation.get_int("opcode") {
        Some(value) => Some(
            u8::try_from(value)
                .ok()
                .and_then(Opcode::from_repr)
                .ok_or_else(|| invalid(format!("unknown opcode {value}")))?,
        ),
        None => None,
    };

    let args = annotation
        .get("args")
        .map(|value| {
            value
                .as_array()
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let shift = match annotation.get("shift").and_then(AnnotationValue::as_enum) {
        None | Some("NONE") => Shift::None,
        Some("BEFORE") => Shift::Before,
        Some("AFTER") => Shift::After,
        Some("BY") => Shift::By(annotation.get_int("by").unwrap_or(0) as isize),
        Some(other) => return Err(invalid(format!("unknown shift {other:?}"))),
    };

    Ok(InjectionPoint::At(AtPoint {
        code,
        selector,
        ordinal: annotation
            .get_int("ordinal")
            .and_then(|ordinal| usize::try_from(ordinal).ok()),
        opcode,
        args,
        id: annotation.get_str("id").map(Into::into),
        slice: annotation.get_str("slice").map(Into::into),
        shift,
    }))
}

fn parse_slice(
    mixin: &str,
    handler: &str,
    annotation: &AnnotationNode,
    resolver: &ReferenceResolver<'_>,
) -> Result<Slice> {
    let from = match annotation.get("from").and_then(AnnotationValue::as_annotation) {
        Some(at) => Some(parse_at(mixin, handler, at, resolver)?),
        None => None,
    };
    let to = match annotation.get("to").and_then(AnnotationValue::as_annotation) {
        Some(at) => Some(parse_at(mixin, handler, at, resolver)?),
        None => None,
    };
    Ok(Slice {
        id: annotation.get_str("id").unwrap_or_default().into(),
        from,
        to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::Access;

    fn resolver<'a>(refmap: &'a RefMap) -> ReferenceResolver<'a> {
        ReferenceResolver {
            refmap,
            class: "a/MixinTarget",
            environment: None,
            disabled: false,
        }
    }

    fn at_annotation(code: &str, target: Option<&str>) -> AnnotationNode {
        let mut at = AnnotationNode::new(AT).with("value", AnnotationValue::String(code.into()));
        if let Some(target) = target {
            at = at.with("target", AnnotationValue::String(target.into()));
        }
        at
    }

    fn inject_method() -> MethodNode {
        let mut method = MethodNode::new(Access::PRIVATE, "hook", "(ILweave/callback/CallbackInfoReturnable;)V");
        method.annotations.push(
            AnnotationNode::new(INJECT)
                .with("method", AnnotationValue::String("compute(I)I".into()))
                .with(
                    "at",
                    AnnotationValue::Annotation(at_annotation("HEAD", None)),
                )
                .with("cancellable", AnnotationValue::Bool(true)),
        );
        method
    }

    #[test]
    fn parses_mixin_annotation() {
        let mut node = ClassNode::new("a/MixinTarget");
        node.annotations.push(
            AnnotationNode::new(MIXIN)
                .with(
                    "value",
                    AnnotationValue::Array(vec![AnnotationValue::Class("a/Target".into())]),
                )
                .with(
                    "targets",
                    AnnotationValue::String("a.pkg.Hidden".into()),
                )
                .with("priority", AnnotationValue::Int(500)),
        );
        let parsed = MixinAnnotation::parse(&node).expect("mixin annotation");
        assert_eq!(parsed.targets, vec!["a/Target"]);
        assert_eq!(parsed.soft_targets, vec!["a/pkg/Hidden"]);
        assert_eq!(parsed.priority, Some(500));
    }

    #[test]
    fn parses_callback_injector() {
        let refmap = RefMap::new();
        let method = inject_method();
        let info = parse_injector("a/MixinTarget", &method, &resolver(&refmap))
            .expect("parses")
            .expect("is an injector");
        assert_eq!(info.kind, InjectorKind::Callback);
        assert!(info.cancellable);
        assert_eq!(info.targets.len(), 1);
        assert_eq!(info.targets[0].name(), Some("compute"));
        assert_eq!(info.points.len(), 1);
    }

    #[test]
    fn refmap_rewrites_target_references() {
        let mut refmap = RefMap::new();
        refmap.add_mapping("a/MixinTarget", "compute(I)I", "func_1234(I)I");
        let method = inject_method();
        let info = parse_injector("a/MixinTarget", &method, &resolver(&refmap))
            .expect("parses")
            .expect("is an injector");
        assert_eq!(info.targets[0].name(), Some("func_1234"));
    }

    #[test]
    fn missing_at_is_an_error() {
        let refmap = RefMap::new();
        let mut method = MethodNode::new(Access::PRIVATE, "hook", "()V");
        method.annotations.push(
            AnnotationNode::new(INJECT)
                .with("method", AnnotationValue::String("compute(I)I".into())),
        );
        assert!(parse_injector("a/MixinTarget", &method, &resolver(&refmap)).is_err());
    }

    #[test]
    fn accessor_name_inference() {
        assert_eq!(infer_accessor_name("getWorld"), "world");
        assert_eq!(infer_accessor_name("isAlive"), "alive");
        assert_eq!(infer_accessor_name("setCount"), "count");
        assert_eq!(infer_accessor_name("world"), "world");
        assert_eq!(infer_invoker_name("callTick"), "tick");
        assert_eq!(infer_invoker_name("invokeStep"), "step");
    }

    #[test]
    fn decorations_parse_intrinsic_displace() {
        let annotations = vec![
            AnnotationNode::new(INTRINSIC).with("displace", AnnotationValue::Bool(true)),
            AnnotationNode::new(FINAL),
        ];
        let decorations = MemberDecorations::parse(&annotations, "tick");
        assert_eq!(decorations.intrinsic, Some(true));
        assert!(decorations.is_final);
        assert!(!decorations.shadow);
    }

    #[test]
    fn at_shift_by_parses() {
        let refmap = RefMap::new();
        let at = at_annotation("HEAD", None)
            .with("shift", AnnotationValue::Enum {
                desc: "Lweave/annotation/At$Shift;".into(),
                value: "BY".into(),
            })
            .with("by", AnnotationValue::Int(2));
        let point = parse_at("a/M", "h", &at, &resolver(&refmap)).expect("parses");
        match point {
            InjectionPoint::At(at) => assert_eq!(at.shift, Shift::By(2)),
            other => panic!("unexpected point {other:?}"),
        }
    }
}
