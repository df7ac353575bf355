//! Per-class metadata records.

use std::collections::HashMap;

use bitflags::bitflags;
use weave_tree::{ClassNode, FrameKind, Insn};
use weave_types::{Access, JavaType, OBJECT_INTERNAL_NAME};

bitflags! {
    /// Engine-side decorations attached to a member on top of its class
    /// file access flags.
    pub struct MemberFlags: u8 {
        /// Declared unique by its mixin.
        const UNIQUE = 0x01;
        /// Decorated final: replacement is forbidden.
        const DECORATED_FINAL = 0x02;
        /// Decorated mutable: writes through a final shadow are allowed.
        const DECORATED_MUTABLE = 0x04;
        /// Added to the class by a mixin during this session.
        const MIXIN_MERGED = 0x08;
    }
}

/// A stack-map frame observed while reading a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    /// Visit-order index of the frame pseudo-instruction.
    pub insn_index: usize,
    /// Frame kind.
    pub kind: FrameKind,
    /// Number of local entries attached to the frame.
    pub locals_count: usize,
}

/// One method or field of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberMeta {
    /// Member name.
    pub name: String,
    /// Type or method descriptor.
    pub desc: String,
    /// Access flags.
    pub access: Access,
    /// Engine decorations.
    pub flags: MemberFlags,
    /// Internal name of the declaring class. Hierarchy queries overwrite
    /// this with the class the member was actually found on.
    pub owner: String,
    /// `true` when a hierarchy query resolved the member via an interface.
    pub from_interface: bool,
}

impl MemberMeta {
    /// A plain member with no decorations.
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
        access: Access,
    ) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            access,
            flags: MemberFlags::empty(),
            owner: owner.into(),
            from_interface: false,
        }
    }

    /// `name + desc`, the conventional member key.
    pub fn key(&self) -> String {
        format!("{}{}", self.name, self.desc)
    }

    /// `true` when the `static` flag is set.
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }
}

/// Cached metadata for one class: hierarchy links, members, frames and
/// mixin relationships. At most one record exists per class name for the
/// lifetime of the transform session.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMeta {
    /// Internal class name.
    pub name: String,
    /// Internal name of the superclass, `None` for `java/lang/Object`.
    pub superclass: Option<String>,
    /// Implemented interfaces, by internal name.
    pub interfaces: Vec<String>,
    /// Generic signature, when present.
    pub signature: Option<String>,
    /// Access flags.
    pub access: Access,
    /// Enclosing class deduced from the synthetic `this$*` field.
    pub outer_class: Option<String>,
    /// Inner class without a synthetic outer reference.
    pub is_probably_static: bool,
    /// Declared methods, constructors excluded.
    pub methods: Vec<MemberMeta>,
    /// Declared non-synthetic fields.
    pub fields: Vec<MemberMeta>,
    /// Stack-map frames per method, keyed by `name + desc`.
    pub frames: HashMap<String, Vec<FrameRecord>>,
    /// `true` when this class is itself a mixin.
    pub is_mixin: bool,
    /// Names of mixin classes targeting this class, in application order.
    pub mixins: Vec<String>,
}

impl ClassMeta {
    /// Build a record from a parsed class tree. Constructors are excluded
    /// from the member set; synthetic fields are excluded except for the
    /// outer-reference probe.
    pub fn from_class_node(node: &ClassNode) -> Self {
        let mut outer_class = None;
        let mut fields = Vec::new();

        for field in &node.fields {
            if field.access.is_synthetic() {
                if field.name.starts_with("this$") {
                    if let Ok(JavaType::Object(owner)) = JavaType::parse(&field.desc) {
                        outer_class = Some(owner);
                    }
                }
                continue;
            }
            fields.push(MemberMeta::new(
                &node.name,
                &field.name,
                &field.desc,
                field.access,
            ));
        }

        let mut methods = Vec::new();
        let mut frames: HashMap<String, Vec<FrameRecord>> = HashMap::new();
        for method in &node.methods {
            if method.is_ctor() {
                continue;
            }
            methods.push(MemberMeta::new(
                &node.name,
                &method.name,
                &method.desc,
                method.access,
            ));

            let records: Vec<FrameRecord> = method
                .instructions
                .iter_insns()
                .enumerate()
                .filter_map(|(index, (_, insn))| match insn {
                    Insn::Frame(frame) => Some(FrameRecord {
                        insn_index: index,
                        kind: frame.kind,
                        locals_count: frame.locals.len(),
                    }),
                    _ => None,
                })
                .collect();
            if !records.is_empty() {
                frames.insert(format!("{}{}", method.name, method.desc), records);
            }
        }

        let is_inner = node.name.contains('$');
        Self {
            name: node.name.clone(),
            superclass: node.super_name.clone(),
            interfaces: node.interfaces.clone(),
            signature: node.signature.clone(),
            access: node.access,
            is_probably_static: is_inner && outer_class.is_none(),
            outer_class,
            methods,
            fields,
            frames,
            is_mixin: false,
            mixins: Vec::new(),
        }
    }

    /// The preconstructed record for `java/lang/Object`.
    pub fn object() -> Self {
        let object = OBJECT_INTERNAL_NAME;
        let method = |name: &str, desc: &str, access: Access| {
            MemberMeta::new(object, name, desc, access)
        };
        let public = Access::PUBLIC;
        let protected = Access::PROTECTED;

        Self {
            name: object.into(),
            superclass: None,
            interfaces: Vec::new(),
            signature: None,
            access: Access::PUBLIC,
            outer_class: None,
            is_probably_static: false,
            methods: vec![
                method("getClass", "()Ljava/lang/Class;", public | Access::FINAL),
                method("hashCode", "()I", public),
                method("equals", "(Ljava/lang/Object;)Z", public),
                method("clone", "()Ljava/lang/Object;", protected),
                method("toString", "()Ljava/lang/String;", public),
                method("notify", "()V", public | Access::FINAL),
                method("notifyAll", "()V", public | Access::FINAL),
                method("wait", "()V", public | Access::FINAL),
                method("wait", "(J)V", public | Access::FINAL),
                method("wait", "(JI)V", public | Access::FINAL),
                method("finalize", "()V", protected),
            ],
            fields: Vec::new(),
            frames: HashMap::new(),
            is_mixin: false,
            mixins: Vec::new(),
        }
    }

    /// `true` for the root of the hierarchy.
    pub fn is_object(&self) -> bool {
        self.superclass.is_none()
    }

    /// `true` when the interface flag is set.
    pub fn is_interface(&self) -> bool {
        self.access.contains(Access::INTERFACE)
    }

    /// Find a declared method by name and descriptor.
    pub fn method(&self, name: &str, desc: &str) -> Option<&MemberMeta> {
        self.methods
            .iter()
            .find(|member| member.name == name && member.desc == desc)
    }

    /// Find a declared field by name, optionally narrowing by descriptor.
    pub fn field(&self, name: &str, desc: Option<&str>) -> Option<&MemberMeta> {
        self.fields.iter().find(|member| {
            member.name == name && desc.map_or(true, |desc| member.desc == desc)
        })
    }

    /// Mutable lookup of a declared field by name.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut MemberMeta> {
        self.fields.iter_mut().find(|member| member.name == name)
    }

    /// Record a member added by a mixin during this session.
    pub fn add_merged_method(&mut self, mut member: MemberMeta) {
        member.flags |= MemberFlags::MIXIN_MERGED;
        member.owner = self.name.clone();
        self.methods.push(member);
    }

    /// Record a field added by a mixin during this session.
    pub fn add_merged_field(&mut self, mut member: MemberMeta) {
        member.flags |= MemberFlags::MIXIN_MERGED;
        member.owner = self.name.clone();
        self.fields.push(member);
    }

    /// Stack-map frames for one method.
    pub fn frames_for(&self, name: &str, desc: &str) -> Option<&[FrameRecord]> {
        self.frames
            .get(&format!("{name}{desc}"))
            .map(Vec::as_slice)
    }
}
