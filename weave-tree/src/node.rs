//! Class, field, method, frame and annotation nodes.

use weave_types::{Access, MethodDescriptor, TypeParseError, CLINIT_NAME, CTOR_NAME};

use crate::insn::{Constant, LabelId};
use crate::list::InsnList;

/// Stack-map frame kinds, following the compressed class-file forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameKind {
    /// Locals unchanged, empty stack.
    Same,
    /// Locals unchanged, one stack entry.
    Same1,
    /// Locals extended by the attached entries.
    Append,
    /// The given number of trailing locals removed.
    Chop,
    /// Locals and stack fully described.
    Full,
    /// An expanded (uncompressed) full frame.
    New,
}

/// One verification-type entry in a stack-map frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameEntry {
    /// Second slot of a wide value, or an unknown local.
    Top,
    /// `int` and its sub-word kin.
    Integer,
    /// `float`.
    Float,
    /// `long` (writes the following slot as `Top`).
    Long,
    /// `double` (writes the following slot as `Top`).
    Double,
    /// The null type.
    Null,
    /// `this` before the super constructor call.
    UninitializedThis,
    /// A reference type, by internal name.
    Object(String),
    /// A `new` result before its constructor call.
    Uninitialized(LabelId),
}

/// A stack-map frame pseudo-instruction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameNode {
    /// Frame kind.
    pub kind: FrameKind,
    /// Local entries; meaning depends on `kind`.
    pub locals: Vec<FrameEntry>,
    /// Operand-stack entries.
    pub stack: Vec<FrameEntry>,
    /// For [`FrameKind::Chop`], the number of locals removed.
    pub chopped: usize,
}

impl FrameNode {
    /// A `SAME` frame.
    pub fn same() -> Self {
        Self {
            kind: FrameKind::Same,
            locals: Vec::new(),
            stack: Vec::new(),
            chopped: 0,
        }
    }

    /// A full frame from explicit local and stack entries.
    pub fn full(locals: Vec<FrameEntry>, stack: Vec<FrameEntry>) -> Self {
        Self {
            kind: FrameKind::Full,
            locals,
            stack,
            chopped: 0,
        }
    }

    /// An `APPEND` frame adding the given locals.
    pub fn append(locals: Vec<FrameEntry>) -> Self {
        Self {
            kind: FrameKind::Append,
            locals,
            stack: Vec::new(),
            chopped: 0,
        }
    }

    /// A `CHOP` frame removing `count` trailing locals.
    pub fn chop(count: usize) -> Self {
        Self {
            kind: FrameKind::Chop,
            locals: Vec::new(),
            stack: Vec::new(),
            chopped: count,
        }
    }
}

/// A value inside an annotation, mirroring the class-file element-value
/// forms the engine consumes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnnotationValue {
    /// `boolean` element.
    Bool(bool),
    /// `int` (and narrower integral) element.
    Int(i32),
    /// `String` element.
    String(String),
    /// `Class` element, by internal name.
    Class(String),
    /// Enum constant element.
    Enum {
        /// Type descriptor of the enum class.
        desc: String,
        /// Constant name.
        value: String,
    },
    /// Nested annotation.
    Annotation(AnnotationNode),
    /// Array element.
    Array(Vec<AnnotationValue>),
}

impl AnnotationValue {
    /// String view of a `String` element.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnotationValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Integer view of an `Int` element.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            AnnotationValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Boolean view of a `Bool` element.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AnnotationValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Class-name view of a `Class` element.
    pub fn as_class(&self) -> Option<&str> {
        match self {
            AnnotationValue::Class(name) => Some(name),
            _ => None,
        }
    }

    /// Enum-constant view of an `Enum` element.
    pub fn as_enum(&self) -> Option<&str> {
        match self {
            AnnotationValue::Enum { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Nested-annotation view.
    pub fn as_annotation(&self) -> Option<&AnnotationNode> {
        match self {
            AnnotationValue::Annotation(node) => Some(node),
            _ => None,
        }
    }

    /// Array view; a scalar is treated as a one-element array, matching
    /// the single-element shorthand of annotation source syntax.
    pub fn as_array(&self) -> Vec<&AnnotationValue> {
        match self {
            AnnotationValue::Array(values) => values.iter().collect(),
            scalar => vec![scalar],
        }
    }
}

/// A parsed annotation: type descriptor plus named element values.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnnotationNode {
    /// Type descriptor of the annotation interface.
    pub desc: String,
    /// `(element, value)` pairs in declaration order.
    pub values: Vec<(String, AnnotationValue)>,
}

impl AnnotationNode {
    /// An annotation with no elements.
    pub fn new(desc: impl Into<String>) -> Self {
        Self {
            desc: desc.into(),
            values: Vec::new(),
        }
    }

    /// Add an element value, builder-style.
    pub fn with(mut self, name: impl Into<String>, value: AnnotationValue) -> Self {
        self.values.push((name.into(), value));
        self
    }

    /// Look up an element by name.
    pub fn get(&self, name: &str) -> Option<&AnnotationValue> {
        self.values
            .iter()
            .find(|(element, _)| element == name)
            .map(|(_, value)| value)
    }

    /// String element shorthand.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AnnotationValue::as_str)
    }

    /// Integer element shorthand.
    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(AnnotationValue::as_int)
    }

    /// Boolean element shorthand.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(AnnotationValue::as_bool)
    }
}

/// A local-variable table entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalVariableNode {
    /// Variable name.
    pub name: String,
    /// Type descriptor.
    pub desc: String,
    /// Generic signature, when present.
    pub signature: Option<String>,
    /// First instruction of the live range.
    pub start: LabelId,
    /// First instruction past the live range.
    pub end: LabelId,
    /// Local-variable slot.
    pub index: usize,
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldNode {
    /// Access flags.
    pub access: Access,
    /// Field name.
    pub name: String,
    /// Type descriptor.
    pub desc: String,
    /// Generic signature, when present.
    pub signature: Option<String>,
    /// Constant initial value, when present.
    pub value: Option<Constant>,
    /// Annotations on the field.
    pub annotations: Vec<AnnotationNode>,
}

impl FieldNode {
    /// A field with no signature, value or annotations.
    pub fn new(access: Access, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            signature: None,
            value: None,
            annotations: Vec::new(),
        }
    }

    /// The first annotation with the given type descriptor.
    pub fn annotation(&self, desc: &str) -> Option<&AnnotationNode> {
        self.annotations.iter().find(|node| node.desc == desc)
    }
}

/// A method declaration with its body.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodNode {
    /// Access flags.
    pub access: Access,
    /// Method name.
    pub name: String,
    /// Method descriptor.
    pub desc: String,
    /// Generic signature, when present.
    pub signature: Option<String>,
    /// Thrown exception class names.
    pub exceptions: Vec<String>,
    /// The body. Abstract and native methods have an empty list.
    pub instructions: InsnList,
    /// Operand stack bound.
    pub max_stack: usize,
    /// Local-variable slot bound.
    pub max_locals: usize,
    /// Local-variable table, possibly empty.
    pub local_variables: Vec<LocalVariableNode>,
    /// Annotations on the method.
    pub annotations: Vec<AnnotationNode>,
    next_label: u32,
}

impl MethodNode {
    /// An empty method.
    pub fn new(access: Access, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            signature: None,
            exceptions: Vec::new(),
            instructions: InsnList::new(),
            max_stack: 0,
            max_locals: 0,
            local_variables: Vec::new(),
            annotations: Vec::new(),
            next_label: 0,
        }
    }

    /// Allocate a label unique within this method.
    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        id
    }

    /// Reserve label space after merging instructions from another method.
    pub fn reserve_labels(&mut self, upto: LabelId) {
        self.next_label = self.next_label.max(upto.0 + 1);
    }

    /// `true` when the `static` flag is set.
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }

    /// `true` for `<init>`.
    pub fn is_ctor(&self) -> bool {
        self.name == CTOR_NAME
    }

    /// `true` for `<clinit>`.
    pub fn is_clinit(&self) -> bool {
        self.name == CLINIT_NAME
    }

    /// Parse the method descriptor.
    pub fn descriptor(&self) -> Result<MethodDescriptor, TypeParseError> {
        MethodDescriptor::parse(&self.desc)
    }

    /// The first annotation with the given type descriptor.
    pub fn annotation(&self, desc: &str) -> Option<&AnnotationNode> {
        self.annotations.iter().find(|node| node.desc == desc)
    }
}

/// A class declaration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassNode {
    /// Class-file version (major only; the engine never lowers it).
    pub version: u32,
    /// Access flags.
    pub access: Access,
    /// Internal class name.
    pub name: String,
    /// Generic signature, when present.
    pub signature: Option<String>,
    /// Internal name of the superclass; `None` only for `java/lang/Object`.
    pub super_name: Option<String>,
    /// Implemented interfaces, by internal name.
    pub interfaces: Vec<String>,
    /// Declared fields.
    pub fields: Vec<FieldNode>,
    /// Declared methods.
    pub methods: Vec<MethodNode>,
    /// Annotations on the class.
    pub annotations: Vec<AnnotationNode>,
    /// Source file attribute, when present.
    pub source_file: Option<String>,
    /// Source debug extension attribute, when present.
    pub source_debug: Option<String>,
    /// Enclosing class for inner classes, when present.
    pub outer_class: Option<String>,
}

impl ClassNode {
    /// Class-file major version the engine assumes when synthesizing.
    pub const DEFAULT_VERSION: u32 = 52;

    /// A public class extending `java/lang/Object`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: Self::DEFAULT_VERSION,
            access: Access::PUBLIC,
            name: name.into(),
            signature: None,
            super_name: Some(weave_types::OBJECT_INTERNAL_NAME.into()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            annotations: Vec::new(),
            source_file: None,
            source_debug: None,
            outer_class: None,
        }
    }

    /// `true` when the interface flag is set.
    pub fn is_interface(&self) -> bool {
        self.access.contains(Access::INTERFACE)
    }

    /// Find a method by name and descriptor.
    pub fn method(&self, name: &str, desc: &str) -> Option<&MethodNode> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.desc == desc)
    }

    /// Mutable lookup of a method by name and descriptor.
    pub fn method_mut(&mut self, name: &str, desc: &str) -> Option<&mut MethodNode> {
        self.methods
            .iter_mut()
            .find(|method| method.name == name && method.desc == desc)
    }

    /// Find a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Mutable lookup of a field by name.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldNode> {
        self.fields.iter_mut().find(|field| field.name == name)
    }

    /// Add an interface if not already present; `true` when added.
    pub fn add_interface(&mut self, name: &str) -> bool {
        if self.interfaces.iter().any(|itf| itf == name) {
            return false;
        }
        self.interfaces.push(name.into());
        true
    }

    /// The first annotation with the given type descriptor.
    pub fn annotation(&self, desc: &str) -> Option<&AnnotationNode> {
        self.annotations.iter().find(|node| node.desc == desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_interface_deduplicates() {
        let mut node = ClassNode::new("com/example/Target");
        assert!(node.add_interface("com/example/Marker"));
        assert!(!node.add_interface("com/example/Marker"));
        assert_eq!(node.interfaces.len(), 1);
    }

    #[test]
    fn annotation_lookup_by_descriptor() {
        let mut node = ClassNode::new("com/example/Target");
        node.annotations.push(
            AnnotationNode::new("Lcom/example/Marker;")
                .with("value", AnnotationValue::Int(7)),
        );
        let found = node.annotation("Lcom/example/Marker;").expect("present");
        assert_eq!(found.get_int("value"), Some(7));
        assert!(node.annotation("Lcom/example/Other;").is_none());
    }

    #[test]
    fn scalar_annotation_values_read_as_one_element_arrays() {
        let value = AnnotationValue::String("a".into());
        assert_eq!(value.as_array().len(), 1);
        let array = AnnotationValue::Array(vec![
            AnnotationValue::String("a".into()),
            AnnotationValue::String("b".into()),
        ]);
        assert_eq!(array.as_array().len(), 2);
    }

    #[test]
    fn labels_are_unique_per_method() {
        let mut method = MethodNode::new(Access::PUBLIC, "run", "()V");
        let a = method.new_label();
        let b = method.new_label();
        assert_ne!(a, b);
        method.reserve_labels(LabelId(10));
        assert_eq!(method.new_label(), LabelId(11));
    }
}
