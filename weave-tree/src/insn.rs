//! Tree instruction nodes.

use crate::node::FrameNode;
use crate::opcode::Opcode;

/// An interned label. Labels are allocated by the owning [`MethodNode`]
/// and are only meaningful within one method body.
///
/// [`MethodNode`]: crate::MethodNode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelId(pub u32);

/// A loadable constant for `ldc` instructions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Constant {
    /// `int` constant.
    Int(i32),
    /// `float` constant.
    Float(f32),
    /// `long` constant.
    Long(i64),
    /// `double` constant.
    Double(f64),
    /// `String` constant.
    String(String),
    /// `Class` literal, by internal name.
    Class(String),
}

/// One instruction in a method body, in tree form.
///
/// Labels, stack-map frames and line numbers are pseudo-instructions: they
/// occupy positions in the instruction list but emit no bytecode.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Insn {
    /// Zero-operand instruction.
    Op(Opcode),
    /// `bipush`/`sipush`/`newarray`.
    Int {
        /// The opcode.
        op: Opcode,
        /// The immediate operand.
        operand: i32,
    },
    /// Local-variable load/store, or `ret`.
    Var {
        /// The opcode.
        op: Opcode,
        /// The local-variable slot.
        var: usize,
    },
    /// `new`/`anewarray`/`checkcast`/`instanceof`.
    Type {
        /// The opcode.
        op: Opcode,
        /// Internal class name (or array descriptor).
        desc: String,
    },
    /// Field access.
    Field {
        /// One of the four field-access opcodes.
        op: Opcode,
        /// Internal name of the declaring class.
        owner: String,
        /// Field name.
        name: String,
        /// Field type descriptor.
        desc: String,
    },
    /// Method invocation.
    Method {
        /// One of the invoke opcodes, `invokedynamic` excluded.
        op: Opcode,
        /// Internal name of the declaring class.
        owner: String,
        /// Method name.
        name: String,
        /// Method descriptor.
        desc: String,
        /// `true` when the owner is an interface.
        itf: bool,
    },
    /// `invokedynamic`; bootstrap data is opaque to the engine.
    InvokeDynamic {
        /// Call-site name.
        name: String,
        /// Call-site descriptor.
        desc: String,
    },
    /// Conditional or unconditional branch.
    Jump {
        /// The branch opcode.
        op: Opcode,
        /// Branch target.
        label: LabelId,
    },
    /// Label pseudo-instruction.
    Label(LabelId),
    /// `ldc` with a normalised constant operand.
    Ldc(Constant),
    /// `iinc`.
    Iinc {
        /// The local-variable slot.
        var: usize,
        /// The increment amount.
        incr: i32,
    },
    /// `tableswitch`/`lookupswitch`, normalised to a key list.
    Switch {
        /// Match keys, parallel to `labels`.
        keys: Vec<i32>,
        /// Branch targets, parallel to `keys`.
        labels: Vec<LabelId>,
        /// Default branch target.
        default: LabelId,
    },
    /// `multianewarray`.
    MultiANewArray {
        /// Array type descriptor.
        desc: String,
        /// Number of dimensions to allocate.
        dims: u8,
    },
    /// Stack-map frame pseudo-instruction.
    Frame(FrameNode),
    /// Line-number pseudo-instruction.
    LineNumber {
        /// Source line.
        line: u32,
        /// The label this line starts at.
        start: LabelId,
    },
}

impl Insn {
    /// The opcode of a real instruction, `None` for pseudo-instructions.
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Insn::Op(op)
            | Insn::Int { op, .. }
            | Insn::Var { op, .. }
            | Insn::Type { op, .. }
            | Insn::Field { op, .. }
            | Insn::Method { op, .. }
            | Insn::Jump { op, .. } => Some(*op),
            Insn::InvokeDynamic { .. } => Some(Opcode::Invokedynamic),
            Insn::Ldc(_) => Some(Opcode::Ldc),
            Insn::Iinc { .. } => Some(Opcode::Iinc),
            Insn::Switch { .. } => Some(Opcode::Tableswitch),
            Insn::MultiANewArray { .. } => Some(Opcode::Multianewarray),
            Insn::Label(_) | Insn::Frame(_) | Insn::LineNumber { .. } => None,
        }
    }

    /// `true` for instructions that emit bytecode, `false` for labels,
    /// frames and line numbers.
    pub fn is_real(&self) -> bool {
        self.opcode().is_some()
    }

    /// Shorthand for a zero-operand instruction.
    pub const fn op(op: Opcode) -> Self {
        Insn::Op(op)
    }

    /// Shorthand for a local-variable instruction.
    pub const fn var(op: Opcode, var: usize) -> Self {
        Insn::Var { op, var }
    }

    /// Shorthand for a method invocation.
    pub fn invoke(
        op: Opcode,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Insn::Method {
            op,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
            itf: false,
        }
    }

    /// Shorthand for a field access.
    pub fn field(
        op: Opcode,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Insn::Field {
            op,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }

    /// Push an `int` constant using the smallest encoding.
    pub fn push_int(value: i32) -> Self {
        match value {
            -1 => Insn::Op(Opcode::IconstM1),
            0 => Insn::Op(Opcode::Iconst0),
            1 => Insn::Op(Opcode::Iconst1),
            2 => Insn::Op(Opcode::Iconst2),
            3 => Insn::Op(Opcode::Iconst3),
            4 => Insn::Op(Opcode::Iconst4),
            5 => Insn::Op(Opcode::Iconst5),
            v if (i8::MIN as i32..=i8::MAX as i32).contains(&v) => Insn::Int {
                op: Opcode::Bipush,
                operand: v,
            },
            v if (i16::MIN as i32..=i16::MAX as i32).contains(&v) => Insn::Int {
                op: Opcode::Sipush,
                operand: v,
            },
            v => Insn::Ldc(Constant::Int(v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_instructions_have_no_opcode() {
        assert!(!Insn::Label(LabelId(0)).is_real());
        assert!(Insn::op(Opcode::Nop).is_real());
        assert_eq!(
            Insn::Ldc(Constant::String("x".into())).opcode(),
            Some(Opcode::Ldc)
        );
    }

    #[test]
    fn push_int_picks_smallest_form() {
        assert_eq!(Insn::push_int(3), Insn::Op(Opcode::Iconst3));
        assert_eq!(
            Insn::push_int(100),
            Insn::Int {
                op: Opcode::Bipush,
                operand: 100
            }
        );
        assert_eq!(
            Insn::push_int(40_000),
            Insn::Ldc(Constant::Int(40_000))
        );
    }
}
