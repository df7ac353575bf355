//! Class, method, field and instruction trees for the Weave mixin engine.
//!
//! This crate is the engine's view of a bytecode manipulation library: a
//! tree model of one class file (types, members, instruction lists, stack
//! map frames, annotations) plus the [`ClassSource`] and [`TreeCodec`]
//! traits that hosts implement to bridge the trees to real class bytes.
//! Nothing in here reads or writes the binary class-file format.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod insn;
mod list;
mod node;
mod opcode;
mod source;

pub use insn::{Constant, Insn, LabelId};
pub use list::{InsnId, InsnList};
pub use node::{
    AnnotationNode, AnnotationValue, ClassNode, FieldNode, FrameEntry, FrameKind, FrameNode,
    LocalVariableNode, MethodNode,
};
pub use opcode::Opcode;
pub use source::{ClassSource, NullSource, TreeCodec, TreeError};
