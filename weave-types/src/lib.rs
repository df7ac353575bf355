//! Atomic types shared by the Weave mixin engine: JVM type descriptors,
//! method descriptors, access flags and class-name handling.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod access;
mod descriptor;
mod name;

pub use access::{Access, Visibility};
pub use descriptor::{JavaType, MethodDescriptor, TypeParseError};
pub use name::{
    binary_name, internal_name, package_of, simple_name, CLINIT_NAME, CTOR_NAME,
    OBJECT_INTERNAL_NAME,
};
