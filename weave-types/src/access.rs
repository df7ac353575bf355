//! Class, method and field access flags.

use bitflags::bitflags;

bitflags! {
    /// JVM access and property flags, shared across classes, fields and
    /// methods. Flag values overlap between declaration kinds exactly as
    /// they do in the class-file format.
    pub struct Access: u32 {
        /// Declared `public`.
        const PUBLIC = 0x0001;
        /// Declared `private`.
        const PRIVATE = 0x0002;
        /// Declared `protected`.
        const PROTECTED = 0x0004;
        /// Declared `static`.
        const STATIC = 0x0008;
        /// Declared `final`.
        const FINAL = 0x0010;
        /// `ACC_SUPER` on classes, `synchronized` on methods.
        const SUPER = 0x0020;
        /// `volatile` on fields, bridge flag on methods.
        const VOLATILE = 0x0040;
        /// Compiler-generated bridge method.
        const BRIDGE = 0x0040;
        /// `transient` on fields, varargs flag on methods.
        const TRANSIENT = 0x0080;
        /// Declared with a variable number of arguments.
        const VARARGS = 0x0080;
        /// Declared `native`.
        const NATIVE = 0x0100;
        /// An interface declaration.
        const INTERFACE = 0x0200;
        /// Declared `abstract`.
        const ABSTRACT = 0x0400;
        /// `strictfp`.
        const STRICT = 0x0800;
        /// Not present in source code.
        const SYNTHETIC = 0x1000;
        /// An annotation interface.
        const ANNOTATION = 0x2000;
        /// An enum class or enum constant field.
        const ENUM = 0x4000;
    }
}

impl Access {
    /// The declared visibility, ignoring all other flags.
    pub fn visibility(self) -> Visibility {
        if self.contains(Access::PUBLIC) {
            Visibility::Public
        } else if self.contains(Access::PROTECTED) {
            Visibility::Protected
        } else if self.contains(Access::PRIVATE) {
            Visibility::Private
        } else {
            Visibility::Package
        }
    }

    /// Replace the visibility bits, leaving all other flags intact.
    pub fn with_visibility(self, visibility: Visibility) -> Self {
        let cleared =
            self - (Access::PUBLIC | Access::PROTECTED | Access::PRIVATE);
        match visibility {
            Visibility::Private => cleared | Access::PRIVATE,
            Visibility::Package => cleared,
            Visibility::Protected => cleared | Access::PROTECTED,
            Visibility::Public => cleared | Access::PUBLIC,
        }
    }

    /// `true` when the `static` flag is set.
    pub const fn is_static(self) -> bool {
        self.contains(Access::STATIC)
    }

    /// `true` when the `final` flag is set.
    pub const fn is_final(self) -> bool {
        self.contains(Access::FINAL)
    }

    /// `true` when the `abstract` flag is set.
    pub const fn is_abstract(self) -> bool {
        self.contains(Access::ABSTRACT)
    }

    /// `true` when the synthetic flag is set.
    pub const fn is_synthetic(self) -> bool {
        self.contains(Access::SYNTHETIC)
    }
}

/// Member visibility, ordered from least to most visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    /// `private`
    Private,
    /// package-private (no flag)
    Package,
    /// `protected`
    Protected,
    /// `public`
    Public,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_ordering_is_least_to_most() {
        assert!(Visibility::Private < Visibility::Package);
        assert!(Visibility::Package < Visibility::Protected);
        assert!(Visibility::Protected < Visibility::Public);
    }

    #[test]
    fn with_visibility_clears_previous_bits() {
        let access = Access::PUBLIC | Access::STATIC | Access::FINAL;
        let demoted = access.with_visibility(Visibility::Private);
        assert_eq!(demoted.visibility(), Visibility::Private);
        assert!(demoted.is_static());
        assert!(demoted.is_final());
        assert!(!demoted.contains(Access::PUBLIC));
    }

    #[test]
    fn package_visibility_has_no_bits() {
        let access = Access::PROTECTED.with_visibility(Visibility::Package);
        assert!(access.is_empty());
    }
}
