//! Class-name conversions between binary (`java.lang.Object`) and internal
//! (`java/lang/Object`) forms.

/// Internal name of `java.lang.Object`.
pub const OBJECT_INTERNAL_NAME: &str = "java/lang/Object";

/// Name of instance initializer methods.
pub const CTOR_NAME: &str = "<init>";

/// Name of the class initializer method.
pub const CLINIT_NAME: &str = "<clinit>";

/// Convert a binary class name to internal form.
pub fn internal_name(binary: &str) -> String {
    binary.replace('.', "/")
}

/// Convert an internal class name to binary form.
pub fn binary_name(internal: &str) -> String {
    internal.replace('/', ".")
}

/// The unqualified class name, inner-class part included.
pub fn simple_name(internal: &str) -> &str {
    internal.rsplit('/').next().unwrap_or(internal)
}

/// The package part of an internal name, empty for the default package.
pub fn package_of(internal: &str) -> &str {
    match internal.rfind('/') {
        Some(idx) => &internal[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_between_forms() {
        assert_eq!(internal_name("java.lang.Object"), OBJECT_INTERNAL_NAME);
        assert_eq!(binary_name(OBJECT_INTERNAL_NAME), "java.lang.Object");
    }

    #[test]
    fn splits_simple_and_package() {
        assert_eq!(simple_name("com/example/Outer$Inner"), "Outer$Inner");
        assert_eq!(package_of("com/example/Outer$Inner"), "com/example");
        assert_eq!(package_of("TopLevel"), "");
        assert_eq!(simple_name("TopLevel"), "TopLevel");
    }
}
