//! JVM type and method descriptor representations.

use core::fmt;
use core::str::Chars;

/// Failure while parsing a type or method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeParseError {
    /// The descriptor ended before the type was complete.
    #[error("truncated descriptor: {0:?}")]
    Truncated(String),
    /// An unknown base-type character was encountered.
    #[error("unknown base type {0:?} in descriptor {1:?}")]
    UnknownBaseType(char, String),
    /// A method descriptor was missing its parenthesised argument list.
    #[error("malformed method descriptor {0:?}")]
    MalformedMethod(String),
    /// Trailing characters remained after a complete type was read.
    #[error("trailing characters in descriptor {0:?}")]
    Trailing(String),
}

/// A JVM value type, decoded from its descriptor form.
///
/// Object types carry the *internal* class name (`java/lang/Object`, no
/// `L`/`;` wrapper); array types wrap their element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JavaType {
    /// `V`
    Void,
    /// `Z`
    Boolean,
    /// `C`
    Char,
    /// `B`
    Byte,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `F`
    Float,
    /// `J`
    Long,
    /// `D`
    Double,
    /// `L<name>;`
    Object(String),
    /// `[<element>`
    Array(Box<JavaType>),
}

impl JavaType {
    /// `java/lang/Object` as a type.
    pub fn object() -> Self {
        JavaType::Object(crate::OBJECT_INTERNAL_NAME.into())
    }

    /// Construct an object type from an internal class name.
    pub fn of(internal_name: impl Into<String>) -> Self {
        JavaType::Object(internal_name.into())
    }

    /// Parse a single type descriptor, rejecting trailing characters.
    pub fn parse(desc: &str) -> Result<Self, TypeParseError> {
        let mut chars = desc.chars();
        let ty = Self::read(&mut chars, desc)?;
        if chars.next().is_some() {
            return Err(TypeParseError::Trailing(desc.into()));
        }
        Ok(ty)
    }

    /// Read one type from a character stream, leaving the rest in place.
    fn read(chars: &mut Chars<'_>, original: &str) -> Result<Self, TypeParseError> {
        let tag = chars
            .next()
            .ok_or_else(|| TypeParseError::Truncated(original.into()))?;

        let ty = match tag {
            'V' => JavaType::Void,
            'Z' => JavaType::Boolean,
            'C' => JavaType::Char,
            'B' => JavaType::Byte,
            'S' => JavaType::Short,
            'I' => JavaType::Int,
            'F' => JavaType::Float,
            'J' => JavaType::Long,
            'D' => JavaType::Double,
            'L' => {
                let name: String = chars.take_while(|c| *c != ';').collect();
                if name.is_empty() {
                    return Err(TypeParseError::Truncated(original.into()));
                }
                JavaType::Object(name)
            }
            '[' => JavaType::Array(Box::new(Self::read(chars, original)?)),
            other => return Err(TypeParseError::UnknownBaseType(other, original.into())),
        };

        Ok(ty)
    }

    /// Number of local-variable slots a value of this type occupies.
    ///
    /// `long` and `double` are wide (two slots); `void` occupies none.
    pub const fn size(&self) -> usize {
        match self {
            JavaType::Void => 0,
            JavaType::Long | JavaType::Double => 2,
            _ => 1,
        }
    }

    /// `true` for `long` and `double`.
    pub const fn is_wide(&self) -> bool {
        matches!(self, JavaType::Long | JavaType::Double)
    }

    /// `true` for any non-array, non-object type except `void`.
    pub const fn is_primitive(&self) -> bool {
        !matches!(
            self,
            JavaType::Void | JavaType::Object(_) | JavaType::Array(_)
        )
    }

    /// `true` for object and array types.
    pub const fn is_reference(&self) -> bool {
        matches!(self, JavaType::Object(_) | JavaType::Array(_))
    }

    /// The internal class name of an object type.
    pub fn internal_name(&self) -> Option<&str> {
        match self {
            JavaType::Object(name) => Some(name),
            _ => None,
        }
    }

    /// The internal name used by `checkcast`/`instanceof`/`anewarray`:
    /// the plain class name for objects, the full descriptor for arrays.
    pub fn reference_name(&self) -> Option<String> {
        match self {
            JavaType::Object(name) => Some(name.clone()),
            JavaType::Array(_) => Some(self.descriptor()),
            _ => None,
        }
    }

    /// The element type of an array, unwrapping nested dimensions.
    pub fn element_type(&self) -> &JavaType {
        match self {
            JavaType::Array(element) => element.element_type(),
            other => other,
        }
    }

    /// The boxed counterpart of a primitive type, as an internal name.
    pub const fn boxed_name(&self) -> Option<&'static str> {
        match self {
            JavaType::Boolean => Some("java/lang/Boolean"),
            JavaType::Char => Some("java/lang/Character"),
            JavaType::Byte => Some("java/lang/Byte"),
            JavaType::Short => Some("java/lang/Short"),
            JavaType::Int => Some("java/lang/Integer"),
            JavaType::Float => Some("java/lang/Float"),
            JavaType::Long => Some("java/lang/Long"),
            JavaType::Double => Some("java/lang/Double"),
            _ => None,
        }
    }

    /// Name and descriptor of the `<Boxed>.xxxValue()` unboxing method.
    pub fn unbox_method(&self) -> Option<(&'static str, String)> {
        let name = match self {
            JavaType::Boolean => "booleanValue",
            JavaType::Char => "charValue",
            JavaType::Byte => "byteValue",
            JavaType::Short => "shortValue",
            JavaType::Int => "intValue",
            JavaType::Float => "floatValue",
            JavaType::Long => "longValue",
            JavaType::Double => "doubleValue",
            _ => return None,
        };
        Some((name, format!("(){}", self.descriptor())))
    }

    /// Descriptor form of this type.
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    fn write_descriptor(&self, out: &mut String) {
        match self {
            JavaType::Void => out.push('V'),
            JavaType::Boolean => out.push('Z'),
            JavaType::Char => out.push('C'),
            JavaType::Byte => out.push('B'),
            JavaType::Short => out.push('S'),
            JavaType::Int => out.push('I'),
            JavaType::Float => out.push('F'),
            JavaType::Long => out.push('J'),
            JavaType::Double => out.push('D'),
            JavaType::Object(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
            JavaType::Array(element) => {
                out.push('[');
                element.write_descriptor(out);
            }
        }
    }
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// A parsed JVM method descriptor: argument types plus return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodDescriptor {
    /// Argument types, in declaration order.
    pub args: Vec<JavaType>,
    /// Return type.
    pub ret: JavaType,
}

impl MethodDescriptor {
    /// `()V`
    pub fn void() -> Self {
        Self {
            args: Vec::new(),
            ret: JavaType::Void,
        }
    }

    /// Parse a `(args...)ret` descriptor.
    pub fn parse(desc: &str) -> Result<Self, TypeParseError> {
        let mut chars = desc.chars();
        if chars.next() != Some('(') {
            return Err(TypeParseError::MalformedMethod(desc.into()));
        }

        let mut args = Vec::new();
        loop {
            // Peek for the closing paren without consuming a type tag.
            let rest = chars.as_str();
            match rest.chars().next() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some(_) => args.push(JavaType::read(&mut chars, desc)?),
                None => return Err(TypeParseError::MalformedMethod(desc.into())),
            }
        }

        let ret = JavaType::read(&mut chars, desc)?;
        if chars.next().is_some() {
            return Err(TypeParseError::Trailing(desc.into()));
        }

        Ok(Self { args, ret })
    }

    /// Total argument slot count, wide types counted twice.
    pub fn arg_slots(&self) -> usize {
        self.args.iter().map(JavaType::size).sum()
    }

    /// Copy of this descriptor with the return type replaced.
    pub fn with_return(&self, ret: JavaType) -> Self {
        Self {
            args: self.args.clone(),
            ret,
        }
    }

    /// Copy of this descriptor normalised to a `void` return.
    ///
    /// Used to key caches that only care about the argument list.
    pub fn normalised(&self) -> Self {
        self.with_return(JavaType::Void)
    }

    /// Descriptor string form.
    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for arg in &self.args {
            arg.write_descriptor(&mut out);
        }
        out.push(')');
        self.ret.write_descriptor(&mut out);
        out
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}
