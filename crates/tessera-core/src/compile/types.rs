//! Static types of the reference language.

use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::syntax::Span;
use crate::syntax::ast::TypeRef;

/// A resolved static type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize)]
pub enum Ty {
    Int,
    Long,
    Double,
    Boolean,
    Char,
    Str,
    Void,
    /// Type of the `null` literal.
    Null,
    Object,
    /// User type or builtin exception class, by simple name.
    Class(String),
    Array(Box<Ty>),
    /// Imported library type or type variable; accepted but not modeled.
    Opaque(String),
    /// Type of an expression that already produced a diagnostic.
    Error,
}

/// Builtin throwable classes and their superclass.
pub const BUILTIN_THROWABLES: &[(&str, Option<&str>)] = &[
    ("Throwable", None),
    ("Exception", Some("Throwable")),
    ("Error", Some("Throwable")),
    ("RuntimeException", Some("Exception")),
    ("InterruptedException", Some("Exception")),
    ("IllegalArgumentException", Some("RuntimeException")),
    ("IllegalStateException", Some("RuntimeException")),
    ("ArithmeticException", Some("RuntimeException")),
    ("NullPointerException", Some("RuntimeException")),
    ("ClassCastException", Some("RuntimeException")),
    ("IndexOutOfBoundsException", Some("RuntimeException")),
    ("ArrayIndexOutOfBoundsException", Some("IndexOutOfBoundsException")),
    ("StringIndexOutOfBoundsException", Some("IndexOutOfBoundsException")),
    ("NegativeArraySizeException", Some("RuntimeException")),
    ("NumberFormatException", Some("IllegalArgumentException")),
    ("UnsupportedOperationException", Some("RuntimeException")),
    ("StackOverflowError", Some("Error")),
];

/// Superclass of a builtin throwable, or `None` when `name` is not one.
pub fn builtin_super(name: &str) -> Option<Option<&'static str>> {
    BUILTIN_THROWABLES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, sup)| *sup)
}

pub fn is_builtin_throwable(name: &str) -> bool {
    builtin_super(name).is_some()
}

/// Fully qualified name used when reporting builtin exceptions.
pub fn qualified_exception_name(name: &str) -> String {
    if is_builtin_throwable(name) {
        format!("java.lang.{name}")
    } else {
        name.to_string()
    }
}

impl Ty {
    /// Map a primitive or `java.lang` type name; `None` for everything else.
    pub fn builtin(name: &str) -> Option<Ty> {
        let ty = match name {
            "int" | "short" | "byte" | "Integer" | "Short" | "Byte" => Ty::Int,
            "long" | "Long" => Ty::Long,
            "double" | "float" | "Double" | "Float" => Ty::Double,
            "boolean" | "Boolean" => Ty::Boolean,
            "char" | "Character" => Ty::Char,
            "void" => Ty::Void,
            "String" | "CharSequence" => Ty::Str,
            "Object" => Ty::Object,
            other if is_builtin_throwable(other) => Ty::Class(other.to_string()),
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Long | Ty::Double | Ty::Char)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Ty::Int | Ty::Long | Ty::Char)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Ty::Int | Ty::Long | Ty::Double | Ty::Boolean | Ty::Char | Ty::Void
        )
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Ty::Str | Ty::Null | Ty::Object | Ty::Class(_) | Ty::Array(_) | Ty::Opaque(_)
        )
    }

    /// True for types that suppress follow-up diagnostics.
    pub fn is_lenient(&self) -> bool {
        matches!(self, Ty::Error | Ty::Opaque(_))
    }

    /// Binary numeric promotion.
    pub fn promote(a: &Ty, b: &Ty) -> Ty {
        match (a, b) {
            (Ty::Double, _) | (_, Ty::Double) => Ty::Double,
            (Ty::Long, _) | (_, Ty::Long) => Ty::Long,
            _ => Ty::Int,
        }
    }

    /// Primitive widening (`int` to `long` and `double`, `char` to `int`).
    pub fn widens_to(&self, to: &Ty) -> bool {
        matches!(
            (self, to),
            (Ty::Int, Ty::Long | Ty::Double)
                | (Ty::Long, Ty::Double)
                | (Ty::Char, Ty::Int | Ty::Long | Ty::Double)
        )
    }

    /// The written form of a type for synthesized casts.
    pub fn to_type_ref(&self, span: Span) -> TypeRef {
        match self {
            Ty::Array(elem) => {
                let mut inner = elem.to_type_ref(span);
                inner.dims += 1;
                inner
            }
            other => TypeRef::simple(&other.to_string(), span),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int => f.write_str("int"),
            Ty::Long => f.write_str("long"),
            Ty::Double => f.write_str("double"),
            Ty::Boolean => f.write_str("boolean"),
            Ty::Char => f.write_str("char"),
            Ty::Str => f.write_str("String"),
            Ty::Void => f.write_str("void"),
            Ty::Null => f.write_str("<null>"),
            Ty::Object => f.write_str("Object"),
            Ty::Class(name) | Ty::Opaque(name) => f.write_str(name),
            Ty::Array(elem) => write!(f, "{elem}[]"),
            Ty::Error => f.write_str("<any>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(Ty::builtin("int"), Some(Ty::Int));
        assert_eq!(Ty::builtin("Integer"), Some(Ty::Int));
        assert_eq!(Ty::builtin("String"), Some(Ty::Str));
        assert_eq!(
            Ty::builtin("IllegalStateException"),
            Some(Ty::Class("IllegalStateException".into()))
        );
        assert_eq!(Ty::builtin("List"), None);
    }

    #[test]
    fn test_promotion_and_widening() {
        assert_eq!(Ty::promote(&Ty::Int, &Ty::Long), Ty::Long);
        assert_eq!(Ty::promote(&Ty::Char, &Ty::Int), Ty::Int);
        assert_eq!(Ty::promote(&Ty::Long, &Ty::Double), Ty::Double);
        assert!(Ty::Int.widens_to(&Ty::Double));
        assert!(!Ty::Double.widens_to(&Ty::Int));
    }

    #[test]
    fn test_display() {
        assert_eq!(Ty::Array(Box::new(Ty::Int)).to_string(), "int[]");
        assert_eq!(Ty::Class("Point".into()).to_string(), "Point");
    }

    #[test]
    fn test_throwable_hierarchy() {
        assert_eq!(builtin_super("NumberFormatException"), Some(Some("IllegalArgumentException")));
        assert_eq!(builtin_super("Throwable"), Some(None));
        assert_eq!(builtin_super("Point"), None);
        assert_eq!(qualified_exception_name("ArithmeticException"), "java.lang.ArithmeticException");
    }
}
