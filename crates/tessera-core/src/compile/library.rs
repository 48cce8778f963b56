//! Signatures of the builtin library.
//!
//! Keys returned here are the contract with the runtime: static entries are
//! `Class.name`, instance entries `Receiver#name`.

use super::Ty;

/// Builtin classes usable as qualifiers.
pub const BUILTIN_CLASSES: &[&str] = &[
    "System", "Math", "Integer", "Long", "Double", "Boolean", "Character", "String", "Thread",
    "IO", "Objects",
];

/// Parameter pattern.
#[derive(Clone, Copy)]
enum P {
    Int,
    Long,
    Double,
    Num,
    Bool,
    Char,
    Str,
    Any,
    StrArray,
}

/// Result pattern.
#[derive(Clone, Copy)]
enum R {
    Fixed(FixedTy),
    /// Type of the first argument, promoted to at least `int`.
    First,
    /// Binary numeric promotion of the first two arguments.
    Promote,
}

#[derive(Clone, Copy)]
enum FixedTy {
    Int,
    Long,
    Double,
    Bool,
    Char,
    Str,
    Void,
    StrArray,
    CharArray,
}

impl FixedTy {
    fn ty(self) -> Ty {
        match self {
            FixedTy::Int => Ty::Int,
            FixedTy::Long => Ty::Long,
            FixedTy::Double => Ty::Double,
            FixedTy::Bool => Ty::Boolean,
            FixedTy::Char => Ty::Char,
            FixedTy::Str => Ty::Str,
            FixedTy::Void => Ty::Void,
            FixedTy::StrArray => Ty::Array(Box::new(Ty::Str)),
            FixedTy::CharArray => Ty::Array(Box::new(Ty::Char)),
        }
    }
}

const INT: R = R::Fixed(FixedTy::Int);
const LONG: R = R::Fixed(FixedTy::Long);
const DOUBLE: R = R::Fixed(FixedTy::Double);
const BOOL: R = R::Fixed(FixedTy::Bool);
const CHAR: R = R::Fixed(FixedTy::Char);
const STR: R = R::Fixed(FixedTy::Str);
const VOID: R = R::Fixed(FixedTy::Void);
const STR_ARRAY: R = R::Fixed(FixedTy::StrArray);
const CHAR_ARRAY: R = R::Fixed(FixedTy::CharArray);

type Entry = (&'static str, &'static str, &'static [P], R);

const STATICS: &[Entry] = &[
    ("System.out", "println", &[], VOID),
    ("System.out", "println", &[P::Any], VOID),
    ("System.out", "print", &[P::Any], VOID),
    ("System.out", "flush", &[], VOID),
    ("System.err", "println", &[], VOID),
    ("System.err", "println", &[P::Any], VOID),
    ("System.err", "print", &[P::Any], VOID),
    ("System.err", "flush", &[], VOID),
    ("System", "currentTimeMillis", &[], LONG),
    ("System", "nanoTime", &[], LONG),
    ("System", "lineSeparator", &[], STR),
    ("System", "identityHashCode", &[P::Any], INT),
    ("Math", "abs", &[P::Num], R::First),
    ("Math", "max", &[P::Num, P::Num], R::Promote),
    ("Math", "min", &[P::Num, P::Num], R::Promote),
    ("Math", "floorMod", &[P::Num, P::Num], R::Promote),
    ("Math", "floorDiv", &[P::Num, P::Num], R::Promote),
    ("Math", "pow", &[P::Double, P::Double], DOUBLE),
    ("Math", "sqrt", &[P::Double], DOUBLE),
    ("Math", "cbrt", &[P::Double], DOUBLE),
    ("Math", "floor", &[P::Double], DOUBLE),
    ("Math", "ceil", &[P::Double], DOUBLE),
    ("Math", "round", &[P::Double], LONG),
    ("Math", "random", &[], DOUBLE),
    ("Math", "log", &[P::Double], DOUBLE),
    ("Math", "exp", &[P::Double], DOUBLE),
    ("Math", "sin", &[P::Double], DOUBLE),
    ("Math", "cos", &[P::Double], DOUBLE),
    ("Integer", "parseInt", &[P::Str], INT),
    ("Integer", "valueOf", &[P::Str], INT),
    ("Integer", "valueOf", &[P::Int], INT),
    ("Integer", "toString", &[P::Int], STR),
    ("Integer", "toBinaryString", &[P::Int], STR),
    ("Integer", "toHexString", &[P::Int], STR),
    ("Integer", "compare", &[P::Int, P::Int], INT),
    ("Integer", "max", &[P::Int, P::Int], INT),
    ("Integer", "min", &[P::Int, P::Int], INT),
    ("Integer", "sum", &[P::Int, P::Int], INT),
    ("Long", "parseLong", &[P::Str], LONG),
    ("Long", "toString", &[P::Long], STR),
    ("Double", "parseDouble", &[P::Str], DOUBLE),
    ("Double", "toString", &[P::Double], STR),
    ("Double", "isNaN", &[P::Double], BOOL),
    ("Boolean", "parseBoolean", &[P::Str], BOOL),
    ("Boolean", "toString", &[P::Bool], STR),
    ("Boolean", "logicalXor", &[P::Bool, P::Bool], BOOL),
    ("Character", "isDigit", &[P::Char], BOOL),
    ("Character", "isLetter", &[P::Char], BOOL),
    ("Character", "isWhitespace", &[P::Char], BOOL),
    ("Character", "isUpperCase", &[P::Char], BOOL),
    ("Character", "isLowerCase", &[P::Char], BOOL),
    ("Character", "toUpperCase", &[P::Char], CHAR),
    ("Character", "toLowerCase", &[P::Char], CHAR),
    ("Character", "getNumericValue", &[P::Char], INT),
    ("String", "valueOf", &[P::Any], STR),
    ("String", "join", &[P::Str, P::StrArray], STR),
    ("Thread", "sleep", &[P::Long], VOID),
    ("IO", "readLine", &[], STR),
    ("IO", "readLine", &[P::Any], STR),
    ("IO", "println", &[], VOID),
    ("IO", "println", &[P::Any], VOID),
    ("IO", "print", &[P::Any], VOID),
    ("Objects", "equals", &[P::Any, P::Any], BOOL),
    ("Objects", "toString", &[P::Any], STR),
    ("Objects", "isNull", &[P::Any], BOOL),
    ("Objects", "requireNonNull", &[P::Any], R::First),
];

const STATIC_FIELDS: &[(&str, &str, FixedTy)] = &[
    ("Math", "PI", FixedTy::Double),
    ("Math", "E", FixedTy::Double),
    ("Integer", "MAX_VALUE", FixedTy::Int),
    ("Integer", "MIN_VALUE", FixedTy::Int),
    ("Long", "MAX_VALUE", FixedTy::Long),
    ("Long", "MIN_VALUE", FixedTy::Long),
    ("Double", "MAX_VALUE", FixedTy::Double),
    ("Double", "MIN_VALUE", FixedTy::Double),
    ("Double", "POSITIVE_INFINITY", FixedTy::Double),
    ("Double", "NEGATIVE_INFINITY", FixedTy::Double),
    ("Double", "NaN", FixedTy::Double),
];

const STRING_METHODS: &[(&str, &[P], R)] = &[
    ("length", &[], INT),
    ("charAt", &[P::Int], CHAR),
    ("substring", &[P::Int], STR),
    ("substring", &[P::Int, P::Int], STR),
    ("indexOf", &[P::Str], INT),
    ("indexOf", &[P::Char], INT),
    ("indexOf", &[P::Str, P::Int], INT),
    ("lastIndexOf", &[P::Str], INT),
    ("lastIndexOf", &[P::Char], INT),
    ("contains", &[P::Str], BOOL),
    ("startsWith", &[P::Str], BOOL),
    ("endsWith", &[P::Str], BOOL),
    ("isEmpty", &[], BOOL),
    ("isBlank", &[], BOOL),
    ("toUpperCase", &[], STR),
    ("toLowerCase", &[], STR),
    ("trim", &[], STR),
    ("strip", &[], STR),
    ("repeat", &[P::Int], STR),
    ("concat", &[P::Str], STR),
    ("equals", &[P::Any], BOOL),
    ("equalsIgnoreCase", &[P::Str], BOOL),
    ("compareTo", &[P::Str], INT),
    ("replace", &[P::Str, P::Str], STR),
    ("replace", &[P::Char, P::Char], STR),
    ("split", &[P::Str], STR_ARRAY),
    ("toCharArray", &[], CHAR_ARRAY),
    ("hashCode", &[], INT),
    ("toString", &[], STR),
];

const OBJECT_METHODS: &[(&str, &[P], R)] = &[
    ("toString", &[], STR),
    ("equals", &[P::Any], BOOL),
    ("hashCode", &[], INT),
];

const THROWABLE_METHODS: &[(&str, &[P], R)] = &[
    ("getMessage", &[], STR),
    ("printStackTrace", &[], VOID),
];

const ENUM_METHODS: &[(&str, &[P], R)] = &[("name", &[], STR), ("ordinal", &[], INT)];

fn accepts(p: P, arg: &Ty) -> bool {
    if arg.is_lenient() {
        return true;
    }
    match p {
        P::Int => matches!(arg, Ty::Int | Ty::Char),
        P::Long => matches!(arg, Ty::Int | Ty::Long | Ty::Char),
        P::Double | P::Num => arg.is_numeric(),
        P::Bool => *arg == Ty::Boolean,
        P::Char => *arg == Ty::Char,
        P::Str => matches!(arg, Ty::Str | Ty::Null),
        P::Any => *arg != Ty::Void,
        P::StrArray => matches!(arg, Ty::Null) || *arg == Ty::Array(Box::new(Ty::Str)),
    }
}

fn result(r: R, args: &[Ty]) -> Ty {
    match r {
        R::Fixed(t) => t.ty(),
        R::First => match args.first() {
            Some(t) if t.is_numeric() => Ty::promote(t, &Ty::Int),
            Some(t) => t.clone(),
            None => Ty::Error,
        },
        R::Promote => match (args.first(), args.get(1)) {
            (Some(a), Some(b)) => Ty::promote(a, b),
            _ => Ty::Error,
        },
    }
}

/// Outcome of looking a builtin up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Resolved to a runtime key and result type.
    Found { key: String, ty: Ty },
    /// The name exists but no overload accepts the arguments.
    Inapplicable,
    Missing,
}

fn find(
    owner: &str,
    key_sep: char,
    entries: impl Iterator<Item = (&'static str, &'static [P], R)>,
    name: &str,
    args: &[Ty],
) -> Lookup {
    let mut named = false;
    for (n, params, r) in entries {
        if n != name {
            continue;
        }
        named = true;
        if params.len() == args.len() && params.iter().zip(args).all(|(p, a)| accepts(*p, a)) {
            return Lookup::Found {
                key: format!("{owner}{key_sep}{name}"),
                ty: result(r, args),
            };
        }
    }
    if named {
        Lookup::Inapplicable
    } else {
        Lookup::Missing
    }
}

/// Names reachable as `class.<name>`: static methods, static fields and
/// nested qualifiers such as `System.out`.
pub fn static_members(class: &str) -> Vec<&'static str> {
    let nested = STATICS.iter().filter_map(|&(owner, ..)| {
        owner
            .strip_prefix(class)
            .and_then(|rest| rest.strip_prefix('.'))
    });
    let mut names: Vec<&'static str> = STATICS
        .iter()
        .filter(|&&(owner, ..)| owner == class)
        .map(|&(_, name, ..)| name)
        .chain(
            STATIC_FIELDS
                .iter()
                .filter(|&&(owner, ..)| owner == class)
                .map(|&(_, name, _)| name),
        )
        .chain(nested)
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

/// Static method of a builtin class, or of `System.out`/`System.err`.
pub fn static_method(class: &str, name: &str, args: &[Ty]) -> Lookup {
    let entries = STATICS
        .iter()
        .filter(|(c, ..)| *c == class)
        .map(|(_, n, p, r)| (*n, *p, *r));
    find(class, '.', entries, name, args)
}

pub fn static_field(class: &str, name: &str) -> Option<Ty> {
    STATIC_FIELDS
        .iter()
        .find(|(c, n, _)| *c == class && *n == name)
        .map(|(_, _, t)| t.ty())
}

pub fn string_method(name: &str, args: &[Ty]) -> Lookup {
    find("String", '#', STRING_METHODS.iter().copied(), name, args)
}

pub fn object_method(name: &str, args: &[Ty]) -> Lookup {
    find("Object", '#', OBJECT_METHODS.iter().copied(), name, args)
}

pub fn throwable_method(name: &str, args: &[Ty]) -> Lookup {
    find("Throwable", '#', THROWABLE_METHODS.iter().copied(), name, args)
}

pub fn enum_method(name: &str, args: &[Ty]) -> Lookup {
    find("Enum", '#', ENUM_METHODS.iter().copied(), name, args)
}

pub fn is_builtin_class(name: &str) -> bool {
    BUILTIN_CLASSES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_lookup() {
        assert_eq!(
            static_method("Math", "max", &[Ty::Int, Ty::Double]),
            Lookup::Found {
                key: "Math.max".into(),
                ty: Ty::Double
            }
        );
        assert_eq!(
            static_method("Integer", "parseInt", &[Ty::Int]),
            Lookup::Inapplicable
        );
        assert_eq!(static_method("Math", "nope", &[]), Lookup::Missing);
        assert_eq!(
            static_method("System.out", "println", &[Ty::Str]),
            Lookup::Found {
                key: "System.out.println".into(),
                ty: Ty::Void
            }
        );
    }

    #[test]
    fn test_boolean_parameters() {
        assert_eq!(
            static_method("Boolean", "logicalXor", &[Ty::Boolean, Ty::Boolean]),
            Lookup::Found {
                key: "Boolean.logicalXor".into(),
                ty: Ty::Boolean
            }
        );
        assert_eq!(
            static_method("Boolean", "toString", &[Ty::Int]),
            Lookup::Inapplicable
        );
    }

    #[test]
    fn test_static_members() {
        let system = static_members("System");
        assert!(system.contains(&"out"));
        assert!(system.contains(&"identityHashCode"));
        let math = static_members("Math");
        assert!(math.contains(&"PI"));
        assert_eq!(math.iter().filter(|n| **n == "max").count(), 1);
        assert_eq!(static_members("System.out"), ["flush", "print", "println"]);
        assert!(static_members("Nowhere").is_empty());
    }

    #[test]
    fn test_instance_lookup() {
        assert_eq!(
            string_method("length", &[]),
            Lookup::Found {
                key: "String#length".into(),
                ty: Ty::Int
            }
        );
        assert_eq!(
            string_method("charAt", &[Ty::Char]),
            Lookup::Found {
                key: "String#charAt".into(),
                ty: Ty::Char
            }
        );
        assert!(matches!(throwable_method("getMessage", &[]), Lookup::Found { .. }));
    }

    #[test]
    fn test_abs_keeps_argument_type() {
        assert_eq!(
            static_method("Math", "abs", &[Ty::Long]),
            Lookup::Found {
                key: "Math.abs".into(),
                ty: Ty::Long
            }
        );
    }

    #[test]
    fn test_static_fields() {
        assert_eq!(static_field("Integer", "MAX_VALUE"), Some(Ty::Int));
        assert_eq!(static_field("Math", "TAU"), None);
    }
}
