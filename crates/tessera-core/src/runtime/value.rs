//! Runtime values.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::compile::Ty;
use crate::syntax::ast::TypeRef;

thread_local! {
    static NEXT_IDENTITY: Cell<u32> = const { Cell::new(1) };
}

/// Pseudo identity hash, stable for the lifetime of an object.
fn next_identity() -> u32 {
    NEXT_IDENTITY.with(|n| {
        let id = n.get();
        n.set(id.wrapping_add(1));
        id.wrapping_mul(0x9E37_79B1) >> 1
    })
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(Rc<str>),
    Array(Rc<Array>),
    Object(Rc<Object>),
}

#[derive(Debug)]
pub struct Array {
    /// Written element type, e.g. `int` or `String[]`.
    pub elem: String,
    pub items: RefCell<Vec<Value>>,
    pub identity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    Record,
    Enum { ordinal: i32, name: String },
}

#[derive(Debug)]
pub struct Object {
    pub class: String,
    pub kind: ObjectKind,
    pub fields: RefCell<FxHashMap<String, Value>>,
    pub identity: u32,
}

/// Field holding a throwable's detail message.
pub const MESSAGE_FIELD: &str = "$message";

impl Object {
    pub fn new(class: &str, kind: ObjectKind) -> Rc<Self> {
        Rc::new(Self {
            class: class.to_string(),
            kind,
            fields: RefCell::new(FxHashMap::default()),
            identity: next_identity(),
        })
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    pub fn set_field(&self, name: &str, value: Value) {
        self.fields.borrow_mut().insert(name.to_string(), value);
    }

    pub fn message(&self) -> Option<String> {
        match self.field(MESSAGE_FIELD) {
            Some(Value::Str(s)) => Some(s.to_string()),
            _ => None,
        }
    }
}

impl Array {
    pub fn new(elem: &str, items: Vec<Value>) -> Rc<Self> {
        Rc::new(Self {
            elem: elem.to_string(),
            items: RefCell::new(items),
            identity: next_identity(),
        })
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// `int[3]`, `int[2][]`.
    pub fn type_label(&self) -> String {
        let (base, rest) = match self.elem.find('[') {
            Some(i) => self.elem.split_at(i),
            None => (self.elem.as_str(), ""),
        };
        format!("{base}[{}]{rest}", self.len())
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Char(c) => Some(*c as i32),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            Value::Char(c) => Some(i64::from(*c as u32)),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(f64::from(*v)),
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Char(c) => Some(f64::from(*c as u32)),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Long(_) | Value::Double(_) | Value::Char(_)
        )
    }

    /// Convert a numeric value to the primitive named by `ty`. Other names
    /// leave the value unchanged.
    pub fn convert(&self, ty: &str) -> Value {
        match (ty, self) {
            ("int", v) if v.is_numeric() => Value::Int(match v {
                Value::Double(d) => *d as i32,
                Value::Long(l) => *l as i32,
                other => other.as_int().unwrap_or(0),
            }),
            ("long", v) if v.is_numeric() => Value::Long(match v {
                Value::Double(d) => *d as i64,
                other => other.as_long().unwrap_or(0),
            }),
            ("double", v) if v.is_numeric() => Value::Double(v.as_double().unwrap_or(0.0)),
            ("char", v) if v.is_numeric() => {
                let code = match v {
                    Value::Double(d) => *d as i64,
                    other => other.as_long().unwrap_or(0),
                };
                Value::Char(char::from_u32(code as u16 as u32).unwrap_or('\u{fffd}'))
            }
            _ => self.clone(),
        }
    }

    /// Reference identity, value equality for primitives and strings.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (a, b) if a.is_numeric() && b.is_numeric() => match (a, b) {
                (Value::Double(_), _) | (_, Value::Double(_)) => a.as_double() == b.as_double(),
                _ => a.as_long() == b.as_long(),
            },
            _ => false,
        }
    }
}

/// Default value of a declared type.
pub fn default_for(ty: &Ty) -> Value {
    match ty {
        Ty::Int => Value::Int(0),
        Ty::Long => Value::Long(0),
        Ty::Double => Value::Double(0.0),
        Ty::Boolean => Value::Bool(false),
        Ty::Char => Value::Char('\0'),
        _ => Value::Null,
    }
}

/// Default value of an array element of the written type.
pub fn default_for_ref(ty: &TypeRef) -> Value {
    if ty.dims > 0 {
        return Value::Null;
    }
    match ty.name.as_str() {
        "int" => Value::Int(0),
        "long" => Value::Long(0),
        "double" => Value::Double(0.0),
        "boolean" => Value::Bool(false),
        "char" => Value::Char('\0'),
        _ => Value::Null,
    }
}

/// `Double.toString` formatting.
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let magnitude = d.abs();
    if (1e-3..1e7).contains(&magnitude) {
        let s = d.to_string();
        return if s.contains('.') { s } else { format!("{s}.0") };
    }
    let s = format!("{d:e}");
    let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
    if mantissa.contains('.') {
        format!("{mantissa}E{exp}")
    } else {
        format!("{mantissa}.0E{exp}")
    }
}

/// `String.hashCode` over UTF-16 units.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Quote a string the way the shell echoes literals.
pub fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        escape_into(&mut out, c, '"');
    }
    out.push('"');
    out
}

pub fn quote_char(c: char) -> String {
    let mut out = String::from("'");
    escape_into(&mut out, c, '\'');
    out.push('\'');
    out
}

fn escape_into(out: &mut String, c: char, quote: char) {
    match c {
        '\n' => out.push_str("\\n"),
        '\t' => out.push_str("\\t"),
        '\r' => out.push_str("\\r"),
        '\0' => out.push_str("\\000"),
        '\\' => out.push_str("\\\\"),
        c if c == quote => {
            out.push('\\');
            out.push(c);
        }
        c => out.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(3.0), "3.0");
        assert_eq!(format_double(0.1), "0.1");
        assert_eq!(format_double(-2.5), "-2.5");
        assert_eq!(format_double(1e10), "1.0E10");
        assert_eq!(format_double(1.5e-5), "1.5E-5");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_hash_matches_java() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("hello"), 99162322);
    }

    #[test]
    fn test_narrowing_conversions() {
        assert!(matches!(Value::Double(3.9).convert("int"), Value::Int(3)));
        assert!(matches!(Value::Long(1 << 33).convert("int"), Value::Int(0)));
        assert!(matches!(Value::Int(65).convert("char"), Value::Char('A')));
        assert!(matches!(Value::Char('a').convert("int"), Value::Int(97)));
    }

    #[test]
    fn test_array_label() {
        let arr = Array::new("int", vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(arr.type_label(), "int[2]");
        let nested = Array::new("int[]", vec![Value::Null]);
        assert_eq!(nested.type_label(), "int[1][]");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_str("a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(quote_char('\''), "'\\''");
    }

    #[test]
    fn test_same() {
        assert!(Value::Int(1).same(&Value::Long(1)));
        assert!(Value::str("a").same(&Value::str("a")));
        let a = Object::new("P", ObjectKind::Plain);
        assert!(Value::Object(a.clone()).same(&Value::Object(a)));
        assert!(!Value::Object(Object::new("P", ObjectKind::Plain))
            .same(&Value::Object(Object::new("P", ObjectKind::Plain))));
    }
}
