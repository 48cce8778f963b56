//! Builtin library calls and the object protocol (`toString`, `equals`,
//! `hashCode`).

use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::warn;

use super::Runtime;
use super::interp::{Eval, Unwind};
use super::value::{Array, Object, ObjectKind, Value, format_double, quote_char, quote_str, string_hash};
use crate::compile::qualified_exception_name;
use crate::execute::RunException;

fn internal(message: impl Into<String>) -> Unwind {
    Unwind::Fatal(RunException::Internal(message.into()))
}

/// Value of a builtin static field.
pub(super) fn static_field(class: &str, name: &str) -> Option<Value> {
    let v = match (class, name) {
        ("Math", "PI") => Value::Double(std::f64::consts::PI),
        ("Math", "E") => Value::Double(std::f64::consts::E),
        ("Integer", "MAX_VALUE") => Value::Int(i32::MAX),
        ("Integer", "MIN_VALUE") => Value::Int(i32::MIN),
        ("Long", "MAX_VALUE") => Value::Long(i64::MAX),
        ("Long", "MIN_VALUE") => Value::Long(i64::MIN),
        ("Double", "MAX_VALUE") => Value::Double(f64::MAX),
        ("Double", "MIN_VALUE") => Value::Double(f64::from_bits(1)),
        ("Double", "POSITIVE_INFINITY") => Value::Double(f64::INFINITY),
        ("Double", "NEGATIVE_INFINITY") => Value::Double(f64::NEG_INFINITY),
        ("Double", "NaN") => Value::Double(f64::NAN),
        _ => return None,
    };
    Some(v)
}

/// JVM descriptor of an array class, e.g. `[I` or `[[Ljava.lang.String;`.
fn array_descriptor(elem: &str) -> String {
    let mut dims = 1;
    let mut base = elem;
    while let Some(inner) = base.strip_suffix("[]") {
        dims += 1;
        base = inner;
    }
    let code = match base {
        "int" => "I".to_string(),
        "long" => "J".to_string(),
        "double" => "D".to_string(),
        "boolean" => "Z".to_string(),
        "char" => "C".to_string(),
        "String" => "Ljava.lang.String;".to_string(),
        "Object" => "Ljava.lang.Object;".to_string(),
        other => format!("L{other};"),
    };
    format!("{}{code}", "[".repeat(dims))
}

/// `String.split` with the common patterns. Patterns are matched literally
/// apart from `\s+`, `\s*,\s*` and single escaped characters.
fn split(s: &str, pattern: &str) -> Vec<String> {
    let mut parts: Vec<String> = match pattern {
        "" => s.chars().map(String::from).collect(),
        "\\s+" | "\\s" | " +" => split_whitespace(s),
        "\\s*,\\s*" => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => {
            let literal = pattern.strip_prefix('\\').unwrap_or(pattern);
            if !s.contains(literal) {
                return vec![s.to_string()];
            }
            s.split(literal).map(str::to_string).collect()
        }
    };
    while parts.last().is_some_and(String::is_empty) {
        parts.pop();
    }
    parts
}

fn split_whitespace(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_gap = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_gap {
                parts.push(std::mem::take(&mut current));
                in_gap = true;
            }
        } else {
            current.push(c);
            in_gap = false;
        }
    }
    parts.push(current);
    parts
}

/// `String.compareTo` over UTF-16 units.
fn compare_strings(a: &str, b: &str) -> i32 {
    let mut left = a.encode_utf16();
    let mut right = b.encode_utf16();
    loop {
        match (left.next(), right.next()) {
            (Some(x), Some(y)) if x != y => return i32::from(x) - i32::from(y),
            (Some(_), Some(_)) => {}
            (Some(_), None) | (None, Some(_)) => {
                return a.encode_utf16().count() as i32 - b.encode_utf16().count() as i32;
            }
            (None, None) => return 0,
        }
    }
}

/// Char index of the match at `byte` in `s`.
fn char_index(s: &str, byte: usize) -> i32 {
    s[..byte].chars().count() as i32
}

/// Byte offset of char index `idx`, clamped to the end of `s`.
fn byte_offset(s: &str, idx: usize) -> usize {
    s.char_indices().nth(idx).map_or(s.len(), |(b, _)| b)
}

fn floor_div_i64(x: i64, y: i64) -> i64 {
    let q = x.wrapping_div(y);
    if x % y != 0 && ((x ^ y) < 0) { q - 1 } else { q }
}

fn floor_mod_i64(x: i64, y: i64) -> i64 {
    let r = x.wrapping_rem(y);
    if r != 0 && ((r ^ y) < 0) { r + y } else { r }
}

impl Runtime {
    fn str_arg(&self, args: &[Value], i: usize) -> Eval<Rc<str>> {
        match args.get(i) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(Value::Null) | None => Err(self.throw("NullPointerException", None)),
            Some(Value::Char(c)) => Ok(Rc::from(c.to_string().as_str())),
            Some(other) => Err(internal(format!("expected a string, got {other:?}"))),
        }
    }

    fn int_arg(&self, args: &[Value], i: usize) -> Eval<i32> {
        args.get(i)
            .and_then(Value::as_int)
            .ok_or_else(|| internal(format!("argument {i} is not an int")))
    }

    fn bool_arg(&self, args: &[Value], i: usize) -> Eval<bool> {
        match args.get(i) {
            Some(Value::Bool(b)) => Ok(*b),
            _ => Err(internal(format!("argument {i} is not a boolean"))),
        }
    }

    fn long_arg(&self, args: &[Value], i: usize) -> Eval<i64> {
        args.get(i)
            .and_then(Value::as_long)
            .ok_or_else(|| internal(format!("argument {i} is not a long")))
    }

    fn double_arg(&self, args: &[Value], i: usize) -> Eval<f64> {
        args.get(i)
            .and_then(Value::as_double)
            .ok_or_else(|| internal(format!("argument {i} is not numeric")))
    }

    fn char_arg(&self, args: &[Value], i: usize) -> Eval<char> {
        match args.get(i) {
            Some(Value::Char(c)) => Ok(*c),
            other => Err(internal(format!("expected a char, got {other:?}"))),
        }
    }

    fn number_format(&self, input: &str) -> Unwind {
        self.throw(
            "NumberFormatException",
            Some(format!("For input string: \"{input}\"")),
        )
    }

    /// Dispatch a library call by its resolved key.
    pub(super) fn builtin(&mut self, key: &str, receiver: Option<Value>, args: Vec<Value>) -> Eval<Value> {
        if let Some((owner, method)) = key.split_once('#') {
            let receiver = receiver.unwrap_or(Value::Null);
            if receiver.is_null() {
                return Err(self.throw(
                    "NullPointerException",
                    Some(format!("Cannot invoke \"{owner}.{method}()\" because value is null")),
                ));
            }
            return match (owner, &receiver) {
                ("String", Value::Str(s)) => self.string_method(method, s.clone(), &args),
                ("Enum", Value::Object(obj)) => match (&obj.kind, method) {
                    (ObjectKind::Enum { name, .. }, "name") => Ok(Value::str(name)),
                    (ObjectKind::Enum { ordinal, .. }, "ordinal") => Ok(Value::Int(*ordinal)),
                    _ => Err(internal(format!("{} is not an enum constant", obj.class))),
                },
                ("Throwable", Value::Object(obj)) => match method {
                    "getMessage" => Ok(obj.message().map_or(Value::Null, |m| Value::str(&m))),
                    "printStackTrace" => {
                        let text = self.stringify(&receiver)?;
                        self.write_err(&format!("{text}\n"));
                        Ok(Value::Null)
                    }
                    other => Err(internal(format!("unknown throwable method {other}"))),
                },
                _ => self.object_method(method, &receiver, &args),
            };
        }
        let (class, name) = key.rsplit_once('.').unwrap_or(("", key));
        match class {
            "System.out" | "System.err" | "IO" => self.print(class, name, &args),
            "System" => self.system(name, &args),
            "Math" => self.math(name, &args),
            "Integer" | "Long" | "Double" | "Boolean" => self.boxed(class, name, &args),
            "Character" => {
                let c = self.char_arg(&args, 0)?;
                Ok(match name {
                    "isDigit" => Value::Bool(c.is_ascii_digit()),
                    "isLetter" => Value::Bool(c.is_alphabetic()),
                    "isWhitespace" => Value::Bool(c.is_whitespace()),
                    "isUpperCase" => Value::Bool(c.is_uppercase()),
                    "isLowerCase" => Value::Bool(c.is_lowercase()),
                    "toUpperCase" => Value::Char(c.to_uppercase().next().unwrap_or(c)),
                    "toLowerCase" => Value::Char(c.to_lowercase().next().unwrap_or(c)),
                    "getNumericValue" => Value::Int(c.to_digit(36).map_or(-1, |d| d as i32)),
                    other => return Err(internal(format!("unknown builtin Character.{other}"))),
                })
            }
            "String" => match name {
                "valueOf" => {
                    let text = self.stringify(args.first().unwrap_or(&Value::Null))?;
                    Ok(Value::str(&text))
                }
                "join" => {
                    let delimiter = self.str_arg(&args, 0)?;
                    let items = match args.get(1) {
                        Some(Value::Array(a)) => a.items.borrow().clone(),
                        _ => return Err(self.throw("NullPointerException", None)),
                    };
                    let mut parts = Vec::with_capacity(items.len());
                    for item in &items {
                        parts.push(self.stringify(item)?);
                    }
                    Ok(Value::str(&parts.join(&delimiter)))
                }
                other => Err(internal(format!("unknown builtin String.{other}"))),
            },
            "Thread" => self.sleep(self.long_arg(&args, 0)?),
            "Objects" => {
                let first = args.first().cloned().unwrap_or(Value::Null);
                match name {
                    "equals" => {
                        let second = args.get(1).cloned().unwrap_or(Value::Null);
                        let eq = match (&first, &second) {
                            (Value::Null, Value::Null) => true,
                            (Value::Null, _) => false,
                            _ => self.equals_values(&first, &second)?,
                        };
                        Ok(Value::Bool(eq))
                    }
                    "toString" => Ok(Value::str(&self.stringify(&first)?)),
                    "isNull" => Ok(Value::Bool(first.is_null())),
                    "requireNonNull" if first.is_null() => Err(self.throw("NullPointerException", None)),
                    "requireNonNull" => Ok(first),
                    other => Err(internal(format!("unknown builtin Objects.{other}"))),
                }
            }
            _ => Err(internal(format!("unknown builtin {key}"))),
        }
    }

    fn print(&mut self, class: &str, name: &str, args: &[Value]) -> Eval<Value> {
        if class == "IO" && name == "readLine" {
            if let Some(prompt) = args.first() {
                let prompt = self.stringify(prompt)?;
                self.write_out(&prompt);
            }
            return match self.io.input.read_line() {
                Ok(Some(line)) => Ok(Value::str(&line)),
                Ok(None) => Ok(Value::Null),
                Err(e) => {
                    warn!("user input failed: {e}");
                    Ok(Value::Null)
                }
            };
        }
        let mut text = match args.first() {
            Some(v) => self.stringify(v)?,
            None => String::new(),
        };
        match name {
            "println" => text.push('\n'),
            "print" | "flush" => {}
            other => return Err(internal(format!("unknown builtin {class}.{other}"))),
        }
        if class == "System.err" {
            self.write_err(&text);
        } else {
            self.write_out(&text);
        }
        Ok(Value::Null)
    }

    fn system(&mut self, name: &str, args: &[Value]) -> Eval<Value> {
        Ok(match name {
            "currentTimeMillis" => Value::Long(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_millis() as i64),
            ),
            "nanoTime" => Value::Long(self.started.elapsed().as_nanos() as i64),
            "lineSeparator" => Value::str("\n"),
            "identityHashCode" => Value::Int(match args.first() {
                Some(Value::Object(o)) => o.identity as i32,
                Some(Value::Array(a)) => a.identity as i32,
                Some(Value::Null) | None => 0,
                Some(other) => self.hash_value(other)?,
            }),
            other => return Err(internal(format!("unknown builtin System.{other}"))),
        })
    }

    fn math(&mut self, name: &str, args: &[Value]) -> Eval<Value> {
        let first = args.first().cloned().unwrap_or(Value::Null);
        let second = args.get(1).cloned().unwrap_or(Value::Null);
        let either_double = matches!(first, Value::Double(_)) || matches!(second, Value::Double(_));
        let either_long = matches!(first, Value::Long(_)) || matches!(second, Value::Long(_));
        Ok(match name {
            "abs" => match first {
                Value::Int(i) => Value::Int(i.wrapping_abs()),
                Value::Char(c) => Value::Int(c as i32),
                Value::Long(l) => Value::Long(l.wrapping_abs()),
                Value::Double(d) => Value::Double(d.abs()),
                other => return Err(internal(format!("Math.abs of {other:?}"))),
            },
            "max" | "min" if either_double => {
                let (a, b) = (self.double_arg(args, 0)?, self.double_arg(args, 1)?);
                Value::Double(if name == "max" { a.max(b) } else { a.min(b) })
            }
            "max" | "min" if either_long => {
                let (a, b) = (self.long_arg(args, 0)?, self.long_arg(args, 1)?);
                Value::Long(if name == "max" { a.max(b) } else { a.min(b) })
            }
            "max" | "min" => {
                let (a, b) = (self.int_arg(args, 0)?, self.int_arg(args, 1)?);
                Value::Int(if name == "max" { a.max(b) } else { a.min(b) })
            }
            "floorMod" | "floorDiv" => {
                let (a, b) = (self.long_arg(args, 0)?, self.long_arg(args, 1)?);
                if b == 0 {
                    return Err(self.throw("ArithmeticException", Some("/ by zero".into())));
                }
                let r = if name == "floorMod" {
                    floor_mod_i64(a, b)
                } else {
                    floor_div_i64(a, b)
                };
                if either_long { Value::Long(r) } else { Value::Int(r as i32) }
            }
            "pow" => Value::Double(self.double_arg(args, 0)?.powf(self.double_arg(args, 1)?)),
            "sqrt" => Value::Double(self.double_arg(args, 0)?.sqrt()),
            "cbrt" => Value::Double(self.double_arg(args, 0)?.cbrt()),
            "floor" => Value::Double(self.double_arg(args, 0)?.floor()),
            "ceil" => Value::Double(self.double_arg(args, 0)?.ceil()),
            "round" => Value::Long((self.double_arg(args, 0)? + 0.5).floor() as i64),
            "random" => Value::Double(self.next_random()),
            "log" => Value::Double(self.double_arg(args, 0)?.ln()),
            "exp" => Value::Double(self.double_arg(args, 0)?.exp()),
            "sin" => Value::Double(self.double_arg(args, 0)?.sin()),
            "cos" => Value::Double(self.double_arg(args, 0)?.cos()),
            other => return Err(internal(format!("unknown builtin Math.{other}"))),
        })
    }

    fn boxed(&mut self, class: &str, name: &str, args: &[Value]) -> Eval<Value> {
        Ok(match (class, name) {
            ("Integer", "parseInt" | "valueOf") => match args.first() {
                Some(Value::Str(s)) => Value::Int(s.parse().map_err(|_| self.number_format(s))?),
                Some(Value::Null) => {
                    return Err(self.throw(
                        "NumberFormatException",
                        Some("Cannot parse null string: null".into()),
                    ));
                }
                _ => Value::Int(self.int_arg(args, 0)?),
            },
            ("Integer", "toString") => Value::str(&self.int_arg(args, 0)?.to_string()),
            ("Integer", "toBinaryString") => Value::str(&format!("{:b}", self.int_arg(args, 0)? as u32)),
            ("Integer", "toHexString") => Value::str(&format!("{:x}", self.int_arg(args, 0)? as u32)),
            ("Integer", "compare") => {
                Value::Int(self.int_arg(args, 0)?.cmp(&self.int_arg(args, 1)?) as i32)
            }
            ("Integer", "max") => Value::Int(self.int_arg(args, 0)?.max(self.int_arg(args, 1)?)),
            ("Integer", "min") => Value::Int(self.int_arg(args, 0)?.min(self.int_arg(args, 1)?)),
            ("Integer", "sum") => Value::Int(self.int_arg(args, 0)?.wrapping_add(self.int_arg(args, 1)?)),
            ("Long", "parseLong") => {
                let s = self.str_arg(args, 0)?;
                Value::Long(s.parse().map_err(|_| self.number_format(&s))?)
            }
            ("Long", "toString") => Value::str(&self.long_arg(args, 0)?.to_string()),
            ("Double", "parseDouble") => {
                let s = self.str_arg(args, 0)?;
                let trimmed = s.trim();
                let body = trimmed
                    .strip_suffix(['d', 'D', 'f', 'F'])
                    .unwrap_or(trimmed);
                let parsed = match body {
                    "NaN" => Some(f64::NAN),
                    "Infinity" | "+Infinity" => Some(f64::INFINITY),
                    "-Infinity" => Some(f64::NEG_INFINITY),
                    b if b.chars().any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E')) => None,
                    b => b.parse().ok(),
                };
                Value::Double(parsed.ok_or_else(|| self.number_format(&s))?)
            }
            ("Double", "toString") => Value::str(&format_double(self.double_arg(args, 0)?)),
            ("Double", "isNaN") => Value::Bool(self.double_arg(args, 0)?.is_nan()),
            ("Boolean", "parseBoolean") => Value::Bool(match args.first() {
                Some(Value::Str(s)) => s.eq_ignore_ascii_case("true"),
                _ => false,
            }),
            ("Boolean", "toString") => Value::str(&self.bool_arg(args, 0)?.to_string()),
            ("Boolean", "logicalXor") => Value::Bool(self.bool_arg(args, 0)? ^ self.bool_arg(args, 1)?),
            _ => return Err(internal(format!("unknown builtin {class}.{name}"))),
        })
    }

    /// Sleep in short slices so a stop request is honoured promptly.
    fn sleep(&mut self, millis: i64) -> Eval<Value> {
        if millis < 0 {
            return Err(self.throw(
                "IllegalArgumentException",
                Some("timeout value is negative".into()),
            ));
        }
        let deadline = Instant::now() + Duration::from_millis(millis as u64);
        loop {
            self.check_abort()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(Value::Null);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }

    fn string_method(&mut self, method: &str, s: Rc<str>, args: &[Value]) -> Eval<Value> {
        let len = s.chars().count();
        let out = match method {
            "length" => Value::Int(len as i32),
            "charAt" => {
                let i = self.int_arg(args, 0)?;
                match usize::try_from(i).ok().and_then(|i| s.chars().nth(i)) {
                    Some(c) => Value::Char(c),
                    None => {
                        return Err(self.throw(
                            "StringIndexOutOfBoundsException",
                            Some(format!("Index {i} out of bounds for length {len}")),
                        ));
                    }
                }
            }
            "substring" => {
                let begin = self.int_arg(args, 0)?;
                let end = match args.get(1) {
                    Some(_) => self.int_arg(args, 1)?,
                    None => len as i32,
                };
                if begin < 0 || end > len as i32 || begin > end {
                    return Err(self.throw(
                        "StringIndexOutOfBoundsException",
                        Some(format!("begin {begin}, end {end}, length {len}")),
                    ));
                }
                let sub: String = s
                    .chars()
                    .skip(begin as usize)
                    .take((end - begin) as usize)
                    .collect();
                Value::str(&sub)
            }
            "indexOf" => {
                let needle = self.str_arg(args, 0)?;
                let from = match args.get(1) {
                    Some(_) => self.int_arg(args, 1)?.max(0) as usize,
                    None => 0,
                };
                let start = byte_offset(&s, from);
                Value::Int(
                    s[start..]
                        .find(&*needle)
                        .map_or(-1, |b| char_index(&s, start + b)),
                )
            }
            "lastIndexOf" => {
                let needle = self.str_arg(args, 0)?;
                Value::Int(s.rfind(&*needle).map_or(-1, |b| char_index(&s, b)))
            }
            "contains" => Value::Bool(s.contains(&*self.str_arg(args, 0)?)),
            "startsWith" => Value::Bool(s.starts_with(&*self.str_arg(args, 0)?)),
            "endsWith" => Value::Bool(s.ends_with(&*self.str_arg(args, 0)?)),
            "isEmpty" => Value::Bool(s.is_empty()),
            "isBlank" => Value::Bool(s.trim().is_empty()),
            "toUpperCase" => Value::str(&s.to_uppercase()),
            "toLowerCase" => Value::str(&s.to_lowercase()),
            "trim" => Value::str(s.trim_matches(|c: char| c <= ' ')),
            "strip" => Value::str(s.trim()),
            "repeat" => {
                let n = self.int_arg(args, 0)?;
                if n < 0 {
                    return Err(self.throw(
                        "IllegalArgumentException",
                        Some(format!("count is negative: {n}")),
                    ));
                }
                Value::str(&s.repeat(n as usize))
            }
            "concat" => Value::str(&format!("{s}{}", self.str_arg(args, 0)?)),
            "equals" => Value::Bool(matches!(args.first(), Some(Value::Str(o)) if **o == *s)),
            "equalsIgnoreCase" => Value::Bool(match args.first() {
                Some(Value::Str(o)) => o.to_lowercase() == s.to_lowercase(),
                _ => false,
            }),
            "compareTo" => Value::Int(compare_strings(&s, &self.str_arg(args, 0)?)),
            "replace" => {
                let from = self.str_arg(args, 0)?;
                let to = self.str_arg(args, 1)?;
                Value::str(&s.replace(&*from, &to))
            }
            "split" => {
                let pattern = self.str_arg(args, 0)?;
                let parts = split(&s, &pattern)
                    .iter()
                    .map(|p| Value::str(p))
                    .collect();
                Value::Array(Array::new("String", parts))
            }
            "toCharArray" => Value::Array(Array::new("char", s.chars().map(Value::Char).collect())),
            "hashCode" => Value::Int(string_hash(&s)),
            "toString" => Value::Str(s),
            other => return Err(internal(format!("unknown String method {other}"))),
        };
        Ok(out)
    }

    fn object_method(&mut self, method: &str, receiver: &Value, args: &[Value]) -> Eval<Value> {
        match method {
            "toString" => Ok(Value::str(&self.stringify(receiver)?)),
            "equals" => {
                let other = args.first().cloned().unwrap_or(Value::Null);
                Ok(Value::Bool(self.equals_values(receiver, &other)?))
            }
            "hashCode" => Ok(Value::Int(self.hash_value(receiver)?)),
            other => Err(internal(format!("unknown Object method {other}"))),
        }
    }

    // ---- object protocol -----------------------------------------------

    /// `String.valueOf` semantics, honouring user `toString` overrides.
    pub(super) fn stringify(&mut self, v: &Value) -> Eval<String> {
        Ok(match v {
            Value::Null => "null".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Long(l) => l.to_string(),
            Value::Double(d) => format_double(*d),
            Value::Bool(b) => b.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Array(a) => format!("{}@{:x}", array_descriptor(&a.elem), a.identity),
            Value::Object(obj) => return self.object_to_string(obj),
        })
    }

    fn object_to_string(&mut self, obj: &Rc<Object>) -> Eval<String> {
        if let Some((entry, idx)) = self.find_method(&obj.class, "toString", "") {
            let v = self.call_member(entry, idx, Some(obj.clone()), Vec::new())?;
            return self.stringify(&v);
        }
        match &obj.kind {
            ObjectKind::Enum { name, .. } => Ok(name.clone()),
            ObjectKind::Record => {
                let components = self.record_components(obj);
                let mut parts = Vec::with_capacity(components.len());
                for name in components {
                    let v = obj.field(&name).unwrap_or(Value::Null);
                    parts.push(format!("{name}={}", self.stringify(&v)?));
                }
                Ok(format!("{}[{}]", obj.class, parts.join(", ")))
            }
            ObjectKind::Plain if self.instance_of(&obj.class, "Throwable") => {
                let name = qualified_exception_name(&obj.class);
                Ok(match obj.message() {
                    Some(m) => format!("{name}: {m}"),
                    None => name,
                })
            }
            ObjectKind::Plain => Ok(format!("{}@{:x}", obj.class, obj.identity)),
        }
    }

    /// Component names in declaration order; field order when the record
    /// type is no longer loaded.
    fn record_components(&self, obj: &Object) -> Vec<String> {
        match self.types.get(&obj.class) {
            Some(entry) => entry.decl.components.iter().map(|c| c.name.clone()).collect(),
            None => {
                let mut names: Vec<_> = obj.fields.borrow().keys().cloned().collect();
                names.sort();
                names
            }
        }
    }

    /// `Object.equals` semantics, honouring user overrides.
    pub(super) fn equals_values(&mut self, a: &Value, b: &Value) -> Eval<bool> {
        let Value::Object(obj) = a else {
            return Ok(a.same(b));
        };
        if let Some((entry, idx)) = self.find_method(&obj.class, "equals", "Object") {
            let v = self.call_member(entry, idx, Some(obj.clone()), vec![b.clone()])?;
            return Ok(matches!(v, Value::Bool(true)));
        }
        match b {
            Value::Object(other) if obj.kind == ObjectKind::Record && other.class == obj.class => {
                for name in self.record_components(obj) {
                    let x = obj.field(&name).unwrap_or(Value::Null);
                    let y = other.field(&name).unwrap_or(Value::Null);
                    let eq = match x {
                        Value::Null => y.is_null(),
                        _ => self.equals_values(&x, &y)?,
                    };
                    if !eq {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(a.same(b)),
        }
    }

    /// `Object.hashCode` semantics, honouring user overrides.
    pub(super) fn hash_value(&mut self, v: &Value) -> Eval<i32> {
        Ok(match v {
            Value::Null => 0,
            Value::Int(i) => *i,
            Value::Long(l) => (*l ^ ((*l as u64) >> 32) as i64) as i32,
            Value::Double(d) => {
                let bits = d.to_bits();
                (bits ^ (bits >> 32)) as i32
            }
            Value::Bool(b) => {
                if *b {
                    1231
                } else {
                    1237
                }
            }
            Value::Char(c) => *c as i32,
            Value::Str(s) => string_hash(s),
            Value::Array(a) => a.identity as i32,
            Value::Object(obj) => {
                if let Some((entry, idx)) = self.find_method(&obj.class, "hashCode", "") {
                    let v = self.call_member(entry, idx, Some(obj.clone()), Vec::new())?;
                    return Ok(v.as_int().unwrap_or(0));
                }
                if obj.kind != ObjectKind::Record {
                    return Ok(obj.identity as i32);
                }
                let mut h = 0i32;
                for name in self.record_components(obj) {
                    let field = obj.field(&name).unwrap_or(Value::Null);
                    h = h.wrapping_mul(31).wrapping_add(self.hash_value(&field)?);
                }
                h
            }
        })
    }

    /// Render a value the way the shell echoes it: strings and chars
    /// quoted, arrays with their contents.
    pub(super) fn display(&mut self, v: &Value) -> Eval<String> {
        match v {
            Value::Str(s) => Ok(quote_str(s)),
            Value::Char(c) => Ok(quote_char(*c)),
            Value::Array(a) => {
                let items = a.items.borrow().clone();
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    parts.push(self.display(item)?);
                }
                Ok(format!("{} {{ {} }}", a.type_label(), parts.join(", ")))
            }
            other => self.stringify(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_drops_trailing_empties() {
        assert_eq!(split("a,b,,", ","), vec!["a", "b"]);
        assert_eq!(split(",a", ","), vec!["", "a"]);
        assert_eq!(split("abc", ","), vec!["abc"]);
        assert!(split(",,", ",").is_empty());
        assert_eq!(split("a.b", "\\."), vec!["a", "b"]);
    }

    #[test]
    fn test_split_whitespace_runs() {
        assert_eq!(split("a  b\tc", "\\s+"), vec!["a", "b", "c"]);
        assert_eq!(split(" a b", "\\s+"), vec!["", "a", "b"]);
    }

    #[test]
    fn test_compare_strings() {
        assert_eq!(compare_strings("Ab", "Ac"), -1);
        assert_eq!(compare_strings("abc", "ab"), 1);
        assert_eq!(compare_strings("same", "same"), 0);
    }

    #[test]
    fn test_floor_arithmetic() {
        assert_eq!(floor_mod_i64(-7, 3), 2);
        assert_eq!(floor_div_i64(-7, 3), -3);
        assert_eq!(floor_mod_i64(7, -3), -2);
    }

    #[test]
    fn test_array_descriptor() {
        assert_eq!(array_descriptor("int"), "[I");
        assert_eq!(array_descriptor("String[]"), "[[Ljava.lang.String;");
        assert_eq!(array_descriptor("Point"), "[LPoint;");
    }
}
