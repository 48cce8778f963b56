//! Tree-walking evaluation of bound syntax.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::value::{self, Array, MESSAGE_FIELD, Object, ObjectKind, Value};
use super::{MAX_DEPTH, Runtime, TypeEntry};
use crate::compile::{Ty, is_builtin_throwable};
use crate::execute::RunException;
use crate::syntax::ast::*;

/// Non-local exit from evaluation.
#[derive(Debug)]
pub(crate) enum Unwind {
    /// User-visible exception object.
    Throw(Value),
    /// The abort handle fired.
    Stop,
    Fatal(RunException),
}

pub(super) type Eval<T> = Result<T, Unwind>;

pub(super) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub(super) struct Frame {
    scopes: Vec<FxHashMap<String, Value>>,
    this: Option<Rc<Object>>,
    /// Declaring type of the code being run.
    class: Option<String>,
}

impl Frame {
    /// Frame for snippet-level code.
    pub(super) fn top() -> Self {
        Self::new(None, None)
    }

    fn new(this: Option<Rc<Object>>, class: Option<String>) -> Self {
        Self {
            scopes: vec![FxHashMap::default()],
            this,
            class,
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }

    fn assign(&mut self, name: &str, value: Value) -> bool {
        match self.scopes.iter_mut().rev().find(|s| s.contains_key(name)) {
            Some(scope) => {
                scope.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    fn declare(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }
}

/// Assignable location.
enum Place {
    Local(String),
    Global(String),
    Field(Rc<Object>, String),
    Static(Rc<TypeEntry>, String),
    Index(Rc<Array>, usize),
}

fn internal(message: impl Into<String>) -> Unwind {
    Unwind::Fatal(RunException::Internal(message.into()))
}

/// Convert a value to the declared type of its destination.
pub(super) fn coerce_to(v: Value, ty: &Ty) -> Value {
    match ty {
        Ty::Int | Ty::Long | Ty::Double | Ty::Char => v.convert(&ty.to_string()),
        _ => v,
    }
}

fn conform(v: Value, ty: Option<&TypeRef>) -> Value {
    match ty {
        Some(t) if t.dims == 0 => v.convert(&t.name),
        _ => v,
    }
}

/// Narrow the result of a compound assignment back to the variable's type.
fn narrow_like(result: Value, old: &Value) -> Value {
    match old {
        Value::Int(_) => result.convert("int"),
        Value::Long(_) => result.convert("long"),
        Value::Double(_) => result.convert("double"),
        Value::Char(_) => result.convert("char"),
        _ => result,
    }
}

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Int(v) => Value::Int(*v),
        Literal::Long(v) => Value::Long(*v),
        Literal::Double(v) => Value::Double(*v),
        Literal::Bool(v) => Value::Bool(*v),
        Literal::Char(c) => Value::Char(*c),
        Literal::Str(s) => Value::str(s),
        Literal::Null => Value::Null,
    }
}

fn is_type_name(e: &Expr) -> bool {
    matches!(
        e.kind,
        ExprKind::Name {
            binding: NameRef::Type | NameRef::Builtin,
            ..
        }
    )
}

pub(super) fn is_static_field(decl: &TypeDecl, field: &FieldDecl) -> bool {
    field.modifiers.is_static
        || matches!(decl.kind, TypeDeclKind::Interface | TypeDeclKind::Annotation)
}

/// Superclass named in a class header.
fn superclass(decl: &TypeDecl) -> Option<String> {
    match decl.kind {
        TypeDeclKind::Class => decl.extends.first().map(|t| t.base().to_string()),
        _ => None,
    }
}

/// The leading `super(...)` of a constructor body.
fn super_call(stmt: &Stmt) -> Option<(&[Expr], &CallTarget)> {
    let StmtKind::Expr(expr) = &stmt.kind else {
        return None;
    };
    match &expr.kind {
        ExprKind::Call {
            target: None,
            name,
            args,
            resolved,
        } if name == "super" => Some((args.as_slice(), resolved)),
        _ => None,
    }
}

/// Runtime class name used in cast failures.
fn runtime_class(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Int(_) => "java.lang.Integer".to_string(),
        Value::Long(_) => "java.lang.Long".to_string(),
        Value::Double(_) => "java.lang.Double".to_string(),
        Value::Bool(_) => "java.lang.Boolean".to_string(),
        Value::Char(_) => "java.lang.Character".to_string(),
        Value::Str(_) => "java.lang.String".to_string(),
        Value::Array(a) => format!("{}[]", a.elem),
        Value::Object(o) => crate::compile::qualified_exception_name(&o.class),
    }
}

enum Num {
    I(i32, i32),
    L(i64, i64),
    D(f64, f64),
}

fn promote(l: &Value, r: &Value) -> Option<Num> {
    match (l, r) {
        (Value::Double(_), _) | (_, Value::Double(_)) => Some(Num::D(l.as_double()?, r.as_double()?)),
        (Value::Long(_), _) | (_, Value::Long(_)) => Some(Num::L(l.as_long()?, r.as_long()?)),
        _ => Some(Num::I(l.as_int()?, r.as_int()?)),
    }
}

impl Runtime {
    pub(super) fn check_abort(&self) -> Eval<()> {
        if self.abort.is_aborted() {
            Err(Unwind::Stop)
        } else {
            Ok(())
        }
    }

    /// Build a builtin exception ready to be thrown.
    pub(super) fn throw(&self, class: &str, message: Option<String>) -> Unwind {
        let obj = Object::new(class, ObjectKind::Plain);
        obj.set_field(MESSAGE_FIELD, message.map_or(Value::Null, |m| Value::str(&m)));
        Unwind::Throw(Value::Object(obj))
    }

    fn npe(&self, message: String) -> Unwind {
        self.throw("NullPointerException", Some(message))
    }

    // ---- type queries --------------------------------------------------

    /// True if `class` is `target` or one of its subtypes.
    pub(super) fn instance_of(&self, class: &str, target: &str) -> bool {
        if target == "Object" {
            return true;
        }
        let mut seen: Vec<String> = Vec::new();
        let mut stack = vec![class.to_string()];
        while let Some(name) = stack.pop() {
            if name == target {
                return true;
            }
            if seen.contains(&name) {
                continue;
            }
            if let Some(entry) = self.types.get(&name) {
                stack.extend(entry.parents());
            } else if let Some(Some(sup)) = crate::compile::builtin_super(&name) {
                stack.push(sup.to_string());
            }
            seen.push(name);
        }
        false
    }

    fn is_known_class(&self, name: &str) -> bool {
        self.types.contains_key(name) || is_builtin_throwable(name)
    }

    /// User types from `class` upwards, nearest first.
    fn lineage(&self, class: &str) -> Vec<Rc<TypeEntry>> {
        let mut out: Vec<Rc<TypeEntry>> = Vec::new();
        let mut queue = vec![class.to_string()];
        while !queue.is_empty() {
            let name = queue.remove(0);
            if out.iter().any(|t| t.decl.name == name) {
                continue;
            }
            if let Some(entry) = self.types.get(&name) {
                queue.extend(entry.parents());
                out.push(entry.clone());
            }
        }
        out
    }

    /// Most specific implementation of `name(sig)` visible from `class`.
    pub(super) fn find_method(
        &self,
        class: &str,
        name: &str,
        sig: &str,
    ) -> Option<(Rc<TypeEntry>, usize)> {
        self.lineage(class).into_iter().find_map(|entry| {
            let idx = entry
                .decl
                .methods
                .iter()
                .position(|m| m.name == name && m.body.is_some() && m.param_sig() == sig)?;
            Some((entry, idx))
        })
    }

    /// Type in the lineage of `class` that declares static field `name`.
    fn static_owner(&self, class: &str, name: &str) -> Option<Rc<TypeEntry>> {
        self.lineage(class)
            .into_iter()
            .find(|entry| entry.statics.borrow().contains_key(name))
    }

    // ---- statements ----------------------------------------------------

    pub(super) fn exec_block(&mut self, stmts: &[Stmt], frame: &mut Frame) -> Eval<Flow> {
        frame.scopes.push(FxHashMap::default());
        let mut flow = Ok(Flow::Normal);
        for s in stmts {
            match self.exec(s, frame) {
                Ok(Flow::Normal) => {}
                other => {
                    flow = other;
                    break;
                }
            }
        }
        frame.scopes.pop();
        flow
    }

    fn exec_nested(&mut self, s: &Stmt, frame: &mut Frame) -> Eval<Flow> {
        frame.scopes.push(FxHashMap::default());
        let flow = self.exec(s, frame);
        frame.scopes.pop();
        flow
    }

    pub(super) fn exec(&mut self, s: &Stmt, frame: &mut Frame) -> Eval<Flow> {
        match &s.kind {
            StmtKind::Empty => Ok(Flow::Normal),
            StmtKind::Block(stmts) => self.exec_block(stmts, frame),
            StmtKind::Local(decls) => {
                for decl in decls {
                    let v = match &decl.init {
                        Some(init) => {
                            let v = self.eval(init, frame)?;
                            conform(v, decl.ty.as_ref())
                        }
                        None => decl
                            .ty
                            .as_ref()
                            .map_or(Value::Null, value::default_for_ref),
                    };
                    frame.declare(&decl.name, v);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Expr(e) => {
                self.eval(e, frame)?;
                Ok(Flow::Normal)
            }
            StmtKind::If { cond, then, other } => {
                if self.truth(cond, frame)? {
                    self.exec_nested(then, frame)
                } else if let Some(other) = other {
                    self.exec_nested(other, frame)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                while self.truth(cond, frame)? {
                    self.check_abort()?;
                    match self.exec_nested(body, frame)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::DoWhile { body, cond } => {
                loop {
                    self.check_abort()?;
                    match self.exec_nested(body, frame)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.truth(cond, frame)? {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                frame.scopes.push(FxHashMap::default());
                let flow = self.exec_for(init, cond.as_ref(), update, body, frame);
                frame.scopes.pop();
                flow
            }
            StmtKind::ForEach {
                var,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable, frame)? {
                    Value::Array(a) => a.items.borrow().clone(),
                    Value::Null => {
                        return Err(self.npe("Cannot read the array length because value is null".into()));
                    }
                    other => return Err(internal(format!("cannot iterate over {other:?}"))),
                };
                for item in items {
                    self.check_abort()?;
                    frame.scopes.push(FxHashMap::from_iter([(
                        var.name.clone(),
                        conform(item, var.ty.as_ref()),
                    )]));
                    let flow = self.exec_nested(body, frame);
                    frame.scopes.pop();
                    match flow? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e, frame)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(v))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Throw(e) => match self.eval(e, frame)? {
                Value::Null => Err(self.npe("Cannot throw exception because value is null".into())),
                v => Err(Unwind::Throw(v)),
            },
            StmtKind::Try {
                body,
                catches,
                finally,
            } => self.exec_try(body, catches, finally.as_deref(), frame),
        }
    }

    fn exec_for(
        &mut self,
        init: &[Stmt],
        cond: Option<&Expr>,
        update: &[Expr],
        body: &Stmt,
        frame: &mut Frame,
    ) -> Eval<Flow> {
        for s in init {
            self.exec(s, frame)?;
        }
        loop {
            if let Some(cond) = cond {
                if !self.truth(cond, frame)? {
                    break;
                }
            }
            self.check_abort()?;
            match self.exec_nested(body, frame)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
            for u in update {
                self.eval(u, frame)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        catches: &[CatchClause],
        finally: Option<&[Stmt]>,
        frame: &mut Frame,
    ) -> Eval<Flow> {
        let mut result = self.exec_block(body, frame);
        if let Err(Unwind::Throw(thrown)) = &result {
            let thrown = thrown.clone();
            if let Some(clause) = self.matching_catch(catches, &thrown) {
                frame
                    .scopes
                    .push(FxHashMap::from_iter([(clause.name.clone(), thrown)]));
                result = self.exec_block(&clause.body, frame);
                frame.scopes.pop();
            }
        }
        match (finally, &result) {
            // Stop and fatal errors skip finally blocks.
            (Some(finally), Ok(_) | Err(Unwind::Throw(_))) => match self.exec_block(finally, frame)? {
                Flow::Normal => result,
                other => Ok(other),
            },
            _ => result,
        }
    }

    fn matching_catch<'a>(&self, catches: &'a [CatchClause], thrown: &Value) -> Option<&'a CatchClause> {
        let Value::Object(obj) = thrown else {
            return None;
        };
        catches.iter().find(|c| {
            c.types
                .iter()
                .any(|t| t.name == "<any>" || self.instance_of(&obj.class, t.base()))
        })
    }

    fn truth(&mut self, cond: &Expr, frame: &mut Frame) -> Eval<bool> {
        match self.eval(cond, frame)? {
            Value::Bool(b) => Ok(b),
            other => Err(internal(format!("condition evaluated to {other:?}"))),
        }
    }

    // ---- expressions ---------------------------------------------------

    pub(super) fn eval(&mut self, e: &Expr, frame: &mut Frame) -> Eval<Value> {
        match &e.kind {
            ExprKind::Literal(lit) => Ok(literal(lit)),
            ExprKind::Name { name, binding } => self.read_name(name, *binding, frame),
            ExprKind::This => frame
                .this
                .clone()
                .map(Value::Object)
                .ok_or_else(|| internal("no enclosing instance")),
            ExprKind::Field { target, name } => self.read_field(target, name, frame),
            ExprKind::Index { target, index } => {
                let (array, i) = self.element(target, index, frame)?;
                let v = array.items.borrow()[i].clone();
                Ok(v)
            }
            ExprKind::Call {
                target,
                name,
                args,
                resolved,
            } => self.call(target.as_deref(), name, args, resolved, frame),
            ExprKind::New {
                class,
                args,
                resolved,
            } => self.new_object(class, args, resolved, frame),
            ExprKind::NewArray {
                elem,
                lengths,
                init,
            } => self.new_array(elem, lengths, init.as_deref(), frame),
            ExprKind::ArrayLiteral(items) => {
                let values = self.eval_all(items, frame)?;
                Ok(Value::Array(Array::new("Object", values)))
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand, frame)?;
                self.unary(*op, v)
            }
            ExprKind::Step {
                target,
                delta,
                prefix,
            } => {
                let place = self.place(target, frame)?;
                let old = self.read_place(&place, frame)?;
                let new = narrow_like(self.binary(BinaryOp::Add, old.clone(), Value::Int(*delta))?, &old);
                self.write_place(&place, new.clone(), frame)?;
                Ok(if *prefix { new } else { old })
            }
            ExprKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => Ok(Value::Bool(self.truth(lhs, frame)? && self.truth(rhs, frame)?)),
            ExprKind::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => Ok(Value::Bool(self.truth(lhs, frame)? || self.truth(rhs, frame)?)),
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs, frame)?;
                let r = self.eval(rhs, frame)?;
                self.binary(*op, l, r)
            }
            ExprKind::Assign { target, op, value } => {
                let place = self.place(target, frame)?;
                let v = match op {
                    None => {
                        let v = self.eval(value, frame)?;
                        match &place {
                            Place::Index(array, _) => v.convert(&array.elem),
                            _ => v,
                        }
                    }
                    Some(op) => {
                        let old = self.read_place(&place, frame)?;
                        let rhs = self.eval(value, frame)?;
                        narrow_like(self.binary(*op, old.clone(), rhs)?, &old)
                    }
                };
                self.write_place(&place, v.clone(), frame)?;
                Ok(v)
            }
            ExprKind::Conditional { cond, then, other } => {
                if self.truth(cond, frame)? {
                    self.eval(then, frame)
                } else {
                    self.eval(other, frame)
                }
            }
            ExprKind::Cast { ty, expr } => {
                let v = self.eval(expr, frame)?;
                self.cast(v, ty)
            }
            ExprKind::InstanceOf { expr, ty } => {
                let v = self.eval(expr, frame)?;
                Ok(Value::Bool(self.is_instance(&v, ty)))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], frame: &mut Frame) -> Eval<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, frame)).collect()
    }

    fn read_name(&mut self, name: &str, binding: NameRef, frame: &mut Frame) -> Eval<Value> {
        match binding {
            NameRef::Local => frame
                .lookup(name)
                .ok_or_else(|| internal(format!("local {name} is not defined"))),
            NameRef::Field => {
                let place = self.field_place(name, frame)?;
                self.read_place(&place, frame)
            }
            NameRef::Global => self
                .vars
                .get(name)
                .map(|g| g.value.clone())
                .ok_or_else(|| internal(format!("variable {name} is not loaded"))),
            NameRef::Type | NameRef::Builtin | NameRef::Unbound => {
                Err(internal(format!("{name} is not a value")))
            }
        }
    }

    fn field_place(&self, name: &str, frame: &Frame) -> Eval<Place> {
        if let Some(this) = &frame.this {
            if this.fields.borrow().contains_key(name) {
                return Ok(Place::Field(this.clone(), name.to_string()));
            }
        }
        frame
            .class
            .as_deref()
            .and_then(|class| self.static_owner(class, name))
            .map(|entry| Place::Static(entry, name.to_string()))
            .ok_or_else(|| internal(format!("field {name} is not available")))
    }

    fn read_field(&mut self, target: &Expr, name: &str, frame: &mut Frame) -> Eval<Value> {
        let place = match &target.kind {
            ExprKind::Name {
                name: qualifier,
                binding: NameRef::Builtin,
            } => {
                return super::builtins::static_field(qualifier, name)
                    .ok_or_else(|| internal(format!("{qualifier}.{name} is not available")));
            }
            ExprKind::Name {
                name: qualifier,
                binding: NameRef::Type,
            } => self.static_place(qualifier, name)?,
            _ => match self.eval(target, frame)? {
                Value::Array(array) if name == "length" => {
                    return Ok(Value::Int(array.len() as i32));
                }
                v => self.value_place(v, name)?,
            },
        };
        self.read_place(&place, frame)
    }

    /// Place of `target.name`.
    fn place_field(&mut self, target: &Expr, name: &str, frame: &mut Frame) -> Eval<Place> {
        match &target.kind {
            ExprKind::Name {
                name: qualifier,
                binding: NameRef::Type,
            } => self.static_place(qualifier, name),
            _ => {
                let v = self.eval(target, frame)?;
                self.value_place(v, name)
            }
        }
    }

    fn static_place(&self, class: &str, name: &str) -> Eval<Place> {
        let entry = self
            .static_owner(class, name)
            .ok_or_else(|| internal(format!("{class}.{name} is not available")))?;
        self.ensure_live(&entry.owner)?;
        Ok(Place::Static(entry, name.to_string()))
    }

    fn value_place(&self, v: Value, name: &str) -> Eval<Place> {
        match v {
            Value::Object(obj) => {
                if obj.fields.borrow().contains_key(name) {
                    return Ok(Place::Field(obj, name.to_string()));
                }
                self.static_owner(&obj.class, name)
                    .map(|entry| Place::Static(entry, name.to_string()))
                    .ok_or_else(|| internal(format!("{}.{name} is not available", obj.class)))
            }
            Value::Null => Err(self.npe(format!(
                "Cannot read field \"{name}\" because value is null"
            ))),
            other => Err(internal(format!("{other:?} has no field {name}"))),
        }
    }

    fn element(&mut self, target: &Expr, index: &Expr, frame: &mut Frame) -> Eval<(Rc<Array>, usize)> {
        let array = self.eval(target, frame)?;
        let i = self.eval(index, frame)?.as_int().unwrap_or(0);
        match array {
            Value::Array(array) => {
                let len = array.len();
                if i < 0 || i as usize >= len {
                    return Err(self.throw(
                        "ArrayIndexOutOfBoundsException",
                        Some(format!("Index {i} out of bounds for length {len}")),
                    ));
                }
                Ok((array, i as usize))
            }
            Value::Null => Err(self.npe("Cannot load from array because value is null".into())),
            other => Err(internal(format!("{other:?} is not an array"))),
        }
    }

    fn place(&mut self, target: &Expr, frame: &mut Frame) -> Eval<Place> {
        match &target.kind {
            ExprKind::Name {
                name,
                binding: NameRef::Local,
            } => Ok(Place::Local(name.clone())),
            ExprKind::Name {
                name,
                binding: NameRef::Field,
            } => self.field_place(name, frame),
            ExprKind::Name {
                name,
                binding: NameRef::Global,
            } => Ok(Place::Global(name.clone())),
            ExprKind::Field { target, name } => self.place_field(target, name, frame),
            ExprKind::Index { target, index } => {
                let (array, i) = self.element(target, index, frame)?;
                Ok(Place::Index(array, i))
            }
            _ => Err(internal("expression is not assignable")),
        }
    }

    fn read_place(&self, place: &Place, frame: &Frame) -> Eval<Value> {
        let v = match place {
            Place::Local(name) => frame.lookup(name),
            Place::Global(name) => self.vars.get(name).map(|g| g.value.clone()),
            Place::Field(obj, name) => obj.field(name),
            Place::Static(entry, name) => entry.statics.borrow().get(name).cloned(),
            Place::Index(array, i) => array.items.borrow().get(*i).cloned(),
        };
        v.ok_or_else(|| internal("read from an unbound location"))
    }

    fn write_place(&mut self, place: &Place, v: Value, frame: &mut Frame) -> Eval<()> {
        match place {
            Place::Local(name) => {
                if !frame.assign(name, v) {
                    return Err(internal(format!("local {name} is not defined")));
                }
            }
            Place::Global(name) => match self.vars.get_mut(name) {
                Some(g) => g.value = coerce_to(v, &g.ty),
                None => return Err(internal(format!("variable {name} is not loaded"))),
            },
            Place::Field(obj, name) => obj.set_field(name, v),
            Place::Static(entry, name) => {
                entry.statics.borrow_mut().insert(name.clone(), v);
            }
            Place::Index(array, i) => {
                if let Some(slot) = array.items.borrow_mut().get_mut(*i) {
                    *slot = v;
                }
            }
        }
        Ok(())
    }

    // ---- operators -----------------------------------------------------

    fn unary(&self, op: UnaryOp, v: Value) -> Eval<Value> {
        let out = match (op, &v) {
            (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
            (UnaryOp::Neg, Value::Int(i)) => Value::Int(i.wrapping_neg()),
            (UnaryOp::Neg, Value::Long(l)) => Value::Long(l.wrapping_neg()),
            (UnaryOp::Neg, Value::Double(d)) => Value::Double(-d),
            (UnaryOp::Neg, Value::Char(c)) => Value::Int(-(*c as i32)),
            (UnaryOp::Plus, Value::Char(c)) => Value::Int(*c as i32),
            (UnaryOp::Plus, v) if v.is_numeric() => v.clone(),
            (UnaryOp::BitNot, Value::Int(i)) => Value::Int(!i),
            (UnaryOp::BitNot, Value::Long(l)) => Value::Long(!l),
            (UnaryOp::BitNot, Value::Char(c)) => Value::Int(!(*c as i32)),
            _ => return Err(internal(format!("bad operand {v:?} for {op:?}"))),
        };
        Ok(out)
    }

    pub(super) fn binary(&mut self, op: BinaryOp, l: Value, r: Value) -> Eval<Value> {
        use BinaryOp::*;
        match op {
            Add if !(l.is_numeric() && r.is_numeric()) => {
                let mut s = self.stringify(&l)?;
                s.push_str(&self.stringify(&r)?);
                return Ok(Value::str(&s));
            }
            Eq => return Ok(Value::Bool(l.same(&r))),
            Ne => return Ok(Value::Bool(!l.same(&r))),
            And | Or | BitAnd | BitOr | BitXor => {
                if let (Value::Bool(a), Value::Bool(b)) = (&l, &r) {
                    let out = match op {
                        And | BitAnd => *a && *b,
                        Or | BitOr => *a || *b,
                        _ => a != b,
                    };
                    return Ok(Value::Bool(out));
                }
            }
            Shl | Shr | UShr => return self.shift(op, &l, &r),
            _ => {}
        }
        let Some(nums) = promote(&l, &r) else {
            return Err(internal(format!("bad operands {l:?} {} {r:?}", op.symbol())));
        };
        match nums {
            Num::I(a, b) => self.int_op(op, a, b),
            Num::L(a, b) => self.long_op(op, a, b),
            Num::D(a, b) => double_op(op, a, b),
        }
    }

    fn divide_by_zero(&self) -> Unwind {
        self.throw("ArithmeticException", Some("/ by zero".into()))
    }

    fn int_op(&self, op: BinaryOp, a: i32, b: i32) -> Eval<Value> {
        use BinaryOp::*;
        Ok(match op {
            Add => Value::Int(a.wrapping_add(b)),
            Sub => Value::Int(a.wrapping_sub(b)),
            Mul => Value::Int(a.wrapping_mul(b)),
            Div if b == 0 => return Err(self.divide_by_zero()),
            Div => Value::Int(a.wrapping_div(b)),
            Rem if b == 0 => return Err(self.divide_by_zero()),
            Rem => Value::Int(a.wrapping_rem(b)),
            Lt => Value::Bool(a < b),
            Le => Value::Bool(a <= b),
            Gt => Value::Bool(a > b),
            Ge => Value::Bool(a >= b),
            BitAnd => Value::Int(a & b),
            BitOr => Value::Int(a | b),
            BitXor => Value::Int(a ^ b),
            _ => return Err(internal(format!("bad int operator {}", op.symbol()))),
        })
    }

    fn long_op(&self, op: BinaryOp, a: i64, b: i64) -> Eval<Value> {
        use BinaryOp::*;
        Ok(match op {
            Add => Value::Long(a.wrapping_add(b)),
            Sub => Value::Long(a.wrapping_sub(b)),
            Mul => Value::Long(a.wrapping_mul(b)),
            Div if b == 0 => return Err(self.divide_by_zero()),
            Div => Value::Long(a.wrapping_div(b)),
            Rem if b == 0 => return Err(self.divide_by_zero()),
            Rem => Value::Long(a.wrapping_rem(b)),
            Lt => Value::Bool(a < b),
            Le => Value::Bool(a <= b),
            Gt => Value::Bool(a > b),
            Ge => Value::Bool(a >= b),
            BitAnd => Value::Long(a & b),
            BitOr => Value::Long(a | b),
            BitXor => Value::Long(a ^ b),
            _ => return Err(internal(format!("bad long operator {}", op.symbol()))),
        })
    }

    fn shift(&self, op: BinaryOp, l: &Value, r: &Value) -> Eval<Value> {
        let amount = r.as_long().unwrap_or(0);
        match l {
            Value::Long(a) => {
                let n = (amount & 63) as u32;
                Ok(Value::Long(match op {
                    BinaryOp::Shl => a.wrapping_shl(n),
                    BinaryOp::Shr => a.wrapping_shr(n),
                    _ => ((*a as u64) >> n) as i64,
                }))
            }
            other => {
                let a = other
                    .as_int()
                    .ok_or_else(|| internal(format!("bad shift operand {other:?}")))?;
                let n = (amount & 31) as u32;
                Ok(Value::Int(match op {
                    BinaryOp::Shl => a.wrapping_shl(n),
                    BinaryOp::Shr => a.wrapping_shr(n),
                    _ => ((a as u32) >> n) as i32,
                }))
            }
        }
    }

    fn cast(&self, v: Value, ty: &TypeRef) -> Eval<Value> {
        let fail = |rt: &Runtime, v: &Value| {
            rt.throw(
                "ClassCastException",
                Some(format!(
                    "class {} cannot be cast to class {}",
                    runtime_class(v),
                    ty.display()
                )),
            )
        };
        if ty.dims > 0 {
            return match v {
                Value::Null | Value::Array(_) => Ok(v),
                other => Err(fail(self, &other)),
            };
        }
        match ty.name.as_str() {
            "int" | "long" | "double" | "char" => match v {
                Value::Null => Err(self.npe("Cannot unbox null value".into())),
                v if v.is_numeric() => Ok(v.convert(&ty.name)),
                other => Err(fail(self, &other)),
            },
            "boolean" => match v {
                Value::Bool(_) => Ok(v),
                Value::Null => Err(self.npe("Cannot unbox null value".into())),
                other => Err(fail(self, &other)),
            },
            "String" => match v {
                Value::Null | Value::Str(_) => Ok(v),
                other => Err(fail(self, &other)),
            },
            "Object" | "<any>" | "<null>" => Ok(v),
            name => match &v {
                Value::Null => Ok(v),
                Value::Object(obj) if self.instance_of(&obj.class, name) => Ok(v),
                _ if !self.is_known_class(name) => Ok(v),
                other => Err(fail(self, other)),
            },
        }
    }

    fn is_instance(&self, v: &Value, ty: &TypeRef) -> bool {
        match v {
            Value::Null => false,
            Value::Array(a) => {
                (ty.dims == 0 && ty.name == "Object")
                    || (ty.dims > 0 && (a.elem == ty.element().display() || ty.name == "Object"))
            }
            Value::Object(obj) => ty.dims == 0 && self.instance_of(&obj.class, ty.base()),
            Value::Str(_) => ty.dims == 0 && matches!(ty.name.as_str(), "String" | "Object" | "CharSequence"),
            other => {
                ty.dims == 0
                    && (ty.name == "Object" || runtime_class(other).ends_with(&format!(".{}", ty.name)))
            }
        }
    }

    // ---- calls ---------------------------------------------------------

    fn enter_call(&mut self) -> Eval<()> {
        self.check_abort()?;
        if self.depth >= MAX_DEPTH {
            return Err(self.throw("StackOverflowError", None));
        }
        self.depth += 1;
        Ok(())
    }

    fn call(
        &mut self,
        target: Option<&Expr>,
        name: &str,
        args: &[Expr],
        resolved: &CallTarget,
        frame: &mut Frame,
    ) -> Eval<Value> {
        match resolved {
            CallTarget::Builtin(key) => {
                let receiver = if key.contains('#') {
                    match target {
                        Some(t) => Some(self.eval(t, frame)?),
                        None => frame.this.clone().map(Value::Object),
                    }
                } else {
                    None
                };
                let values = self.eval_all(args, frame)?;
                self.builtin(key, receiver, values)
            }
            CallTarget::Global { sig } => {
                let values = self.eval_all(args, frame)?;
                let (owner, decl) = self
                    .methods
                    .get(&(name.to_string(), sig.clone()))
                    .map(|m| (m.owner.clone(), m.decl.clone()))
                    .ok_or_else(|| internal(format!("method {name}({sig}) is not loaded")))?;
                self.ensure_live(&owner)?;
                self.invoke_method(&decl, None, None, values)
            }
            CallTarget::Member { sig } => {
                let values = self.eval_all(args, frame)?;
                let this = frame.this.clone();
                let class = match &this {
                    Some(obj) => obj.class.clone(),
                    None => frame
                        .class
                        .clone()
                        .ok_or_else(|| internal(format!("{name} called outside a type")))?,
                };
                let (entry, idx) = self
                    .find_method(&class, name, sig)
                    .ok_or_else(|| internal(format!("{class}.{name}({sig}) is not implemented")))?;
                self.call_member(entry, idx, this, values)
            }
            CallTarget::Static { class, sig } => {
                if let Some(t) = target {
                    if !is_type_name(t) {
                        self.eval(t, frame)?;
                    }
                }
                let values = self.eval_all(args, frame)?;
                let (entry, idx) = self
                    .find_method(class, name, sig)
                    .ok_or_else(|| internal(format!("{class}.{name}({sig}) is not loaded")))?;
                self.call_member(entry, idx, None, values)
            }
            CallTarget::Virtual { sig } => {
                let receiver = match target {
                    Some(t) => self.eval(t, frame)?,
                    None => frame.this.clone().map_or(Value::Null, Value::Object),
                };
                let values = self.eval_all(args, frame)?;
                match receiver {
                    Value::Object(obj) => self.dispatch(obj, name, sig, values),
                    Value::Null => Err(self.npe(format!(
                        "Cannot invoke \"{name}()\" because value is null"
                    ))),
                    other => Err(internal(format!("cannot call {name} on {other:?}"))),
                }
            }
            // Constructors consume their `super(...)` call before the body runs.
            CallTarget::Super { .. } => Ok(Value::Null),
            CallTarget::Unbound => Err(internal(format!("call to {name} is not resolved"))),
        }
    }

    /// Virtual call on an object's runtime class.
    pub(super) fn dispatch(&mut self, obj: Rc<Object>, name: &str, sig: &str, args: Vec<Value>) -> Eval<Value> {
        if let Some((entry, idx)) = self.find_method(&obj.class, name, sig) {
            return self.call_member(entry, idx, Some(obj), args);
        }
        if sig.is_empty() {
            if let Some(v) = obj.field(name) {
                return Ok(v);
            }
        }
        Err(internal(format!("{}.{name}({sig}) is not implemented", obj.class)))
    }

    pub(super) fn call_member(
        &mut self,
        entry: Rc<TypeEntry>,
        idx: usize,
        this: Option<Rc<Object>>,
        args: Vec<Value>,
    ) -> Eval<Value> {
        self.ensure_live(&entry.owner)?;
        let decl = entry.decl.clone();
        let method = &decl.methods[idx];
        let this = if method.modifiers.is_static { None } else { this };
        self.invoke_method(method, this, Some(decl.name.clone()), args)
    }

    fn invoke_method(
        &mut self,
        method: &MethodDecl,
        this: Option<Rc<Object>>,
        class: Option<String>,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let body = method
            .body
            .as_ref()
            .ok_or_else(|| internal(format!("method {} has no body", method.name)))?;
        self.enter_call()?;
        let mut frame = Frame::new(this, class);
        for (param, value) in method.params.iter().zip(args) {
            frame.declare(&param.name, value);
        }
        let flow = self.exec_block(body, &mut frame);
        self.depth -= 1;
        match flow? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Null),
        }
    }

    // ---- objects -------------------------------------------------------

    fn new_object(
        &mut self,
        class: &TypeRef,
        args: &[Expr],
        resolved: &CtorTarget,
        frame: &mut Frame,
    ) -> Eval<Value> {
        let values = self.eval_all(args, frame)?;
        let obj = match resolved {
            CtorTarget::User { sig } => self.construct(&class.name, sig.as_deref(), values)?,
            CtorTarget::Record => self.construct_record(&class.name, values)?,
            CtorTarget::Builtin => {
                let obj = Object::new(class.base(), ObjectKind::Plain);
                if is_builtin_throwable(class.base()) {
                    let message = self.throwable_message(&values)?;
                    obj.set_field(MESSAGE_FIELD, message);
                }
                obj
            }
            CtorTarget::Unbound => {
                return Err(internal(format!("constructor of {} is not resolved", class.name)));
            }
        };
        Ok(Value::Object(obj))
    }

    /// Detail message from throwable constructor arguments.
    fn throwable_message(&mut self, args: &[Value]) -> Eval<Value> {
        match args {
            [] => Ok(Value::Null),
            [Value::Object(cause)] if self.instance_of(&cause.class, "Throwable") => {
                let text = self.stringify(&Value::Object(cause.clone()))?;
                Ok(Value::str(&text))
            }
            [message, ..] => Ok(message.clone()),
        }
    }

    fn type_entry(&self, class: &str) -> Eval<Rc<TypeEntry>> {
        self.types
            .get(class)
            .cloned()
            .ok_or_else(|| internal(format!("type {class} is not loaded")))
    }

    /// Set every instance field of the lineage to its default.
    fn declare_fields(&self, obj: &Object, class: &str) {
        for entry in self.lineage(class) {
            for f in entry.decl.fields.iter().filter(|f| !is_static_field(&entry.decl, f)) {
                let v = f.var.ty.as_ref().map_or(Value::Null, value::default_for_ref);
                obj.set_field(&f.var.name, v);
            }
        }
    }

    fn construct(&mut self, class: &str, sig: Option<&str>, args: Vec<Value>) -> Eval<Rc<Object>> {
        let entry = self.type_entry(class)?;
        self.ensure_live(&entry.owner)?;
        let obj = Object::new(class, ObjectKind::Plain);
        self.declare_fields(&obj, class);
        self.init_object(&obj, &entry, sig, args)?;
        Ok(obj)
    }

    fn construct_record(&mut self, class: &str, args: Vec<Value>) -> Eval<Rc<Object>> {
        let entry = self.type_entry(class)?;
        self.ensure_live(&entry.owner)?;
        let obj = Object::new(class, ObjectKind::Record);
        for (component, value) in entry.decl.components.iter().zip(args) {
            obj.set_field(&component.name, value);
        }
        Ok(obj)
    }

    /// Run constructors from `entry` upwards: superclass constructor first,
    /// then field initializers, then the rest of the body.
    fn init_object(
        &mut self,
        obj: &Rc<Object>,
        entry: &Rc<TypeEntry>,
        sig: Option<&str>,
        args: Vec<Value>,
    ) -> Eval<()> {
        let decl = entry.decl.clone();
        let ctor = match sig {
            Some(sig) => decl.ctors.iter().find(|c| param_sig(&c.params) == sig),
            None => decl.ctors.iter().find(|c| c.params.is_empty()),
        };
        self.enter_call()?;
        let result = self.run_ctor(obj, &decl, ctor, args);
        self.depth -= 1;
        result
    }

    fn run_ctor(
        &mut self,
        obj: &Rc<Object>,
        decl: &TypeDecl,
        ctor: Option<&CtorDecl>,
        args: Vec<Value>,
    ) -> Eval<()> {
        let mut frame = Frame::new(Some(obj.clone()), Some(decl.name.clone()));
        if let Some(ctor) = ctor {
            for (param, value) in ctor.params.iter().zip(args) {
                frame.declare(&param.name, value);
            }
        }
        let body: &[Stmt] = ctor.map_or(&[], |c| c.body.as_slice());
        let (explicit, rest) = match body.split_first() {
            Some((first, rest)) => match super_call(first) {
                Some(call) => (Some(call), rest),
                None => (None, body),
            },
            None => (None, body),
        };

        let parent = superclass(decl);
        match explicit {
            Some((args, CallTarget::Super { class: Some(class), sig })) => {
                let values = self.eval_all(args, &mut frame)?;
                let parent = self.type_entry(class)?;
                self.init_object(obj, &parent, sig.as_deref(), values)?;
            }
            Some((args, _)) => {
                let values = self.eval_all(args, &mut frame)?;
                if parent.as_deref().is_some_and(is_builtin_throwable) {
                    let message = self.throwable_message(&values)?;
                    obj.set_field(MESSAGE_FIELD, message);
                }
            }
            None => match parent {
                Some(parent) if self.types.contains_key(&parent) => {
                    let parent = self.type_entry(&parent)?;
                    self.init_object(obj, &parent, None, Vec::new())?;
                }
                Some(parent) if is_builtin_throwable(&parent) => {
                    if obj.field(MESSAGE_FIELD).is_none() {
                        obj.set_field(MESSAGE_FIELD, Value::Null);
                    }
                }
                _ => {}
            },
        }

        let mut init_frame = Frame::new(Some(obj.clone()), Some(decl.name.clone()));
        for f in decl.fields.iter().filter(|f| !is_static_field(decl, f)) {
            if let Some(init) = &f.var.init {
                let v = self.eval(init, &mut init_frame)?;
                obj.set_field(&f.var.name, conform(v, f.var.ty.as_ref()));
            }
        }

        self.exec_block(rest, &mut frame)?;
        Ok(())
    }

    /// Create enum constants and run static initializers.
    pub(super) fn init_statics(&mut self, entry: &Rc<TypeEntry>) -> Eval<()> {
        let decl = entry.decl.clone();
        for (ordinal, name) in decl.constants.iter().enumerate() {
            let obj = Object::new(
                &decl.name,
                ObjectKind::Enum {
                    ordinal: ordinal as i32,
                    name: name.clone(),
                },
            );
            self.declare_fields(&obj, &decl.name);
            self.init_object(&obj, entry, None, Vec::new())?;
            entry
                .statics
                .borrow_mut()
                .insert(name.clone(), Value::Object(obj));
        }
        let mut frame = Frame::new(None, Some(decl.name.clone()));
        for f in decl.fields.iter().filter(|f| is_static_field(&decl, f)) {
            if let Some(init) = &f.var.init {
                let v = self.eval(init, &mut frame)?;
                let v = conform(v, f.var.ty.as_ref());
                entry.statics.borrow_mut().insert(f.var.name.clone(), v);
            }
        }
        Ok(())
    }

    fn new_array(
        &mut self,
        elem: &TypeRef,
        lengths: &[Expr],
        init: Option<&[Expr]>,
        frame: &mut Frame,
    ) -> Eval<Value> {
        if let Some(items) = init {
            let elem_name = elem.display();
            let values = self
                .eval_all(items, frame)?
                .into_iter()
                .map(|v| v.convert(&elem_name))
                .collect();
            return Ok(Value::Array(Array::new(&elem_name, values)));
        }
        let mut sizes = Vec::with_capacity(lengths.len());
        for len in lengths {
            let n = self.eval(len, frame)?.as_int().unwrap_or(0);
            if n < 0 {
                return Err(self.throw("NegativeArraySizeException", Some(n.to_string())));
            }
            sizes.push(n as usize);
        }
        Ok(make_array(elem, &sizes))
    }
}

fn make_array(elem: &TypeRef, sizes: &[usize]) -> Value {
    let Some((&n, rest)) = sizes.split_first() else {
        return Value::Null;
    };
    let items = (0..n)
        .map(|_| {
            if rest.is_empty() {
                value::default_for_ref(elem)
            } else {
                make_array(&elem.element(), rest)
            }
        })
        .collect();
    Value::Array(Array::new(&elem.display(), items))
}

fn double_op(op: BinaryOp, a: f64, b: f64) -> Eval<Value> {
    use BinaryOp::*;
    Ok(match op {
        Add => Value::Double(a + b),
        Sub => Value::Double(a - b),
        Mul => Value::Double(a * b),
        Div => Value::Double(a / b),
        Rem => Value::Double(a % b),
        Lt => Value::Bool(a < b),
        Le => Value::Bool(a <= b),
        Gt => Value::Bool(a > b),
        Ge => Value::Bool(a >= b),
        _ => return Err(internal(format!("bad double operator {}", op.symbol()))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Span;

    #[test]
    fn test_make_array_nests_lengths() {
        let elem = TypeRef {
            dims: 1,
            ..TypeRef::simple("int", Span::new(0, 0))
        };
        let Value::Array(outer) = make_array(&elem, &[2, 3]) else {
            panic!("expected array");
        };
        assert_eq!(outer.type_label(), "int[2][]");
        let Value::Array(inner) = outer.items.borrow()[0].clone() else {
            panic!("expected nested array");
        };
        assert_eq!(inner.type_label(), "int[3]");
    }

    #[test]
    fn test_narrowing_follows_old_value() {
        assert!(matches!(narrow_like(Value::Double(7.5), &Value::Int(1)), Value::Int(7)));
        assert!(matches!(narrow_like(Value::Int(66), &Value::Char('A')), Value::Char('B')));
    }
}
