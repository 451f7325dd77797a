//! Execution session: runs a sanitized tree inside a restricted runtime.
//!
//! The runtime is a small tree-walking interpreter with a deliberately
//! minimal builtin surface, distinct from the host process environment.
//! All textual output is captured into a buffer, never written to the
//! real output stream. Before execution the guard routine is injected as
//! the first statement of the program body; every call site the analyzer
//! neutralized resolves to it.

use crate::errors::{Result, SandboxError};
use crate::tree::{
    BinOp, BoolOpKind, CmpOp, Expr, Module, NameRole, Stmt, UnaryOp, INERT_CALL,
    INERT_CALL_MARKER, INERT_NAME, INERT_RESULT,
};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Variable bindings visible to executed code, threaded across session
/// turns by the caller.
pub type Bindings = HashMap<String, Value>;

const MAX_CALL_DEPTH: usize = 100;

const BUILTIN_NAMES: &[&str] = &[
    "print", "len", "range", "abs", "min", "max", "sum", "str", "int", "float", "bool",
    "Exception", "ValueError", "TypeError", "RuntimeError", "KeyError", "IndexError",
    "ZeroDivisionError",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Function(FunctionValue),
    Builtin(&'static str),
    /// Stand-in bound by an allowed import; carries no real module.
    ModuleProxy(String),
    /// Stand-in bound by a neutralized import.
    Inert,
    /// Defined class; not instantiable in the restricted runtime.
    Class(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionValue {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<Vec<Stmt>>,
    /// The guard routine accepts any arguments; parsed functions never do.
    variadic: bool,
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::None | Value::Inert => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Dict(v) => !v.is_empty(),
            Value::Function(_) | Value::Builtin(_) | Value::ModuleProxy(_) | Value::Class(_) => {
                true
            }
        }
    }

    /// `str()` form: strings render raw.
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// `repr()` form: strings render quoted.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    format!("{:.1}", v)
                } else {
                    v.to_string()
                }
            }
            Value::Str(s) => format!("'{}'", s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Value::Dict(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Function(f) => format!("<function {}>", f.name),
            Value::Builtin(name) => format!("<built-in function {}>", name),
            Value::ModuleProxy(name) => format!("<module proxy '{}'>", name),
            Value::Inert => "<inert>".to_string(),
            Value::Class(name) => format!("<class '{}'>", name),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::ModuleProxy(_) => "module",
            Value::Inert => "inert",
            Value::Class(_) => "type",
        }
    }
}

/// Outcome of one execution call. Immutable after construction.
#[derive(Debug)]
pub struct ExecutionResult {
    pub captured_output: String,
    pub bindings: Bindings,
    /// Result of the last top-level expression statement, if it produced
    /// a value other than `None`.
    pub value: Option<Value>,
}

/// Executes sanitized trees. Stateless between calls: all carried state
/// lives in the bindings the caller threads through.
#[derive(Debug, Default)]
pub struct Session;

impl Session {
    pub fn new() -> Self {
        Self
    }

    pub fn execute(&self, module: &Module, bindings: Bindings) -> Result<ExecutionResult> {
        let mut program = module.clone();
        program.body.insert(0, guard_def());

        let mut interp = Interp {
            scopes: vec![bindings],
            out: String::new(),
            depth: 0,
            last_value: None,
            handling: Vec::new(),
        };
        let flow = interp.exec_stmts(&program.body)?;
        match flow {
            Flow::Normal => {}
            Flow::Break | Flow::Continue => {
                return Err(fault("SyntaxError", "'break' or 'continue' outside loop"));
            }
            Flow::Return(_) => {
                return Err(fault("SyntaxError", "'return' outside function"));
            }
        }
        let mut bindings = interp.scopes.swap_remove(0);
        // the guard is re-injected every turn; keep carried bindings clean
        bindings.remove(INERT_CALL);
        debug!(bindings = bindings.len(), "execution finished");
        Ok(ExecutionResult {
            captured_output: interp.out,
            bindings,
            value: interp.last_value,
        })
    }
}

/// The guard routine, injected as the first statement of every executed
/// program: prints the fixed marker and returns the fixed sentinel.
fn guard_def() -> Stmt {
    Stmt::FunctionDef {
        name: INERT_CALL.to_string(),
        params: Vec::new(),
        returns: None,
        decorators: Vec::new(),
        body: vec![
            Stmt::Expr {
                value: Expr::Call {
                    func: Box::new(Expr::Name {
                        id: "print".to_string(),
                        role: NameRole::Load,
                        line: 0,
                    }),
                    args: vec![Expr::Str {
                        value: INERT_CALL_MARKER.to_string(),
                        line: 0,
                    }],
                    kwargs: Vec::new(),
                    line: 0,
                },
                line: 0,
            },
            Stmt::Return {
                value: Some(Expr::Str {
                    value: INERT_RESULT.to_string(),
                    line: 0,
                }),
                line: 0,
            },
        ],
        is_async: false,
        line: 0,
    }
}

fn fault(kind: &str, message: impl std::fmt::Display) -> SandboxError {
    SandboxError::Runtime(format!("{}: {}", kind, message))
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Interp {
    /// Scope stack; index 0 is the caller-supplied binding environment.
    scopes: Vec<Bindings>,
    out: String,
    depth: usize,
    last_value: Option<Value>,
    /// Exceptions currently being handled, innermost last. A bare
    /// `raise` re-raises the top entry.
    handling: Vec<String>,
}

impl Interp {
    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.scopes.last().and_then(|s| s.get(name)) {
            return Some(value.clone());
        }
        if self.scopes.len() > 1 {
            if let Some(value) = self.scopes[0].get(name) {
                return Some(value.clone());
            }
        }
        BUILTIN_NAMES
            .iter()
            .find(|n| **n == name)
            .map(|n| Value::Builtin(*n))
    }

    fn bind(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expr { value, .. } => {
                let result = self.eval(value)?;
                if self.scopes.len() == 1 {
                    self.last_value = match result {
                        Value::None => None,
                        other => Some(other),
                    };
                }
                Ok(Flow::Normal)
            }
            Stmt::Assign { targets, value, .. } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
                Ok(Flow::Normal)
            }
            Stmt::AugAssign {
                target, op, value, ..
            } => {
                let current = self.eval_target_read(target)?;
                let rhs = self.eval(value)?;
                let updated = binop(*op, current, rhs)?;
                self.assign(target, updated)?;
                Ok(Flow::Normal)
            }
            Stmt::Import { names, .. } => {
                for alias in names {
                    let value = if alias.name == INERT_NAME {
                        Value::Inert
                    } else {
                        Value::ModuleProxy(alias.name.clone())
                    };
                    self.bind(alias.bound_name(), value);
                }
                Ok(Flow::Normal)
            }
            Stmt::ImportFrom { module, names, .. } => {
                for alias in names {
                    let value = if alias.name == INERT_NAME {
                        Value::Inert
                    } else {
                        Value::ModuleProxy(format!("{}.{}", module, alias.name))
                    };
                    self.bind(alias.bound_name(), value);
                }
                Ok(Flow::Normal)
            }
            Stmt::FunctionDef {
                name,
                params,
                decorators,
                body,
                ..
            } => {
                let mut value = Value::Function(FunctionValue {
                    name: name.clone(),
                    params: params.clone(),
                    body: Rc::new(body.clone()),
                    variadic: name == INERT_CALL,
                });
                // innermost decorator applies first
                for decorator in decorators.iter().rev() {
                    let callee = self.eval(decorator)?;
                    value = self.call_value(callee, vec![value], &[])?;
                }
                self.bind(name, value);
                Ok(Flow::Normal)
            }
            Stmt::ClassDef { name, body, .. } => {
                // class bodies run in their own scope; the resulting
                // class is a named stand-in, not instantiable here
                self.scopes.push(Bindings::new());
                let result = self.exec_stmts(body);
                self.scopes.pop();
                result?;
                self.bind(name, Value::Class(name.clone()));
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let result = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                Ok(Flow::Return(result))
            }
            Stmt::If {
                test, body, orelse, ..
            } => {
                if self.eval(test)?.truthy() {
                    self.exec_stmts(body)
                } else {
                    self.exec_stmts(orelse)
                }
            }
            Stmt::While { test, body, .. } => {
                while self.eval(test)?.truthy() {
                    match self.exec_stmts(body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                target, iter, body, ..
            } => {
                let iterable = self.eval(iter)?;
                let items = self.iterate(iterable)?;
                for item in items {
                    self.assign(target, item)?;
                    match self.exec_stmts(body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Try {
                body,
                handlers,
                finalbody,
                ..
            } => {
                let mut outcome = self.exec_stmts(body);
                if let Err(err) = &outcome {
                    if let SandboxError::Runtime(message) = err {
                        let message = message.clone();
                        for handler in handlers {
                            if handler_matches(handler.exc_type.as_ref(), &message) {
                                if let Some(bind) = &handler.bind {
                                    self.bind(bind, Value::Str(message.clone()));
                                }
                                self.handling.push(message.clone());
                                outcome = self.exec_stmts(&handler.body);
                                self.handling.pop();
                                break;
                            }
                        }
                    }
                }
                // finally always runs; a flow change there wins
                match self.exec_stmts(finalbody)? {
                    Flow::Normal => outcome,
                    other => Ok(other),
                }
            }
            Stmt::Raise { exc, .. } => match exc {
                Some(expr) => {
                    let value = self.eval(expr)?;
                    let message = match value {
                        Value::Str(s) => s,
                        other => format!("Exception: {}", other.display()),
                    };
                    Err(SandboxError::Runtime(message))
                }
                None => match self.handling.last() {
                    Some(message) => Err(SandboxError::Runtime(message.clone())),
                    None => Err(fault("RuntimeError", "no active exception to re-raise")),
                },
            },
            Stmt::Pass { .. } => Ok(Flow::Normal),
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
        }
    }

    /// Current value of an augmented-assignment target.
    fn eval_target_read(&mut self, target: &Expr) -> Result<Value> {
        match target {
            Expr::Name { id, .. } => self
                .lookup(id)
                .ok_or_else(|| fault("NameError", format!("name '{}' is not defined", id))),
            Expr::Subscript { .. } => self.eval(target),
            other => Err(fault(
                "TypeError",
                format!("unsupported assignment target at line {}", other.line()),
            )),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<()> {
        match target {
            Expr::Name { id, .. } => {
                self.bind(id, value);
                Ok(())
            }
            Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
                let items = self.iterate(value)?;
                if items.len() != elts.len() {
                    return Err(fault(
                        "ValueError",
                        format!(
                            "cannot unpack {} values into {} targets",
                            items.len(),
                            elts.len()
                        ),
                    ));
                }
                for (elt, item) in elts.iter().zip(items) {
                    self.assign(elt, item)?;
                }
                Ok(())
            }
            Expr::Subscript { value: base, index, .. } => {
                let Expr::Name { id, .. } = base.as_ref() else {
                    return Err(fault(
                        "TypeError",
                        "subscript assignment requires a plain name base",
                    ));
                };
                let container = self
                    .lookup(id)
                    .ok_or_else(|| fault("NameError", format!("name '{}' is not defined", id)))?;
                let key = self.eval(index)?;
                let updated = store_item(container, key, value)?;
                self.bind(id, updated);
                Ok(())
            }
            Expr::Attribute { .. } => Err(fault(
                "TypeError",
                "attribute assignment is not supported in the restricted runtime",
            )),
            other => Err(fault(
                "TypeError",
                format!("invalid assignment target at line {}", other.line()),
            )),
        }
    }

    fn iterate(&self, value: Value) -> Result<Vec<Value>> {
        match value {
            Value::List(items) | Value::Tuple(items) => Ok(items),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(entries) => Ok(entries.into_iter().map(|(k, _)| k).collect()),
            other => Err(fault(
                "TypeError",
                format!("'{}' object is not iterable", other.type_name()),
            )),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::NoneLit { .. } => Ok(Value::None),
            Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
            Expr::Int { value, .. } => Ok(Value::Int(*value)),
            Expr::Float { value, .. } => Ok(Value::Float(*value)),
            Expr::Str { value, .. } => Ok(Value::Str(value.clone())),
            Expr::Name { id, .. } => self
                .lookup(id)
                .ok_or_else(|| fault("NameError", format!("name '{}' is not defined", id))),
            Expr::List { elts, .. } => {
                let items = elts.iter().map(|e| self.eval(e)).collect::<Result<_>>()?;
                Ok(Value::List(items))
            }
            Expr::Tuple { elts, .. } => {
                let items = elts.iter().map(|e| self.eval(e)).collect::<Result<_>>()?;
                Ok(Value::Tuple(items))
            }
            Expr::Dict { entries, .. } => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push((self.eval(k)?, self.eval(v)?));
                }
                Ok(Value::Dict(out))
            }
            Expr::Attribute { value, attr, .. } => {
                let base = self.eval(value)?;
                match base {
                    Value::ModuleProxy(module) => Err(fault(
                        "AttributeError",
                        format!(
                            "module '{}' has no attribute '{}' in the restricted runtime",
                            module, attr
                        ),
                    )),
                    Value::Inert => Err(fault(
                        "AttributeError",
                        format!("blocked symbol has no attribute '{}'", attr),
                    )),
                    other => Err(fault(
                        "AttributeError",
                        format!("'{}' object has no attribute '{}'", other.type_name(), attr),
                    )),
                }
            }
            Expr::Subscript { value, index, .. } => {
                let container = self.eval(value)?;
                let key = self.eval(index)?;
                load_item(container, key)
            }
            Expr::UnaryOp { op, operand, .. } => {
                let operand = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
                    UnaryOp::Neg => match operand {
                        Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
                        Value::Float(v) => Ok(Value::Float(-v)),
                        Value::Bool(b) => Ok(Value::Int(-(b as i64))),
                        other => Err(fault(
                            "TypeError",
                            format!("bad operand type for unary -: '{}'", other.type_name()),
                        )),
                    },
                }
            }
            Expr::BinOp {
                left, op, right, ..
            } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binop(*op, left, right)
            }
            Expr::BoolOp { op, values, .. } => {
                let mut last = Value::None;
                for (i, value) in values.iter().enumerate() {
                    last = self.eval(value)?;
                    let stop = match op {
                        BoolOpKind::And => !last.truthy(),
                        BoolOpKind::Or => last.truthy(),
                    };
                    if stop && i < values.len() - 1 {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops,
                comparators,
                ..
            } => {
                let mut lhs = self.eval(left)?;
                for (op, comparator) in ops.iter().zip(comparators) {
                    let rhs = self.eval(comparator)?;
                    if !compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call {
                func, args, kwargs, ..
            } => {
                let callee = self.eval(func)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    kwarg_values.push((name.clone(), self.eval(value)?));
                }
                self.call_value(callee, arg_values, &kwarg_values)
            }
        }
    }

    fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        match callee {
            Value::Function(function) => self.call_function(&function, args, kwargs),
            Value::Builtin(name) => {
                if !kwargs.is_empty() {
                    return Err(fault(
                        "TypeError",
                        format!("{}() takes no keyword arguments here", name),
                    ));
                }
                self.call_builtin(name, args)
            }
            Value::Class(name) => Err(fault(
                "TypeError",
                format!(
                    "class '{}' cannot be instantiated in the restricted runtime",
                    name
                ),
            )),
            Value::ModuleProxy(name) => Err(fault(
                "TypeError",
                format!("module proxy '{}' is not callable", name),
            )),
            Value::Inert => Err(fault("TypeError", "blocked symbol is not callable")),
            other => Err(fault(
                "TypeError",
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    fn call_function(
        &mut self,
        function: &FunctionValue,
        args: Vec<Value>,
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(fault("RecursionError", "maximum call depth exceeded"));
        }
        let mut frame = Bindings::new();
        if function.variadic {
            // guard routine: arguments are accepted and discarded
        } else {
            if args.len() > function.params.len() {
                return Err(fault(
                    "TypeError",
                    format!(
                        "{}() takes {} positional arguments but {} were given",
                        function.name,
                        function.params.len(),
                        args.len()
                    ),
                ));
            }
            for (param, arg) in function.params.iter().zip(args) {
                frame.insert(param.clone(), arg);
            }
            for (name, value) in kwargs {
                if !function.params.contains(name) {
                    return Err(fault(
                        "TypeError",
                        format!(
                            "{}() got an unexpected keyword argument '{}'",
                            function.name, name
                        ),
                    ));
                }
                if frame.contains_key(name) {
                    return Err(fault(
                        "TypeError",
                        format!(
                            "{}() got multiple values for argument '{}'",
                            function.name, name
                        ),
                    ));
                }
                frame.insert(name.clone(), value.clone());
            }
            for param in &function.params {
                if !frame.contains_key(param) {
                    return Err(fault(
                        "TypeError",
                        format!(
                            "{}() missing required argument: '{}'",
                            function.name, param
                        ),
                    ));
                }
            }
        }

        self.scopes.push(frame);
        self.depth += 1;
        let outcome = self.exec_stmts(&function.body);
        self.depth -= 1;
        self.scopes.pop();

        match outcome? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::None),
            Flow::Break | Flow::Continue => {
                Err(fault("SyntaxError", "'break' or 'continue' outside loop"))
            }
        }
    }

    fn call_builtin(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        match name {
            "print" => {
                let parts: Vec<String> = args.iter().map(Value::display).collect();
                self.out.push_str(&parts.join(" "));
                self.out.push('\n');
                Ok(Value::None)
            }
            "len" => {
                let [arg] = one(name, args)?;
                let len = match &arg {
                    Value::Str(s) => s.chars().count(),
                    Value::List(v) | Value::Tuple(v) => v.len(),
                    Value::Dict(v) => v.len(),
                    other => {
                        return Err(fault(
                            "TypeError",
                            format!("object of type '{}' has no len()", other.type_name()),
                        ))
                    }
                };
                Ok(Value::Int(len as i64))
            }
            "range" => {
                let (start, stop, step) = match args.len() {
                    1 => (0, int_arg(name, &args[0])?, 1),
                    2 => (int_arg(name, &args[0])?, int_arg(name, &args[1])?, 1),
                    3 => (
                        int_arg(name, &args[0])?,
                        int_arg(name, &args[1])?,
                        int_arg(name, &args[2])?,
                    ),
                    n => {
                        return Err(fault(
                            "TypeError",
                            format!("range expected 1 to 3 arguments, got {}", n),
                        ))
                    }
                };
                if step == 0 {
                    return Err(fault("ValueError", "range() arg 3 must not be zero"));
                }
                let mut items = Vec::new();
                let mut current = start;
                while (step > 0 && current < stop) || (step < 0 && current > stop) {
                    items.push(Value::Int(current));
                    current += step;
                }
                Ok(Value::List(items))
            }
            "abs" => {
                let [arg] = one(name, args)?;
                match arg {
                    Value::Int(v) => Ok(Value::Int(v.wrapping_abs())),
                    Value::Float(v) => Ok(Value::Float(v.abs())),
                    other => Err(fault(
                        "TypeError",
                        format!("bad operand type for abs(): '{}'", other.type_name()),
                    )),
                }
            }
            "min" | "max" => {
                let items = if args.len() == 1 {
                    let [arg] = one(name, args)?;
                    self.iterate(arg)?
                } else {
                    args
                };
                if items.is_empty() {
                    return Err(fault("ValueError", format!("{}() arg is empty", name)));
                }
                let mut best = items[0].clone();
                for item in &items[1..] {
                    let replace = if name == "min" {
                        compare(CmpOp::Lt, item, &best)?
                    } else {
                        compare(CmpOp::Gt, item, &best)?
                    };
                    if replace {
                        best = item.clone();
                    }
                }
                Ok(best)
            }
            "sum" => {
                let [arg] = one(name, args)?;
                let items = self.iterate(arg)?;
                let mut total = Value::Int(0);
                for item in items {
                    total = binop(BinOp::Add, total, item)?;
                }
                Ok(total)
            }
            "str" => {
                let [arg] = one(name, args)?;
                Ok(Value::Str(arg.display()))
            }
            "int" => {
                let [arg] = one(name, args)?;
                match arg {
                    Value::Int(v) => Ok(Value::Int(v)),
                    Value::Float(v) => Ok(Value::Int(v.trunc() as i64)),
                    Value::Bool(b) => Ok(Value::Int(b as i64)),
                    Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                        fault(
                            "ValueError",
                            format!("invalid literal for int(): '{}'", s),
                        )
                    }),
                    other => Err(fault(
                        "TypeError",
                        format!("int() argument must not be '{}'", other.type_name()),
                    )),
                }
            }
            "float" => {
                let [arg] = one(name, args)?;
                match arg {
                    Value::Int(v) => Ok(Value::Float(v as f64)),
                    Value::Float(v) => Ok(Value::Float(v)),
                    Value::Bool(b) => Ok(Value::Float(b as i64 as f64)),
                    Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                        fault(
                            "ValueError",
                            format!("could not convert string to float: '{}'", s),
                        )
                    }),
                    other => Err(fault(
                        "TypeError",
                        format!("float() argument must not be '{}'", other.type_name()),
                    )),
                }
            }
            "bool" => {
                let [arg] = one(name, args)?;
                Ok(Value::Bool(arg.truthy()))
            }
            // exception constructors produce tagged message strings so
            // raise/except can match on the leading name
            "Exception" | "ValueError" | "TypeError" | "RuntimeError" | "KeyError"
            | "IndexError" | "ZeroDivisionError" => {
                let message = args
                    .first()
                    .map(Value::display)
                    .unwrap_or_default();
                Ok(Value::Str(format!("{}: {}", name, message)))
            }
            other => Err(fault(
                "NameError",
                format!("name '{}' is not defined", other),
            )),
        }
    }
}

fn one(name: &str, args: Vec<Value>) -> Result<[Value; 1]> {
    let count = args.len();
    <[Value; 1]>::try_from(args).map_err(|_| {
        fault(
            "TypeError",
            format!("{}() takes exactly one argument ({} given)", name, count),
        )
    })
}

fn int_arg(name: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Int(v) => Ok(*v),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(fault(
            "TypeError",
            format!(
                "'{}' object cannot be interpreted as an integer in {}()",
                other.type_name(),
                name
            ),
        )),
    }
}

fn handler_matches(exc_type: Option<&Expr>, message: &str) -> bool {
    let Some(exc_type) = exc_type else {
        return true; // bare except
    };
    match crate::tree::unparse(exc_type) {
        Some(name) if name == "Exception" => true,
        Some(name) => message.starts_with(&format!("{}:", name)),
        None => false,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        Value::Bool(b) => Some(*b as i64 as f64),
        _ => None,
    }
}

fn py_floordiv(a: i64, b: i64) -> i64 {
    // i64::MIN / -1 overflows; wrap like the other integer ops
    if b == -1 {
        return a.wrapping_neg();
    }
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

fn py_mod(a: i64, b: i64) -> i64 {
    if b == -1 {
        return 0;
    }
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

fn binop(op: BinOp, left: Value, right: Value) -> Result<Value> {
    use Value::{Float, Int, List, Str, Tuple};

    // sequence and string forms first
    match (&op, &left, &right) {
        (BinOp::Add, Str(a), Str(b)) => return Ok(Str(format!("{}{}", a, b))),
        (BinOp::Add, List(a), List(b)) => {
            let mut items = a.clone();
            items.extend(b.iter().cloned());
            return Ok(List(items));
        }
        (BinOp::Add, Tuple(a), Tuple(b)) => {
            let mut items = a.clone();
            items.extend(b.iter().cloned());
            return Ok(Tuple(items));
        }
        (BinOp::Mul, Str(s), Int(n)) | (BinOp::Mul, Int(n), Str(s)) => {
            return Ok(Str(s.repeat((*n).max(0) as usize)));
        }
        (BinOp::Mul, List(items), Int(n)) | (BinOp::Mul, Int(n), List(items)) => {
            let mut out = Vec::new();
            for _ in 0..(*n).max(0) {
                out.extend(items.iter().cloned());
            }
            return Ok(List(out));
        }
        _ => {}
    }

    // integer arithmetic stays integral except for true division
    if let (Int(a), Int(b)) = (&left, &right) {
        let (a, b) = (*a, *b);
        return match op {
            BinOp::Add => Ok(Int(a.wrapping_add(b))),
            BinOp::Sub => Ok(Int(a.wrapping_sub(b))),
            BinOp::Mul => Ok(Int(a.wrapping_mul(b))),
            BinOp::Div => {
                if b == 0 {
                    Err(fault("ZeroDivisionError", "division by zero"))
                } else {
                    Ok(Float(a as f64 / b as f64))
                }
            }
            BinOp::FloorDiv => {
                if b == 0 {
                    Err(fault("ZeroDivisionError", "integer division by zero"))
                } else {
                    Ok(Int(py_floordiv(a, b)))
                }
            }
            BinOp::Mod => {
                if b == 0 {
                    Err(fault("ZeroDivisionError", "integer modulo by zero"))
                } else {
                    Ok(Int(py_mod(a, b)))
                }
            }
            BinOp::Pow => {
                if b >= 0 {
                    match a.checked_pow(b.min(u32::MAX as i64) as u32) {
                        Some(v) => Ok(Int(v)),
                        None => Ok(Float((a as f64).powf(b as f64))),
                    }
                } else {
                    Ok(Float((a as f64).powf(b as f64)))
                }
            }
        };
    }

    match (numeric(&left), numeric(&right)) {
        (Some(a), Some(b)) => match op {
            BinOp::Add => Ok(Float(a + b)),
            BinOp::Sub => Ok(Float(a - b)),
            BinOp::Mul => Ok(Float(a * b)),
            BinOp::Div => {
                if b == 0.0 {
                    Err(fault("ZeroDivisionError", "float division by zero"))
                } else {
                    Ok(Float(a / b))
                }
            }
            BinOp::FloorDiv => {
                if b == 0.0 {
                    Err(fault("ZeroDivisionError", "float floor division by zero"))
                } else {
                    Ok(Float((a / b).floor()))
                }
            }
            BinOp::Mod => {
                if b == 0.0 {
                    Err(fault("ZeroDivisionError", "float modulo by zero"))
                } else {
                    Ok(Float(a - b * (a / b).floor()))
                }
            }
            BinOp::Pow => Ok(Float(a.powf(b))),
        },
        _ => Err(fault(
            "TypeError",
            format!(
                "unsupported operand types: '{}' and '{}'",
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        CmpOp::Eq => Ok(value_eq(left, right)),
        CmpOp::NotEq => Ok(!value_eq(left, right)),
        CmpOp::In | CmpOp::NotIn => {
            let contained = match right {
                Value::Str(haystack) => match left {
                    Value::Str(needle) => haystack.contains(needle.as_str()),
                    other => {
                        return Err(fault(
                            "TypeError",
                            format!(
                                "'in <string>' requires string as left operand, not '{}'",
                                other.type_name()
                            ),
                        ))
                    }
                },
                Value::List(items) | Value::Tuple(items) => {
                    items.iter().any(|item| value_eq(item, left))
                }
                Value::Dict(entries) => entries.iter().any(|(k, _)| value_eq(k, left)),
                other => {
                    return Err(fault(
                        "TypeError",
                        format!("argument of type '{}' is not iterable", other.type_name()),
                    ))
                }
            };
            Ok(if op == CmpOp::In { contained } else { !contained })
        }
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => match (numeric(left), numeric(right)) {
                    (Some(a), Some(b)) => a
                        .partial_cmp(&b)
                        .ok_or_else(|| fault("ValueError", "comparison with NaN"))?,
                    _ => {
                        return Err(fault(
                            "TypeError",
                            format!(
                                "'<' not supported between instances of '{}' and '{}'",
                                left.type_name(),
                                right.type_name()
                            ),
                        ))
                    }
                },
            };
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::LtE => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::GtE => ordering.is_ge(),
                _ => unreachable!("outer match narrows op"),
            })
        }
    }
}

fn load_item(container: Value, key: Value) -> Result<Value> {
    match container {
        Value::List(items) | Value::Tuple(items) => {
            let index = sequence_index(&key, items.len())?;
            Ok(items[index].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let index = sequence_index(&key, chars.len())?;
            Ok(Value::Str(chars[index].to_string()))
        }
        Value::Dict(entries) => entries
            .iter()
            .find(|(k, _)| value_eq(k, &key))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| fault("KeyError", key.repr())),
        other => Err(fault(
            "TypeError",
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

fn store_item(container: Value, key: Value, value: Value) -> Result<Value> {
    match container {
        Value::List(mut items) => {
            let index = sequence_index(&key, items.len())?;
            items[index] = value;
            Ok(Value::List(items))
        }
        Value::Dict(mut entries) => {
            if let Some(slot) = entries.iter_mut().find(|(k, _)| value_eq(k, &key)) {
                slot.1 = value;
            } else {
                entries.push((key, value));
            }
            Ok(Value::Dict(entries))
        }
        other => Err(fault(
            "TypeError",
            format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ),
        )),
    }
}

fn sequence_index(key: &Value, len: usize) -> Result<usize> {
    let Value::Int(raw) = key else {
        return Err(fault(
            "TypeError",
            format!("indices must be integers, not '{}'", key.type_name()),
        ));
    };
    let index = if *raw < 0 {
        raw.checked_add(len as i64)
            .ok_or_else(|| fault("IndexError", "index out of range"))?
    } else {
        *raw
    };
    if index < 0 || index as usize >= len {
        return Err(fault("IndexError", "index out of range"));
    }
    Ok(index as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn run(source: &str) -> ExecutionResult {
        run_with(source, Bindings::new())
    }

    fn run_with(source: &str, bindings: Bindings) -> ExecutionResult {
        let module = parse(source).unwrap();
        Session::new().execute(&module, bindings).unwrap()
    }

    #[test]
    fn captures_print_output() {
        let result = run("print('hello', 1 + 1)\n");
        assert_eq!(result.captured_output, "hello 2\n");
        assert!(result.value.is_none());
    }

    #[test]
    fn bindings_survive_and_thread_forward() {
        let first = run("x = 5\n");
        assert_eq!(first.bindings.get("x"), Some(&Value::Int(5)));
        let second = run_with("x + 1\n", first.bindings);
        assert_eq!(second.value, Some(Value::Int(6)));
        assert_eq!(second.bindings.get("x"), Some(&Value::Int(5)));
    }

    #[test]
    fn guard_routine_prints_marker_and_returns_sentinel() {
        let result = run(&format!("r = {}('anything', 42)\n", INERT_CALL));
        assert_eq!(result.captured_output, format!("{}\n", INERT_CALL_MARKER));
        assert_eq!(
            result.bindings.get("r"),
            Some(&Value::Str(INERT_RESULT.to_string()))
        );
        // the guard binding itself is not carried forward
        assert!(!result.bindings.contains_key(INERT_CALL));
    }

    #[test]
    fn functions_loops_and_conditionals() {
        let source = "\
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)
total = 0
for i in range(7):
    total += fib(i)
print(total)
";
        let result = run(source);
        assert_eq!(result.captured_output, "20\n");
    }

    #[test]
    fn while_with_break_and_continue() {
        let source = "\
n = 0
out = 0
while True:
    n += 1
    if n > 10:
        break
    if n % 2 == 0:
        continue
    out += n
print(out)
";
        assert_eq!(run(source).captured_output, "25\n");
    }

    #[test]
    fn try_except_catches_matching_type() {
        let source = "\
try:
    raise ValueError('nope')
except ValueError as e:
    print('caught', e)
finally:
    print('done')
";
        let result = run(source);
        assert_eq!(result.captured_output, "caught ValueError: nope\ndone\n");
    }

    #[test]
    fn bare_raise_rethrows_the_active_exception() {
        let source = "\
try:
    try:
        raise ValueError('boom')
    except ValueError:
        raise
except ValueError as e:
    print('outer', e)
";
        let result = run(source);
        assert_eq!(result.captured_output, "outer ValueError: boom\n");
    }

    #[test]
    fn bare_raise_outside_a_handler_faults() {
        let module = parse("raise\n").unwrap();
        let err = Session::new().execute(&module, Bindings::new()).unwrap_err();
        match err {
            SandboxError::Runtime(message) => {
                assert!(message.contains("no active exception"))
            }
            other => panic!("expected runtime fault, got {:?}", other),
        }
    }

    #[test]
    fn uncaught_fault_is_turn_scoped_runtime_error() {
        let module = parse("missing + 1\n").unwrap();
        let err = Session::new().execute(&module, Bindings::new()).unwrap_err();
        match err {
            SandboxError::Runtime(message) => assert!(message.contains("missing")),
            other => panic!("expected runtime fault, got {:?}", other),
        }
    }

    #[test]
    fn allowed_import_binds_module_proxy() {
        let result = run("import json\n");
        assert_eq!(
            result.bindings.get("json"),
            Some(&Value::ModuleProxy("json".to_string()))
        );
    }

    #[test]
    fn module_proxy_attribute_access_faults() {
        let module = parse("import json\njson.loads('{}')\n").unwrap();
        let err = Session::new().execute(&module, Bindings::new()).unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)));
    }

    #[test]
    fn sequence_and_dict_operations() {
        let source = "\
xs = [3, 1, 2]
xs[0] = 9
d = {'a': 1}
d['b'] = 2
print(xs[0], xs[-1], len(xs), d['b'], 'a' in d)
";
        assert_eq!(run(source).captured_output, "9 2 3 2 True\n");
    }

    #[test]
    fn python_style_floor_division_and_modulo() {
        let result = run("print(-7 // 2, -7 % 2, 7 % -2)\n");
        assert_eq!(result.captured_output, "-4 1 -1\n");
    }

    #[test]
    fn smallest_integer_arithmetic_wraps_instead_of_aborting() {
        let source = "\
x = -9223372036854775807 - 1
print(x // -1, x % -1)
print(-x, abs(x))
";
        let result = run(source);
        assert_eq!(
            result.captured_output,
            "-9223372036854775808 0\n-9223372036854775808 -9223372036854775808\n"
        );
    }

    #[test]
    fn huge_negative_index_is_an_index_error() {
        let source = "x = -9223372036854775807 - 1\nxs = [1, 2]\nxs[x]\n";
        let module = parse(source).unwrap();
        let err = Session::new().execute(&module, Bindings::new()).unwrap_err();
        match err {
            SandboxError::Runtime(message) => assert!(message.contains("index out of range")),
            other => panic!("expected index fault, got {:?}", other),
        }
    }

    #[test]
    fn boolops_return_operands() {
        let result = run("print(0 or 'fallback', 1 and 2)\n");
        assert_eq!(result.captured_output, "fallback 2\n");
    }

    #[test]
    fn tuple_unpacking_assignment() {
        let result = run("a, b = 1, 2\na, b = b, a\nprint(a, b)\n");
        assert_eq!(result.captured_output, "2 1\n");
    }

    #[test]
    fn recursion_is_bounded() {
        let module = parse("def loop():\n    return loop()\nloop()\n").unwrap();
        let err = Session::new().execute(&module, Bindings::new()).unwrap_err();
        match err {
            SandboxError::Runtime(message) => assert!(message.contains("RecursionError")),
            other => panic!("expected recursion fault, got {:?}", other),
        }
    }

    #[test]
    fn deterministic_output_across_sessions() {
        let source = "x = 2 ** 10\nprint(x)\n";
        let a = run(source);
        let b = run(source);
        assert_eq!(a.captured_output, b.captured_output);
        assert_eq!(a.bindings, b.bindings);
    }
}
