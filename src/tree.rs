//! Syntax tree shared by the parser, the analyzer, and the execution
//! session.
//!
//! The parser builds these nodes once; the analyzer walks them and emits a
//! sanitized copy, which the interpreter then executes directly. The set of
//! variants is closed: anything the parser cannot express never reaches the
//! analyzer.

/// Sentinel identifier substituted for a blacklisted import or attribute
/// base. It resolves to an inert value in the runtime, never to the real
/// module or symbol.
pub const INERT_NAME: &str = "_inert";

/// Sentinel substituted for the base of an attribute access whose base
/// identifier is blacklisted. Distinct from [`INERT_NAME`] so a rewritten
/// access fails safely instead of resolving to anything real.
pub const INERT_ATTR: &str = "_inert_attr";

/// Name of the guard routine that neutralized call sites are rewritten to.
/// The execution session injects a definition for it before running.
pub const INERT_CALL: &str = "_inert_call";

/// Fixed diagnostic line the guard routine prints when invoked.
pub const INERT_CALL_MARKER: &str = "inert call intercepted";

/// Fixed sentinel value the guard routine returns.
pub const INERT_RESULT: &str = "inert";

/// A parsed program: the root of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

/// Whether a name is being read or bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRole {
    Load,
    Store,
}

/// One `name` or `name as alias` clause of an import statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportAlias {
    pub name: String,
    pub asname: Option<String>,
}

impl ImportAlias {
    /// Identifier the import binds in the program's namespace.
    pub fn bound_name(&self) -> &str {
        self.asname.as_deref().unwrap_or(&self.name)
    }
}

/// One `except` clause of a try statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    /// Exception-type expression, absent for a bare `except:`.
    pub exc_type: Option<Expr>,
    /// Name bound by `except T as e`.
    pub bind: Option<String>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    FunctionDef {
        name: String,
        params: Vec<String>,
        returns: Option<Expr>,
        decorators: Vec<Expr>,
        body: Vec<Stmt>,
        is_async: bool,
        line: usize,
    },
    ClassDef {
        name: String,
        bases: Vec<Expr>,
        decorators: Vec<Expr>,
        body: Vec<Stmt>,
        line: usize,
    },
    Import {
        names: Vec<ImportAlias>,
        line: usize,
    },
    ImportFrom {
        module: String,
        names: Vec<ImportAlias>,
        line: usize,
    },
    Assign {
        targets: Vec<Expr>,
        value: Expr,
        line: usize,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
        line: usize,
    },
    Expr {
        value: Expr,
        line: usize,
    },
    Return {
        value: Option<Expr>,
        line: usize,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        line: usize,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        line: usize,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        line: usize,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        finalbody: Vec<Stmt>,
        line: usize,
    },
    Raise {
        exc: Option<Expr>,
        line: usize,
    },
    Pass { line: usize },
    Break { line: usize },
    Continue { line: usize },
}

impl Stmt {
    pub fn line(&self) -> usize {
        match self {
            Stmt::FunctionDef { line, .. }
            | Stmt::ClassDef { line, .. }
            | Stmt::Import { line, .. }
            | Stmt::ImportFrom { line, .. }
            | Stmt::Assign { line, .. }
            | Stmt::AugAssign { line, .. }
            | Stmt::Expr { line, .. }
            | Stmt::Return { line, .. }
            | Stmt::If { line, .. }
            | Stmt::While { line, .. }
            | Stmt::For { line, .. }
            | Stmt::Try { line, .. }
            | Stmt::Raise { line, .. }
            | Stmt::Pass { line }
            | Stmt::Break { line }
            | Stmt::Continue { line } => *line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    NoneLit { line: usize },
    Bool { value: bool, line: usize },
    Int { value: i64, line: usize },
    Float { value: f64, line: usize },
    Str { value: String, line: usize },
    Name { id: String, role: NameRole, line: usize },
    List { elts: Vec<Expr>, line: usize },
    Tuple { elts: Vec<Expr>, line: usize },
    Dict { entries: Vec<(Expr, Expr)>, line: usize },
    Attribute {
        value: Box<Expr>,
        attr: String,
        line: usize,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        line: usize,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        line: usize,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        line: usize,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
        line: usize,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
        line: usize,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
        line: usize,
    },
}

impl Expr {
    pub fn line(&self) -> usize {
        match self {
            Expr::NoneLit { line }
            | Expr::Bool { line, .. }
            | Expr::Int { line, .. }
            | Expr::Float { line, .. }
            | Expr::Str { line, .. }
            | Expr::Name { line, .. }
            | Expr::List { line, .. }
            | Expr::Tuple { line, .. }
            | Expr::Dict { line, .. }
            | Expr::Attribute { line, .. }
            | Expr::Subscript { line, .. }
            | Expr::Call { line, .. }
            | Expr::UnaryOp { line, .. }
            | Expr::BinOp { line, .. }
            | Expr::BoolOp { line, .. }
            | Expr::Compare { line, .. } => *line,
        }
    }
}

/// Docstring of a function/class/module body: the leading string-literal
/// expression statement, if any.
pub fn docstring(body: &[Stmt]) -> Option<&str> {
    match body.first() {
        Some(Stmt::Expr {
            value: Expr::Str { value, .. },
            ..
        }) => Some(value.as_str()),
        _ => None,
    }
}

fn binop_text(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

fn cmpop_text(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "==",
        CmpOp::NotEq => "!=",
        CmpOp::Lt => "<",
        CmpOp::LtE => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtE => ">=",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
    }
}

/// Best-effort diagnostic rendering of an expression back to source text.
///
/// Used for report fields (call targets, decorators, base classes,
/// exception types). Returns `None` when a sub-expression cannot be
/// rendered; callers skip the corresponding report entry in that case.
pub fn unparse(expr: &Expr) -> Option<String> {
    match expr {
        Expr::NoneLit { .. } => Some("None".to_string()),
        Expr::Bool { value, .. } => Some(if *value { "True" } else { "False" }.to_string()),
        Expr::Int { value, .. } => Some(value.to_string()),
        Expr::Float { value, .. } => Some(value.to_string()),
        Expr::Str { value, .. } => Some(format!("'{}'", value)),
        Expr::Name { id, .. } => Some(id.clone()),
        Expr::Attribute { value, attr, .. } => Some(format!("{}.{}", unparse(value)?, attr)),
        Expr::Subscript { value, index, .. } => {
            Some(format!("{}[{}]", unparse(value)?, unparse(index)?))
        }
        Expr::Call { func, args, kwargs, .. } => {
            let mut parts = Vec::with_capacity(args.len() + kwargs.len());
            for arg in args {
                parts.push(unparse(arg)?);
            }
            for (name, value) in kwargs {
                parts.push(format!("{}={}", name, unparse(value)?));
            }
            Some(format!("{}({})", unparse(func)?, parts.join(", ")))
        }
        Expr::UnaryOp { op, operand, .. } => {
            let rendered = unparse(operand)?;
            Some(match op {
                UnaryOp::Neg => format!("-{}", rendered),
                UnaryOp::Not => format!("not {}", rendered),
            })
        }
        Expr::BinOp { left, op, right, .. } => Some(format!(
            "{} {} {}",
            unparse(left)?,
            binop_text(*op),
            unparse(right)?
        )),
        Expr::BoolOp { op, values, .. } => {
            let joiner = match op {
                BoolOpKind::And => " and ",
                BoolOpKind::Or => " or ",
            };
            let rendered: Option<Vec<String>> = values.iter().map(unparse).collect();
            Some(rendered?.join(joiner))
        }
        Expr::Compare {
            left,
            ops,
            comparators,
            ..
        } => {
            let mut out = unparse(left)?;
            for (op, comparator) in ops.iter().zip(comparators) {
                out.push_str(&format!(" {} {}", cmpop_text(*op), unparse(comparator)?));
            }
            Some(out)
        }
        Expr::List { elts, .. } => {
            let rendered: Option<Vec<String>> = elts.iter().map(unparse).collect();
            Some(format!("[{}]", rendered?.join(", ")))
        }
        Expr::Tuple { elts, .. } => {
            let rendered: Option<Vec<String>> = elts.iter().map(unparse).collect();
            Some(format!("({})", rendered?.join(", ")))
        }
        Expr::Dict { entries, .. } => {
            let mut parts = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                parts.push(format!("{}: {}", unparse(key)?, unparse(value)?));
            }
            Some(format!("{{{}}}", parts.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(id: &str) -> Expr {
        Expr::Name {
            id: id.to_string(),
            role: NameRole::Load,
            line: 1,
        }
    }

    #[test]
    fn unparse_attribute_call() {
        let call = Expr::Call {
            func: Box::new(Expr::Attribute {
                value: Box::new(name("os")),
                attr: "system".to_string(),
                line: 1,
            }),
            args: vec![Expr::Str {
                value: "echo hi".to_string(),
                line: 1,
            }],
            kwargs: vec![],
            line: 1,
        };
        assert_eq!(unparse(&call).unwrap(), "os.system('echo hi')");
    }

    #[test]
    fn docstring_is_leading_string_expr() {
        let body = vec![
            Stmt::Expr {
                value: Expr::Str {
                    value: "does things".to_string(),
                    line: 2,
                },
                line: 2,
            },
            Stmt::Pass { line: 3 },
        ];
        assert_eq!(docstring(&body), Some("does things"));
        assert_eq!(docstring(&body[1..]), None);
    }
}
