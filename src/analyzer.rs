//! Policy-enforcing analysis pass.
//!
//! One depth-first, pre-order walk over the tree produces both a
//! structural report and a sanitized copy in which every policy-violating
//! node has been replaced by an inert substitute. The input tree is left
//! untouched; the shared [`Policy`] is never mutated — per-pass blacklist
//! growth happens on a working copy that is discarded when the pass ends.

use crate::config::Policy;
use crate::report::{
    CallInfo, ClassInfo, ConditionalInfo, DecoratorInfo, DocstringInfo, DocstringKind,
    ExceptionInfo, FunctionInfo, ImportInfo, ImportKind, LoopInfo, LoopKind, Report, ReportParts,
    Violation, ViolationKind,
};
use crate::tree::{
    self, Expr, ImportAlias, Module, NameRole, Stmt, INERT_ATTR, INERT_CALL, INERT_NAME,
};
use std::collections::HashSet;
use tracing::debug;

/// Result of one analysis pass.
#[derive(Debug)]
pub struct Analysis {
    pub report: Report,
    pub sanitized: Module,
}

/// Per-pass mutable view of the policy's unified blacklist. Grows
/// monotonically as blocked imports are discovered, so every later
/// reference to a symbol imported under a blocked name is treated as
/// tainted too.
#[derive(Debug, Clone)]
struct WorkingPolicy {
    blacklist: HashSet<String>,
}

impl WorkingPolicy {
    fn from_policy(policy: &Policy) -> Self {
        Self {
            blacklist: policy.unified_blacklist().clone(),
        }
    }

    fn is_blocked(&self, name: &str) -> bool {
        self.blacklist.contains(name)
    }

    fn taint(&mut self, name: &str) {
        self.blacklist.insert(name.to_string());
    }
}

/// Entry on the explicit scope stack threaded through the walk.
#[derive(Debug, Clone)]
enum Scope {
    Function(String),
    Class(String),
}

pub struct Analyzer<'a> {
    policy: &'a Policy,
}

impl<'a> Analyzer<'a> {
    pub fn new(policy: &'a Policy) -> Self {
        Self { policy }
    }

    /// Analyzes a tree: collects the report and builds the sanitized
    /// copy. `line_count` is the source line count, used for the
    /// exception-handling ratio.
    pub fn analyze(&self, module: &Module, line_count: usize) -> Analysis {
        let mut walk = Walk {
            policy: self.policy,
            working: WorkingPolicy::from_policy(self.policy),
            parts: ReportParts::default(),
            scope: Vec::new(),
        };
        let body = walk.stmts(&module.body);
        let report = Report::compile(walk.parts, line_count, self.policy.max_complexity());
        Analysis {
            report,
            sanitized: Module { body },
        }
    }
}

struct Walk<'a> {
    policy: &'a Policy,
    working: WorkingPolicy,
    parts: ReportParts,
    scope: Vec<Scope>,
}

impl Walk<'_> {
    fn context(&self) -> String {
        if self.scope.is_empty() {
            return "global".to_string();
        }
        self.scope
            .iter()
            .map(|entry| match entry {
                Scope::Function(name) => format!("function:{}", name),
                Scope::Class(name) => format!("class:{}", name),
            })
            .collect::<Vec<_>>()
            .join("::")
    }

    fn enclosing_class(&self) -> Option<String> {
        self.scope.iter().rev().find_map(|entry| match entry {
            Scope::Class(name) => Some(name.clone()),
            Scope::Function(_) => None,
        })
    }

    fn stmts(&mut self, body: &[Stmt]) -> Vec<Stmt> {
        body.iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn stmt(&mut self, stmt: &Stmt) -> Stmt {
        match stmt {
            Stmt::Import { names, line } => self.import_stmt(names, *line),
            Stmt::ImportFrom {
                module,
                names,
                line,
            } => self.import_from_stmt(module, names, *line),
            Stmt::FunctionDef {
                name,
                params,
                returns,
                decorators,
                body,
                is_async,
                line,
            } => self.function_def(name, params, returns, decorators, body, *is_async, *line),
            Stmt::ClassDef {
                name,
                bases,
                decorators,
                body,
                line,
            } => self.class_def(name, bases, decorators, body, *line),
            Stmt::Assign {
                targets,
                value,
                line,
            } => Stmt::Assign {
                targets: targets.iter().map(|t| self.expr(t)).collect(),
                value: self.expr(value),
                line: *line,
            },
            Stmt::AugAssign {
                target,
                op,
                value,
                line,
            } => Stmt::AugAssign {
                target: self.expr(target),
                op: *op,
                value: self.expr(value),
                line: *line,
            },
            Stmt::Expr { value, line } => Stmt::Expr {
                value: self.expr(value),
                line: *line,
            },
            Stmt::Return { value, line } => Stmt::Return {
                value: value.as_ref().map(|v| self.expr(v)),
                line: *line,
            },
            Stmt::If {
                test,
                body,
                orelse,
                line,
            } => {
                self.parts.conditionals.push(ConditionalInfo {
                    line: *line,
                    has_else: !orelse.is_empty(),
                    context: self.context(),
                });
                self.parts.complexity_score += 1;
                Stmt::If {
                    test: self.expr(test),
                    body: self.stmts(body),
                    orelse: self.stmts(orelse),
                    line: *line,
                }
            }
            Stmt::While { test, body, line } => {
                self.parts.loops.push(LoopInfo {
                    kind: LoopKind::While,
                    line: *line,
                    context: self.context(),
                });
                self.parts.complexity_score += 1;
                Stmt::While {
                    test: self.expr(test),
                    body: self.stmts(body),
                    line: *line,
                }
            }
            Stmt::For {
                target,
                iter,
                body,
                line,
            } => {
                self.parts.loops.push(LoopInfo {
                    kind: LoopKind::For,
                    line: *line,
                    context: self.context(),
                });
                self.parts.complexity_score += 1;
                Stmt::For {
                    target: self.expr(target),
                    iter: self.expr(iter),
                    body: self.stmts(body),
                    line: *line,
                }
            }
            Stmt::Try {
                body,
                handlers,
                finalbody,
                line,
            } => {
                self.parts.exceptions.push(ExceptionInfo::Try {
                    line: *line,
                    handlers: handlers.len(),
                    has_finally: !finalbody.is_empty(),
                    context: self.context(),
                });
                self.parts.complexity_score += 1;
                let new_handlers = handlers
                    .iter()
                    .map(|handler| {
                        let exception = handler
                            .exc_type
                            .as_ref()
                            .and_then(tree::unparse)
                            .unwrap_or_else(|| "Exception".to_string());
                        self.parts.exceptions.push(ExceptionInfo::Except {
                            exception,
                            line: handler.line,
                            context: self.context(),
                        });
                        tree::ExceptHandler {
                            exc_type: handler.exc_type.as_ref().map(|t| self.expr(t)),
                            bind: handler.bind.clone(),
                            body: self.stmts(&handler.body),
                            line: handler.line,
                        }
                    })
                    .collect();
                Stmt::Try {
                    body: self.stmts(body),
                    handlers: new_handlers,
                    finalbody: self.stmts(finalbody),
                    line: *line,
                }
            }
            Stmt::Raise { exc, line } => Stmt::Raise {
                exc: exc.as_ref().map(|e| self.expr(e)),
                line: *line,
            },
            Stmt::Pass { line } => Stmt::Pass { line: *line },
            Stmt::Break { line } => Stmt::Break { line: *line },
            Stmt::Continue { line } => Stmt::Continue { line: *line },
        }
    }

    /// `import a, b as c`: blacklisted names are rewritten to the inert
    /// sentinel and the identifier they would have bound is tainted for
    /// the rest of the pass.
    fn import_stmt(&mut self, names: &[ImportAlias], line: usize) -> Stmt {
        let mut new_names = Vec::with_capacity(names.len());
        for alias in names {
            let blocked = self.policy.blacklist_imports().contains(&alias.name)
                || alias
                    .asname
                    .as_deref()
                    .is_some_and(|a| self.policy.blacklist_imports().contains(a));
            if blocked {
                let bound = alias.bound_name().to_string();
                debug!(module = %alias.name, bound = %bound, line, "neutralizing blacklisted import");
                self.working.taint(&bound);
                self.parts.violations.push(Violation {
                    kind: ViolationKind::BlockedImport,
                    name: alias.name.clone(),
                    line,
                });
                new_names.push(ImportAlias {
                    name: INERT_NAME.to_string(),
                    asname: Some(bound),
                });
            } else {
                self.parts.imports.push(ImportInfo {
                    kind: ImportKind::Import,
                    module: alias.name.clone(),
                    name: None,
                    alias: alias.asname.clone(),
                    line,
                });
                new_names.push(alias.clone());
            }
        }
        Stmt::Import {
            names: new_names,
            line,
        }
    }

    /// `from m import a as b`: the imported names (and their aliases) are
    /// checked against the blacklist, matching the import form above.
    fn import_from_stmt(&mut self, module: &str, names: &[ImportAlias], line: usize) -> Stmt {
        let mut new_names = Vec::with_capacity(names.len());
        for alias in names {
            let blocked = self.policy.blacklist_imports().contains(&alias.name)
                || alias
                    .asname
                    .as_deref()
                    .is_some_and(|a| self.policy.blacklist_imports().contains(a));
            if blocked {
                let bound = alias.bound_name().to_string();
                debug!(module, symbol = %alias.name, bound = %bound, line, "neutralizing blacklisted from-import");
                self.working.taint(&bound);
                self.parts.violations.push(Violation {
                    kind: ViolationKind::BlockedImport,
                    name: alias.name.clone(),
                    line,
                });
                new_names.push(ImportAlias {
                    name: INERT_NAME.to_string(),
                    asname: Some(bound),
                });
            } else {
                self.parts.imports.push(ImportInfo {
                    kind: ImportKind::FromImport,
                    module: module.to_string(),
                    name: Some(alias.name.clone()),
                    alias: alias.asname.clone(),
                    line,
                });
                new_names.push(alias.clone());
            }
        }
        Stmt::ImportFrom {
            module: module.to_string(),
            names: new_names,
            line,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn function_def(
        &mut self,
        name: &str,
        params: &[String],
        returns: &Option<Expr>,
        decorators: &[Expr],
        body: &[Stmt],
        is_async: bool,
        line: usize,
    ) -> Stmt {
        let docstring = tree::docstring(body).map(|s| s.to_string());
        let decorator_texts: Vec<String> =
            decorators.iter().filter_map(tree::unparse).collect();
        for (decorator, text) in decorators.iter().zip(decorator_texts.iter()) {
            self.parts.decorators.push(DecoratorInfo {
                decorator: text.clone(),
                target: name.to_string(),
                line: decorator.line(),
            });
        }
        if let Some(doc) = &docstring {
            self.parts.docstrings.push(DocstringInfo {
                kind: DocstringKind::Function,
                name: name.to_string(),
                docstring: doc.clone(),
                line,
            });
        }
        self.parts.functions.push(FunctionInfo {
            name: name.to_string(),
            line,
            args: params.to_vec(),
            returns: returns.as_ref().and_then(tree::unparse),
            decorators: decorator_texts,
            docstring,
            complexity: function_complexity(body),
            enclosing_class: self.enclosing_class(),
        });

        self.scope.push(Scope::Function(name.to_string()));
        let new_body = self.stmts(body);
        self.scope.pop();

        Stmt::FunctionDef {
            name: name.to_string(),
            params: params.to_vec(),
            returns: returns.as_ref().map(|r| self.expr(r)),
            decorators: decorators.iter().map(|d| self.expr(d)).collect(),
            body: new_body,
            is_async,
            line,
        }
    }

    fn class_def(
        &mut self,
        name: &str,
        bases: &[Expr],
        decorators: &[Expr],
        body: &[Stmt],
        line: usize,
    ) -> Stmt {
        let docstring = tree::docstring(body).map(|s| s.to_string());
        let decorator_texts: Vec<String> =
            decorators.iter().filter_map(tree::unparse).collect();
        for (decorator, text) in decorators.iter().zip(decorator_texts.iter()) {
            self.parts.decorators.push(DecoratorInfo {
                decorator: text.clone(),
                target: name.to_string(),
                line: decorator.line(),
            });
        }
        if let Some(doc) = &docstring {
            self.parts.docstrings.push(DocstringInfo {
                kind: DocstringKind::Class,
                name: name.to_string(),
                docstring: doc.clone(),
                line,
            });
        }
        self.parts.classes.push(ClassInfo {
            name: name.to_string(),
            line,
            bases: bases.iter().filter_map(tree::unparse).collect(),
            decorators: decorator_texts,
            docstring,
        });

        self.scope.push(Scope::Class(name.to_string()));
        let new_body = self.stmts(body);
        self.scope.pop();

        Stmt::ClassDef {
            name: name.to_string(),
            bases: bases.iter().map(|b| self.expr(b)).collect(),
            decorators: decorators.iter().map(|d| self.expr(d)).collect(),
            body: new_body,
            line,
        }
    }

    fn expr(&mut self, expr: &Expr) -> Expr {
        match expr {
            Expr::Call {
                func,
                args,
                kwargs,
                line,
            } => self.call_expr(func, args, kwargs, *line),
            Expr::Attribute { value, attr, line } => {
                // rewrites e.g. `os.system` when `os` is tainted
                if let Expr::Name { id, role, line: name_line } = value.as_ref() {
                    if self.working.is_blocked(id) {
                        debug!(base = %id, attr = %attr, line, "rewriting tainted attribute base");
                        self.parts.violations.push(Violation {
                            kind: ViolationKind::BlockedAttribute,
                            name: format!("{}.{}", id, attr),
                            line: *line,
                        });
                        return Expr::Attribute {
                            value: Box::new(Expr::Name {
                                id: INERT_ATTR.to_string(),
                                role: *role,
                                line: *name_line,
                            }),
                            attr: attr.clone(),
                            line: *line,
                        };
                    }
                }
                Expr::Attribute {
                    value: Box::new(self.expr(value)),
                    attr: attr.clone(),
                    line: *line,
                }
            }
            Expr::Name { id, role, line } => {
                if *role == NameRole::Store {
                    self.parts.variables.push(id.clone());
                }
                Expr::Name {
                    id: id.clone(),
                    role: *role,
                    line: *line,
                }
            }
            Expr::List { elts, line } => Expr::List {
                elts: elts.iter().map(|e| self.expr(e)).collect(),
                line: *line,
            },
            Expr::Tuple { elts, line } => Expr::Tuple {
                elts: elts.iter().map(|e| self.expr(e)).collect(),
                line: *line,
            },
            Expr::Dict { entries, line } => Expr::Dict {
                entries: entries
                    .iter()
                    .map(|(k, v)| (self.expr(k), self.expr(v)))
                    .collect(),
                line: *line,
            },
            Expr::Subscript { value, index, line } => Expr::Subscript {
                value: Box::new(self.expr(value)),
                index: Box::new(self.expr(index)),
                line: *line,
            },
            Expr::UnaryOp { op, operand, line } => Expr::UnaryOp {
                op: *op,
                operand: Box::new(self.expr(operand)),
                line: *line,
            },
            Expr::BinOp {
                left,
                op,
                right,
                line,
            } => Expr::BinOp {
                left: Box::new(self.expr(left)),
                op: *op,
                right: Box::new(self.expr(right)),
                line: *line,
            },
            Expr::BoolOp { op, values, line } => Expr::BoolOp {
                op: *op,
                values: values.iter().map(|v| self.expr(v)).collect(),
                line: *line,
            },
            Expr::Compare {
                left,
                ops,
                comparators,
                line,
            } => Expr::Compare {
                left: Box::new(self.expr(left)),
                ops: ops.clone(),
                comparators: comparators.iter().map(|c| self.expr(c)).collect(),
                line: *line,
            },
            literal @ (Expr::NoneLit { .. }
            | Expr::Bool { .. }
            | Expr::Int { .. }
            | Expr::Float { .. }
            | Expr::Str { .. }) => literal.clone(),
        }
    }

    /// Calls through a tainted receiver are replaced by a call to the
    /// guard routine; the original arguments are kept (and still walked
    /// for reporting) but the receiver is never reached.
    fn call_expr(
        &mut self,
        func: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        line: usize,
    ) -> Expr {
        if let Expr::Attribute { value, attr, .. } = func {
            if let Expr::Name { id, .. } = value.as_ref() {
                if self.working.is_blocked(id) {
                    debug!(receiver = %id, method = %attr, line, "neutralizing call through tainted receiver");
                    self.parts.violations.push(Violation {
                        kind: ViolationKind::BlockedCall,
                        name: format!("{}.{}", id, attr),
                        line,
                    });
                    return Expr::Call {
                        func: Box::new(Expr::Name {
                            id: INERT_CALL.to_string(),
                            role: NameRole::Load,
                            line,
                        }),
                        args: args.iter().map(|a| self.expr(a)).collect(),
                        kwargs: kwargs
                            .iter()
                            .map(|(k, v)| (k.clone(), self.expr(v)))
                            .collect(),
                        line,
                    };
                }
            }
        }

        // calls whose callee cannot be rendered are walked but skipped
        // from the report
        if let Some(function) = tree::unparse(func) {
            self.parts.function_calls.push(CallInfo {
                function,
                line,
                args: args.len(),
                kwargs: kwargs.len(),
                context: self.context(),
            });
        }
        Expr::Call {
            func: Box::new(self.expr(func)),
            args: args.iter().map(|a| self.expr(a)).collect(),
            kwargs: kwargs
                .iter()
                .map(|(k, v)| (k.clone(), self.expr(v)))
                .collect(),
            line,
        }
    }
}

/// Cyclomatic complexity of one function body, computed independently of
/// the main walk: 1 + one point per contained If/While/For/ExceptHandler
/// + (arity - 1) per boolean combinator anywhere in the subtree.
fn function_complexity(body: &[Stmt]) -> u32 {
    1 + branches_in_stmts(body)
}

fn branches_in_stmts(stmts: &[Stmt]) -> u32 {
    stmts.iter().map(branches_in_stmt).sum()
}

fn branches_in_stmt(stmt: &Stmt) -> u32 {
    match stmt {
        Stmt::If {
            test, body, orelse, ..
        } => 1 + branches_in_expr(test) + branches_in_stmts(body) + branches_in_stmts(orelse),
        Stmt::While { test, body, .. } => {
            1 + branches_in_expr(test) + branches_in_stmts(body)
        }
        Stmt::For { iter, body, .. } => 1 + branches_in_expr(iter) + branches_in_stmts(body),
        Stmt::Try {
            body,
            handlers,
            finalbody,
            ..
        } => {
            let handler_points: u32 = handlers
                .iter()
                .map(|h| 1 + branches_in_stmts(&h.body))
                .sum();
            branches_in_stmts(body) + handler_points + branches_in_stmts(finalbody)
        }
        Stmt::FunctionDef { body, .. } | Stmt::ClassDef { body, .. } => branches_in_stmts(body),
        Stmt::Assign { targets, value, .. } => {
            targets.iter().map(branches_in_expr).sum::<u32>() + branches_in_expr(value)
        }
        Stmt::AugAssign { target, value, .. } => {
            branches_in_expr(target) + branches_in_expr(value)
        }
        Stmt::Expr { value, .. } => branches_in_expr(value),
        Stmt::Return { value, .. } => value.as_ref().map(branches_in_expr).unwrap_or(0),
        Stmt::Raise { exc, .. } => exc.as_ref().map(branches_in_expr).unwrap_or(0),
        Stmt::Import { .. }
        | Stmt::ImportFrom { .. }
        | Stmt::Pass { .. }
        | Stmt::Break { .. }
        | Stmt::Continue { .. } => 0,
    }
}

fn branches_in_expr(expr: &Expr) -> u32 {
    match expr {
        Expr::BoolOp { op: _, values, .. } => {
            (values.len().saturating_sub(1)) as u32
                + values.iter().map(branches_in_expr).sum::<u32>()
        }
        Expr::UnaryOp { operand, .. } => branches_in_expr(operand),
        Expr::BinOp { left, right, .. } => branches_in_expr(left) + branches_in_expr(right),
        Expr::Compare {
            left, comparators, ..
        } => branches_in_expr(left) + comparators.iter().map(branches_in_expr).sum::<u32>(),
        Expr::Call { func, args, kwargs, .. } => {
            branches_in_expr(func)
                + args.iter().map(branches_in_expr).sum::<u32>()
                + kwargs.iter().map(|(_, v)| branches_in_expr(v)).sum::<u32>()
        }
        Expr::Attribute { value, .. } => branches_in_expr(value),
        Expr::Subscript { value, index, .. } => branches_in_expr(value) + branches_in_expr(index),
        Expr::List { elts, .. } | Expr::Tuple { elts, .. } => {
            elts.iter().map(branches_in_expr).sum()
        }
        Expr::Dict { entries, .. } => entries
            .iter()
            .map(|(k, v)| branches_in_expr(k) + branches_in_expr(v))
            .sum(),
        Expr::NoneLit { .. }
        | Expr::Bool { .. }
        | Expr::Int { .. }
        | Expr::Float { .. }
        | Expr::Str { .. }
        | Expr::Name { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn analyze(source: &str) -> Analysis {
        let policy = Policy::default();
        let module = parse(source).unwrap();
        Analyzer::new(&policy).analyze(&module, source.lines().count())
    }

    #[test]
    fn blacklisted_import_is_neutralized() {
        let analysis = analyze("import os\n");
        match &analysis.sanitized.body[0] {
            Stmt::Import { names, .. } => {
                assert_eq!(names[0].name, INERT_NAME);
                assert_eq!(names[0].asname.as_deref(), Some("os"));
            }
            other => panic!("expected import, got {:?}", other),
        }
        assert!(analysis.report.imports.is_empty());
        assert_eq!(analysis.report.violations.len(), 1);
        assert_eq!(analysis.report.violations[0].kind, ViolationKind::BlockedImport);
    }

    #[test]
    fn allowed_import_is_recorded_unchanged() {
        let analysis = analyze("import json\n");
        assert!(matches!(
            &analysis.sanitized.body[0],
            Stmt::Import { names, .. } if names[0].name == "json"
        ));
        assert_eq!(analysis.report.imports.len(), 1);
        assert_eq!(analysis.report.imports[0].module, "json");
        assert!(analysis.report.violations.is_empty());
    }

    #[test]
    fn call_through_blocked_receiver_becomes_guard_call() {
        let analysis = analyze("import os\nos.system('echo hi')\n");
        match &analysis.sanitized.body[1] {
            Stmt::Expr {
                value: Expr::Call { func, args, .. },
                ..
            } => {
                assert!(matches!(
                    func.as_ref(),
                    Expr::Name { id, .. } if id == INERT_CALL
                ));
                // original argument preserved
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected guard call, got {:?}", other),
        }
        assert!(analysis
            .report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::BlockedCall && v.name == "os.system"));
    }

    #[test]
    fn alias_of_blocked_import_is_tainted() {
        let analysis = analyze("import os as shell\nshell.run('x')\n");
        match &analysis.sanitized.body[1] {
            Stmt::Expr {
                value: Expr::Call { func, .. },
                ..
            } => assert!(matches!(
                func.as_ref(),
                Expr::Name { id, .. } if id == INERT_CALL
            )),
            other => panic!("expected guard call, got {:?}", other),
        }
    }

    #[test]
    fn bare_attribute_on_blocked_base_gets_sentinel() {
        let analysis = analyze("import sys\nv = sys.path\n");
        match &analysis.sanitized.body[1] {
            Stmt::Assign { value, .. } => match value {
                Expr::Attribute { value, .. } => assert!(matches!(
                    value.as_ref(),
                    Expr::Name { id, .. } if id == INERT_ATTR
                )),
                other => panic!("expected attribute, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn input_tree_is_not_mutated() {
        let policy = Policy::default();
        let module = parse("import os\n").unwrap();
        let before = module.clone();
        let _ = Analyzer::new(&policy).analyze(&module, 1);
        assert_eq!(module, before);
        // and the shared policy kept its original blacklist
        assert_eq!(policy.unified_blacklist().len(), 3);
    }

    #[test]
    fn complexity_counts_branch_statements() {
        let source = "if a:\n    pass\nwhile b:\n    pass\nfor i in c:\n    pass\ntry:\n    pass\nexcept:\n    pass\n";
        let analysis = analyze(source);
        assert_eq!(analysis.report.summary.complexity_score, 4);
        assert_eq!(analysis.report.loops.len(), 2);
        assert_eq!(analysis.report.conditionals.len(), 1);
        // one try entry plus one except entry
        assert_eq!(analysis.report.exceptions.len(), 2);
    }

    #[test]
    fn function_report_carries_details() {
        let source = "@cached\ndef pick(a, b):\n    \"\"\"Choose one.\"\"\"\n    if a and b:\n        return a\n    return b\n";
        let analysis = analyze(source);
        let func = &analysis.report.functions[0];
        assert_eq!(func.name, "pick");
        assert_eq!(func.args, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(func.docstring.as_deref(), Some("Choose one."));
        assert_eq!(func.decorators, vec!["cached".to_string()]);
        // 1 base + 1 if + (2-arity `and` - 1)
        assert_eq!(func.complexity, 3);
        assert_eq!(analysis.report.metrics.documentation_ratio, 1.0);
        assert_eq!(analysis.report.decorators.len(), 1);
    }

    #[test]
    fn scope_context_labels_nested_nodes() {
        let source = "def outer():\n    helper()\n";
        let analysis = analyze(source);
        assert_eq!(analysis.report.function_calls.len(), 1);
        assert_eq!(analysis.report.function_calls[0].context, "function:outer");
    }

    #[test]
    fn store_names_become_variables() {
        let analysis = analyze("x = 1\ny = x\n");
        assert_eq!(analysis.report.variables, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn class_report_and_method_enclosing_class() {
        let source = "class Greeter(Base):\n    \"\"\"Says hi.\"\"\"\n    def greet(self):\n        pass\n";
        let analysis = analyze(source);
        assert_eq!(analysis.report.classes.len(), 1);
        assert_eq!(analysis.report.classes[0].bases, vec!["Base".to_string()]);
        assert_eq!(
            analysis.report.functions[0].enclosing_class.as_deref(),
            Some("Greeter")
        );
    }
}
