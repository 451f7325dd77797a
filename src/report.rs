//! Analysis report: counts, detail lists, and derived metrics collected
//! in one walk over the tree. Created fresh per analysis call and never
//! mutated after it is returned. Serializable for offline inspection.

use crate::errors::Result;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionInfo {
    pub name: String,
    pub line: usize,
    pub args: Vec<String>,
    pub returns: Option<String>,
    pub decorators: Vec<String>,
    pub docstring: Option<String>,
    pub complexity: u32,
    #[serde(rename = "class")]
    pub enclosing_class: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub line: usize,
    pub bases: Vec<String>,
    pub decorators: Vec<String>,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Import,
    FromImport,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImportInfo {
    #[serde(rename = "type")]
    pub kind: ImportKind,
    pub module: String,
    /// Imported symbol, present for from-imports only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub alias: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallInfo {
    pub function: String,
    pub line: usize,
    pub args: usize,
    pub kwargs: usize,
    pub context: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    For,
    While,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoopInfo {
    #[serde(rename = "type")]
    pub kind: LoopKind,
    pub line: usize,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConditionalInfo {
    pub line: usize,
    pub has_else: bool,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExceptionInfo {
    Try {
        line: usize,
        handlers: usize,
        has_finally: bool,
        context: String,
    },
    Except {
        exception: String,
        line: usize,
        context: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DecoratorInfo {
    pub decorator: String,
    pub target: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocstringKind {
    Function,
    Class,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocstringInfo {
    #[serde(rename = "type")]
    pub kind: DocstringKind,
    pub name: String,
    pub docstring: String,
    pub line: usize,
}

/// One policy violation discovered and neutralized during the walk.
/// Violations do not fail the analysis; they are surfaced here so a
/// caller can see how the sanitized program differs from the submitted
/// one.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    BlockedImport,
    BlockedCall,
    BlockedAttribute,
}

impl ViolationKind {
    pub fn label(&self) -> &'static str {
        match self {
            ViolationKind::BlockedImport => "import",
            ViolationKind::BlockedCall => "call",
            ViolationKind::BlockedAttribute => "attribute",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub total_lines: usize,
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
    pub variables: usize,
    pub function_calls: usize,
    pub complexity_score: u32,
    pub loops: usize,
    pub conditionals: usize,
    pub exceptions: usize,
    pub violations: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Metrics {
    pub documentation_ratio: f64,
    pub average_function_complexity: f64,
    pub most_complex_function: Option<FunctionInfo>,
    pub import_diversity: usize,
    pub decorator_usage: usize,
    pub exception_handling_ratio: f64,
}

/// Raw lists gathered by the analyzer's walk, before derivation.
#[derive(Debug, Default)]
pub struct ReportParts {
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<ImportInfo>,
    pub variables: Vec<String>,
    pub function_calls: Vec<CallInfo>,
    pub decorators: Vec<DecoratorInfo>,
    pub docstrings: Vec<DocstringInfo>,
    pub loops: Vec<LoopInfo>,
    pub conditionals: Vec<ConditionalInfo>,
    pub exceptions: Vec<ExceptionInfo>,
    pub violations: Vec<Violation>,
    pub complexity_score: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Report {
    pub summary: Summary,
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<ImportInfo>,
    /// Identifiers bound by assignment, sorted for order-insensitivity.
    pub variables: Vec<String>,
    pub function_calls: Vec<CallInfo>,
    pub decorators: Vec<DecoratorInfo>,
    pub docstrings: Vec<DocstringInfo>,
    pub loops: Vec<LoopInfo>,
    pub conditionals: Vec<ConditionalInfo>,
    pub exceptions: Vec<ExceptionInfo>,
    pub violations: Vec<Violation>,
    pub metrics: Metrics,
    pub over_complexity_budget: bool,
}

impl Report {
    /// Derives summary and metrics from the collected lists. Pure: the
    /// same parts always compile to the same report.
    pub fn compile(mut parts: ReportParts, line_count: usize, max_complexity: u32) -> Self {
        parts.variables.sort();
        parts.variables.dedup();

        let total_funcs = parts.functions.len();
        let documented_funcs = parts
            .functions
            .iter()
            .filter(|f| f.docstring.is_some())
            .count();
        let documentation_ratio = if total_funcs > 0 {
            documented_funcs as f64 / total_funcs as f64
        } else {
            0.0
        };
        let average_function_complexity = if total_funcs > 0 {
            parts.functions.iter().map(|f| f.complexity as f64).sum::<f64>() / total_funcs as f64
        } else {
            0.0
        };
        let most_complex_function = parts
            .functions
            .iter()
            .max_by_key(|f| f.complexity)
            .cloned();
        let import_diversity = {
            let mut modules: Vec<&str> = parts
                .imports
                .iter()
                .map(|i| i.module.as_str())
                .filter(|m| !m.is_empty())
                .collect();
            modules.sort_unstable();
            modules.dedup();
            modules.len()
        };
        let exception_handling_ratio = if line_count > 0 {
            parts.exceptions.len() as f64 / line_count as f64
        } else {
            0.0
        };

        let metrics = Metrics {
            documentation_ratio,
            average_function_complexity,
            most_complex_function,
            import_diversity,
            decorator_usage: parts.decorators.len(),
            exception_handling_ratio,
        };

        let summary = Summary {
            total_lines: line_count,
            functions: parts.functions.len(),
            classes: parts.classes.len(),
            imports: parts.imports.len(),
            variables: parts.variables.len(),
            function_calls: parts.function_calls.len(),
            complexity_score: parts.complexity_score,
            loops: parts.loops.len(),
            conditionals: parts.conditionals.len(),
            exceptions: parts.exceptions.len(),
            violations: parts.violations.len(),
        };

        Report {
            over_complexity_budget: parts.complexity_score > max_complexity,
            summary,
            functions: parts.functions,
            classes: parts.classes,
            imports: parts.imports,
            variables: parts.variables,
            function_calls: parts.function_calls,
            decorators: parts.decorators,
            docstrings: parts.docstrings,
            loops: parts.loops,
            conditionals: parts.conditionals,
            exceptions: parts.exceptions,
            violations: parts.violations,
            metrics,
        }
    }

    /// Structured-text form of the report, for offline inspection.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, complexity: u32, docstring: Option<&str>) -> FunctionInfo {
        FunctionInfo {
            name: name.to_string(),
            line: 1,
            args: vec![],
            returns: None,
            decorators: vec![],
            docstring: docstring.map(|s| s.to_string()),
            complexity,
            enclosing_class: None,
        }
    }

    #[test]
    fn zero_functions_yield_zero_metrics() {
        let report = Report::compile(ReportParts::default(), 0, 4);
        assert_eq!(report.metrics.documentation_ratio, 0.0);
        assert_eq!(report.metrics.average_function_complexity, 0.0);
        assert!(report.metrics.most_complex_function.is_none());
        assert_eq!(report.metrics.exception_handling_ratio, 0.0);
    }

    #[test]
    fn metrics_derivation() {
        let parts = ReportParts {
            functions: vec![
                function("a", 1, Some("doc")),
                function("b", 5, None),
            ],
            complexity_score: 3,
            ..Default::default()
        };
        let report = Report::compile(parts, 10, 4);
        assert_eq!(report.metrics.documentation_ratio, 0.5);
        assert_eq!(report.metrics.average_function_complexity, 3.0);
        assert_eq!(
            report.metrics.most_complex_function.as_ref().unwrap().name,
            "b"
        );
        assert_eq!(report.summary.complexity_score, 3);
        assert!(!report.over_complexity_budget);
    }

    #[test]
    fn variables_are_sorted_and_deduped() {
        let parts = ReportParts {
            variables: vec!["z".into(), "a".into(), "z".into()],
            ..Default::default()
        };
        let report = Report::compile(parts, 1, 4);
        assert_eq!(report.variables, vec!["a".to_string(), "z".to_string()]);
    }

    #[test]
    fn report_serializes_with_original_field_names() {
        let report = Report::compile(ReportParts::default(), 2, 4);
        let json = report.to_json_pretty().unwrap();
        assert!(json.contains("\"total_lines\": 2"));
        assert!(json.contains("\"documentation_ratio\""));
    }
}
