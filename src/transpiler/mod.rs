//! Script source preparation using OXC
//!
//! Injected files are classic scripts, not modules. Before a file reaches the
//! document this module:
//! - strips TypeScript syntax from `.ts`/`.mts`/`.cts` sources
//! - finds the function declarations at the top level of a script, so the
//!   isolation closure can re-export them onto the window

use oxc_allocator::Allocator;
use oxc_ast::ast::Statement;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{TransformOptions, Transformer};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while preparing a script source
#[derive(Error, Debug)]
pub enum TranspileError {
    #[error("Failed to parse {0}")]
    ParseError(String),

    #[error("Failed to transform TypeScript: {0}")]
    TransformError(String),

    #[error("Invalid source type: {0}")]
    InvalidSourceType(String),
}

/// Result type for transpilation operations
pub type TranspileResult<T> = Result<T, TranspileError>;

/// Whether a file needs its types stripped before injection
pub fn is_typescript(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ts" | "mts" | "cts")
    )
}

/// TypeScript stripper and script scanner
#[derive(Debug, Clone, Copy, Default)]
pub struct Transpiler;

impl Transpiler {
    pub fn new() -> Self {
        Self
    }

    /// Unknown or missing extensions are read as JavaScript; only TypeScript
    /// names must resolve
    fn script_source_type(filename: &str) -> TranspileResult<SourceType> {
        let source_type = match SourceType::from_path(filename) {
            Ok(source_type) => source_type,
            Err(_) if !is_typescript(Path::new(filename)) => SourceType::default(),
            Err(e) => {
                return Err(TranspileError::InvalidSourceType(format!(
                    "Unknown file extension: {:?}",
                    e
                )));
            }
        };
        // Injected files are evaluated as classic scripts
        Ok(source_type.with_script(true))
    }

    /// Strip TypeScript from `source`, returning plain JavaScript
    pub fn transpile(&self, source: &str, filename: &str) -> TranspileResult<String> {
        let allocator = Allocator::default();
        let source_type = Self::script_source_type(filename)?;

        let parser_return = Parser::new(&allocator, source, source_type).parse();
        if !parser_return.errors.is_empty() {
            let error_messages: Vec<String> = parser_return
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(TranspileError::ParseError(format!(
                "{}: {}",
                filename,
                error_messages.join("\n")
            )));
        }

        let mut program = parser_return.program;

        let semantic_ret = SemanticBuilder::new().build(&program);
        for error in &semantic_ret.errors {
            tracing::warn!(file = filename, "{}", error);
        }
        let scoping = semantic_ret.semantic.into_scoping();

        let transform_options = TransformOptions::default();
        let transformer_return =
            Transformer::new(&allocator, Path::new(filename), &transform_options)
                .build_with_scoping(scoping, &mut program);

        if !transformer_return.errors.is_empty() {
            let error_messages: Vec<String> = transformer_return
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(TranspileError::TransformError(error_messages.join("\n")));
        }

        Ok(Codegen::new()
            .with_options(CodegenOptions::default())
            .build(&program)
            .code)
    }

    /// Names of the function declarations at the top level of a script.
    ///
    /// Nested declarations, function expressions and arrow functions bound to
    /// variables are not included. Order follows the source.
    pub fn top_level_functions(&self, source: &str, filename: &str) -> TranspileResult<Vec<String>> {
        let allocator = Allocator::default();
        let source_type = Self::script_source_type(filename)?;

        let parser_return = Parser::new(&allocator, source, source_type).parse();
        if !parser_return.errors.is_empty() {
            let error_messages: Vec<String> = parser_return
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(TranspileError::ParseError(format!(
                "{}: {}",
                filename,
                error_messages.join("\n")
            )));
        }

        let mut names: Vec<String> = Vec::new();
        for statement in &parser_return.program.body {
            if let Statement::FunctionDeclaration(function) = statement {
                if let Some(id) = &function.id {
                    let name = id.name.to_string();
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_annotations_stripped() {
        let transpiler = Transpiler::new();
        let ts_code = r#"
            function formatLabel(name: string, count: number): string {
                return name + ": " + count;
            }
        "#;

        let js_code = transpiler.transpile(ts_code, "labels.ts").unwrap();
        assert!(!js_code.contains(": string"));
        assert!(js_code.contains("function formatLabel"));
    }

    #[test]
    fn test_interface_removal() {
        let transpiler = Transpiler::new();
        let ts_code = r#"
            interface User {
                name: string;
            }
            const user: User = { name: "Alice" };
        "#;

        let js_code = transpiler.transpile(ts_code, "user.ts").unwrap();
        assert!(!js_code.contains("interface"));
    }

    #[test]
    fn test_top_level_functions_only() {
        let transpiler = Transpiler::new();
        let code = r#"
            function add(a, b) { return a + b; }
            var helper = function () {};
            const arrow = () => 1;
            function outer() {
                function inner() {}
                return inner;
            }
            if (true) { function blockScoped() {} }
        "#;

        let names = transpiler.top_level_functions(code, "utils.js").unwrap();
        assert_eq!(names, vec!["add".to_string(), "outer".to_string()]);
    }

    #[test]
    fn test_top_level_functions_reports_syntax_errors() {
        let transpiler = Transpiler::new();
        let result = transpiler.top_level_functions("function (", "broken.js");
        assert!(matches!(result, Err(TranspileError::ParseError(_))));
    }

    #[test]
    fn test_unknown_extensions_scan_as_javascript() {
        let transpiler = Transpiler::new();
        let code = "function legacy() { return 7; }";

        let names = transpiler.top_level_functions(code, "legacy.es6").unwrap();
        assert_eq!(names, vec!["legacy".to_string()]);
        let names = transpiler.top_level_functions(code, "vendor/jquery").unwrap();
        assert_eq!(names, vec!["legacy".to_string()]);
    }

    #[test]
    fn test_is_typescript() {
        assert!(is_typescript(Path::new("src/app.ts")));
        assert!(is_typescript(Path::new("src/app.mts")));
        assert!(!is_typescript(Path::new("src/app.js")));
        assert!(!is_typescript(Path::new("Makefile")));
    }
}
