//! Ad hoc evaluation against the window's global scope
//!
//! Code is first evaluated directly. Some expressions are not valid as a
//! statement but are valid inside `return (...)`, the object literal
//! `{ a: 1, b: 2 }` being the usual example. When direct evaluation throws,
//! the code becomes the body of a function built with the `Function`
//! constructor whose parameters are every callable reachable from the window
//! and from the host scope, and that function is called with those values.

use crate::bridge::HostScope;
use crate::document::SimulatedDocument;
use boa_engine::{JsString, JsValue};
use oxc_syntax::identifier::is_identifier_name;
use oxc_syntax::keyword::is_reserved_keyword;
use std::collections::HashSet;
use thiserror::Error;

/// Both evaluation strategies failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("evaluation failed: {direct}; fallback failed: {fallback}")]
pub struct EvaluationError {
    pub direct: String,
    pub fallback: String,
}

/// Reserved words that are still plain identifiers in sloppy-mode function
/// code, which is what the `Function` constructor produces
const SLOPPY_IDENTIFIERS: &[&str] = &[
    "let", "static", "implements", "interface", "package", "private", "protected", "public",
    "await", "yield",
];

/// Whether `name` can be used as a function parameter
fn is_parameter_name(name: &str) -> bool {
    is_identifier_name(name) && (!is_reserved_keyword(name) || SLOPPY_IDENTIFIERS.contains(&name))
}

/// Evaluate `code` in the window's global scope, falling back to a function
/// whose parameters bind every discoverable global function.
pub fn execute_in_context(
    document: &mut SimulatedDocument,
    host: &HostScope,
    code: &str,
) -> Result<JsValue, EvaluationError> {
    let direct = match document.eval(code) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };
    tracing::debug!("direct evaluation failed, retrying as expression: {}", direct);

    match evaluate_as_expression(document, host, code) {
        Ok(value) => Ok(value),
        Err(fallback) => {
            let err = EvaluationError { direct, fallback };
            tracing::error!("context execution error: {}", err);
            Err(err)
        }
    }
}

fn evaluate_as_expression(
    document: &mut SimulatedDocument,
    host: &HostScope,
    code: &str,
) -> Result<JsValue, String> {
    let mut parameters: Vec<String> = Vec::new();
    let mut arguments: Vec<JsValue> = Vec::new();
    let mut captured: HashSet<String> = HashSet::new();

    for name in document.enumerable_globals().map_err(|e| e.to_string())? {
        if !is_parameter_name(&name) || captured.contains(&name) {
            continue;
        }
        // Accessors may throw; such properties are skipped
        let Ok(value) = document.global(&name) else {
            continue;
        };
        if value.as_callable().is_some() {
            captured.insert(name.clone());
            parameters.push(name);
            arguments.push(value);
        }
    }

    for (name, function) in host.iter() {
        if captured.contains(name) || !is_parameter_name(name) {
            continue;
        }
        captured.insert(name.clone());
        parameters.push(name.clone());
        arguments.push(JsValue::from(function.function().clone()));
    }

    let constructor = document.global("Function").map_err(|e| e.to_string())?;
    let constructor = constructor
        .as_callable()
        .map(|f| f.clone())
        .ok_or_else(|| "Function constructor is not callable".to_string())?;

    let mut source: Vec<JsValue> = parameters
        .iter()
        .map(|name| JsValue::from(JsString::from(name.as_str())))
        .collect();
    // The newline keeps a trailing line comment from swallowing the paren
    source.push(JsValue::from(JsString::from(
        format!("return ({}\n);", code).as_str(),
    )));

    let context = document.context_mut();
    let function = constructor
        .call(&JsValue::undefined(), &source, context)
        .map_err(|e| e.to_string())?;
    let function = function
        .as_callable()
        .map(|f| f.clone())
        .ok_or_else(|| "Function constructor returned a non-callable".to_string())?;
    let result = function
        .call(&JsValue::undefined(), &arguments, context)
        .map_err(|e| e.to_string());
    document.drain_jobs();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{CollisionPolicy, bridge_globals};
    use boa_engine::{NativeFunction, js_string};

    #[test]
    fn test_direct_evaluation() {
        let mut document = SimulatedDocument::new().unwrap();
        document.eval("function add(a, b) { return a + b; }").unwrap();

        let value = execute_in_context(&mut document, &HostScope::new(), "add(2, 3)").unwrap();
        assert_eq!(value.as_number(), Some(5.0));
    }

    #[test]
    fn test_object_literal_falls_back_to_expression() {
        let mut document = SimulatedDocument::new().unwrap();
        let value =
            execute_in_context(&mut document, &HostScope::new(), "{ a: 1, b: 'two' }").unwrap();

        let object = value.as_object().map(|o| o.clone()).unwrap();
        let a = object.get(js_string!("a"), document.context_mut()).unwrap();
        let b = object.get(js_string!("b"), document.context_mut()).unwrap();
        assert_eq!(a.as_number(), Some(1.0));
        assert_eq!(document.display(&b), "two");
    }

    #[test]
    fn test_fallback_sees_window_functions() {
        let mut document = SimulatedDocument::new().unwrap();
        document
            .eval("function label(n) { return 'item-' + n; }")
            .unwrap();

        let value =
            execute_in_context(&mut document, &HostScope::new(), "{ name: label(7), n: 7 }")
                .unwrap();
        let object = value.as_object().map(|o| o.clone()).unwrap();
        let name = object.get(js_string!("name"), document.context_mut()).unwrap();
        assert_eq!(document.display(&name), "item-7");
    }

    #[test]
    fn test_fallback_sees_host_functions() {
        let mut document = SimulatedDocument::new().unwrap();
        let mut host = HostScope::new();
        host.define_native(
            "hostTriple",
            NativeFunction::from_fn_ptr(|_this, args, context| {
                let n = args
                    .first()
                    .cloned()
                    .unwrap_or_default()
                    .to_number(context)?;
                Ok(JsValue::from(n * 3.0))
            }),
            &mut document,
        );

        // Not reachable by direct evaluation, only through the fallback parameters
        let value = execute_in_context(&mut document, &host, "{ v: hostTriple(4), w: 0 }").unwrap();
        let object = value.as_object().map(|o| o.clone()).unwrap();
        let v = object.get(js_string!("v"), document.context_mut()).unwrap();
        assert_eq!(v.as_number(), Some(12.0));
    }

    #[test]
    fn test_matches_bridged_call() {
        let mut document = SimulatedDocument::new().unwrap();
        document
            .eval("function scale(x, factor) { return x * factor + 1; }")
            .unwrap();
        let mut host = HostScope::new();
        bridge_globals(&mut document, &mut host, CollisionPolicy::default()).unwrap();

        let evaluated = execute_in_context(&mut document, &host, "scale(6, 7)").unwrap();
        let called = host
            .call("scale", &[JsValue::from(6), JsValue::from(7)], &mut document)
            .unwrap();
        assert_eq!(evaluated.as_number(), called.as_number());
    }

    #[test]
    fn test_trailing_line_comment() {
        let mut document = SimulatedDocument::new().unwrap();
        let value =
            execute_in_context(&mut document, &HostScope::new(), "{ a: 1, b: 2 } // note").unwrap();
        assert!(value.is_object());
    }

    #[test]
    fn test_both_strategies_fail() {
        let mut document = SimulatedDocument::new().unwrap();
        let err = execute_in_context(&mut document, &HostScope::new(), "undefinedFunction()")
            .unwrap_err();
        assert!(err.direct.contains("undefinedFunction"));
        assert!(err.fallback.contains("undefinedFunction"));
    }

    #[test]
    fn test_parameter_names() {
        assert!(is_parameter_name("formatCurrency"));
        assert!(is_parameter_name("$http"));
        assert!(is_parameter_name("_private"));
        assert!(!is_parameter_name("my-fn"));
        assert!(!is_parameter_name("2fast"));
        assert!(!is_parameter_name("delete"));
        assert!(!is_parameter_name("enum"));
        assert!(!is_parameter_name(""));
        assert!(is_parameter_name("public"));
        assert!(is_parameter_name("let"));
        assert!(is_parameter_name("café"));
    }

    #[test]
    fn test_fallback_keeps_strict_only_reserved_names() {
        let mut document = SimulatedDocument::new().unwrap();
        document
            .eval("var public = function () { return 'visible'; };")
            .unwrap();

        let value =
            execute_in_context(&mut document, &HostScope::new(), "{ v: public(), w: 1 }").unwrap();
        let object = value.as_object().map(|o| o.clone()).unwrap();
        let v = object.get(js_string!("v"), document.context_mut()).unwrap();
        assert_eq!(document.display(&v), "visible");
    }

    #[test]
    fn test_throwing_getter_is_skipped_by_fallback() {
        let mut document = SimulatedDocument::new().unwrap();
        document
            .eval(
                r#"
                Object.defineProperty(globalThis, 'explosive', {
                    get() { throw new Error('do not touch'); },
                    enumerable: true,
                    configurable: true,
                });
                function label(n) { return 'item-' + n; }
                "#,
            )
            .unwrap();

        let value =
            execute_in_context(&mut document, &HostScope::new(), "{ name: label(1), n: 1 }")
                .unwrap();
        let object = value.as_object().map(|o| o.clone()).unwrap();
        let name = object.get(js_string!("name"), document.context_mut()).unwrap();
        assert_eq!(document.display(&name), "item-1");
    }
}
