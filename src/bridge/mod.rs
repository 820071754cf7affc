//! Global function discovery and bridging
//!
//! A browser test runner exposes every function a loaded script defines as an
//! ambient global. Here the window's functions are copied into a [`HostScope`],
//! an explicit registry handed to whatever needs to call them, instead of
//! being written onto a process-wide global object.

use crate::document::{DocumentResult, SimulatedDocument};
use boa_engine::{Context, JsObject, JsResult, JsValue, NativeFunction};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Browser dialog and window-control functions left out of the window
/// function listing
pub const WINDOW_CONTROL_FUNCTIONS: &[&str] = &[
    "alert", "confirm", "prompt", "open", "close", "stop", "focus", "blur",
];

/// Errors raised when calling through the host scope
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("no function named '{0}' in the host scope")]
    UnknownFunction(String),

    #[error("{name}() threw: {message}")]
    Call { name: String, message: String },
}

/// Whether a window property name takes part in the global function table
fn is_public_name(name: &str) -> bool {
    !name.starts_with('_') && name != "constructor"
}

/// The callable bindings discoverable on the window at query time.
/// Never cached: build a new table whenever the window may have changed.
#[derive(Debug, Clone, Default)]
pub struct GlobalFunctionTable {
    functions: BTreeMap<String, JsObject>,
}

impl GlobalFunctionTable {
    /// Enumerate the window's enumerable, callable, public properties
    pub fn collect(document: &mut SimulatedDocument) -> DocumentResult<Self> {
        let mut functions = BTreeMap::new();

        for name in document.enumerable_globals()? {
            if !is_public_name(&name) {
                continue;
            }
            let value = match document.global(&name) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(name = %name, "skipping unreadable global: {}", e);
                    continue;
                }
            };
            if let Some(function) = value.as_callable().map(|f| f.clone()) {
                functions.insert(name, function);
            }
        }

        Ok(Self { functions })
    }

    /// Drop the browser window-control functions
    pub fn without_window_controls(mut self) -> Self {
        self.functions
            .retain(|name, _| !WINDOW_CONTROL_FUNCTIONS.contains(&name.as_str()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&JsObject> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Function names in ascending order
    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsObject)> {
        self.functions.iter()
    }
}

/// Where a host-scope function came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionOrigin {
    /// Copied from the window by [`bridge_globals`]
    Bridged,
    /// Registered from Rust
    Native,
}

/// A callable together with the `this` value it is invoked with
#[derive(Debug, Clone)]
pub struct HostFunction {
    function: JsObject,
    receiver: JsValue,
    origin: FunctionOrigin,
}

impl HostFunction {
    pub fn new(function: JsObject, receiver: JsValue, origin: FunctionOrigin) -> Self {
        Self {
            function,
            receiver,
            origin,
        }
    }

    pub fn function(&self) -> &JsObject {
        &self.function
    }

    pub fn origin(&self) -> FunctionOrigin {
        self.origin
    }

    /// Invoke with the bound receiver
    pub fn call(&self, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        self.function.call(&self.receiver, args, context)
    }
}

/// Registry of functions callable without a window lookup.
///
/// Stands in for the host process's global object: the bridge writes into it,
/// the context executor reads from it.
#[derive(Debug, Clone, Default)]
pub struct HostScope {
    entries: BTreeMap<String, HostFunction>,
}

impl HostScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a function, returning the one it replaced
    pub fn insert(&mut self, name: impl Into<String>, function: HostFunction) -> Option<HostFunction> {
        self.entries.insert(name.into(), function)
    }

    /// Register a Rust function under `name`
    pub fn define_native(
        &mut self,
        name: impl Into<String>,
        function: NativeFunction,
        document: &mut SimulatedDocument,
    ) -> Option<HostFunction> {
        let realm = document.context_mut().realm().clone();
        let object = JsObject::from(function.to_js_function(&realm));
        self.insert(
            name,
            HostFunction::new(object, JsValue::undefined(), FunctionOrigin::Native),
        )
    }

    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<HostFunction> {
        self.entries.remove(name)
    }

    /// Names in ascending order
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostFunction)> {
        self.entries.iter()
    }

    /// Call a function by name, as test code would call a bare global
    pub fn call(
        &self,
        name: &str,
        args: &[JsValue],
        document: &mut SimulatedDocument,
    ) -> Result<JsValue, BridgeError> {
        let function = self
            .get(name)
            .ok_or_else(|| BridgeError::UnknownFunction(name.to_string()))?;
        function
            .call(args, document.context_mut())
            .map_err(|e| BridgeError::Call {
                name: name.to_string(),
                message: e.to_string(),
            })
    }
}

/// What the bridge does with a name the host scope already holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Replace the existing entry; the latest bridge wins
    #[default]
    Overwrite,
    /// Leave the existing entry in place
    KeepExisting,
}

/// Outcome of one bridge run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeReport {
    /// Every name now bound to the window's function
    pub bridged: Vec<String>,
    /// Names whose previous, different host entry was replaced
    pub overwritten: Vec<String>,
    /// Names left untouched because of [`CollisionPolicy::KeepExisting`]
    pub kept: Vec<String>,
}

/// Copy every function of the global function table into `host`, bound to
/// the window as receiver.
pub fn bridge_globals(
    document: &mut SimulatedDocument,
    host: &mut HostScope,
    policy: CollisionPolicy,
) -> DocumentResult<BridgeReport> {
    let table = GlobalFunctionTable::collect(document)?;
    let window = JsValue::from(document.window());
    let mut report = BridgeReport::default();

    for (name, function) in table.iter() {
        if let Some(existing) = host.get(name) {
            if !JsObject::equals(existing.function(), function) {
                match policy {
                    CollisionPolicy::Overwrite => {
                        tracing::warn!(name = %name, "host scope entry overwritten by bridge");
                        report.overwritten.push(name.clone());
                    }
                    CollisionPolicy::KeepExisting => {
                        tracing::warn!(name = %name, "host scope entry kept, window function not bridged");
                        report.kept.push(name.clone());
                        continue;
                    }
                }
            }
        }

        host.insert(
            name.clone(),
            HostFunction::new(function.clone(), window.clone(), FunctionOrigin::Bridged),
        );
        report.bridged.push(name.clone());
    }

    tracing::info!(
        bridged = report.bridged.len(),
        overwritten = report.overwritten.len(),
        "bridged window functions into host scope"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document_with(code: &str) -> SimulatedDocument {
        let mut document = SimulatedDocument::new().unwrap();
        document.eval(code).unwrap();
        document
    }

    #[test]
    fn test_table_filters_private_and_non_callable() {
        let mut document = document_with(
            r#"
            function add(a, b) { return a + b; }
            function _internal() {}
            var constructor = function () {};
            var answer = 42;
            window.assigned = function () { return 'assigned'; };
            "#,
        );

        let table = GlobalFunctionTable::collect(&mut document).unwrap();
        assert!(table.contains("add"));
        assert!(table.contains("assigned"));
        assert!(!table.contains("_internal"));
        assert!(!table.contains("constructor"));
        assert!(!table.contains("answer"));
    }

    #[test]
    fn test_table_skips_throwing_getters() {
        let mut document = document_with(
            r#"
            Object.defineProperty(globalThis, 'explosive', {
                get() { throw new Error('do not touch'); },
                enumerable: true,
                configurable: true,
            });
            function survivor() { return 1; }
            "#,
        );

        let table = GlobalFunctionTable::collect(&mut document).unwrap();
        assert!(!table.contains("explosive"));
        assert!(table.contains("survivor"));
    }

    #[test]
    fn test_table_is_recomputed() {
        let mut document = SimulatedDocument::new().unwrap();
        let before = GlobalFunctionTable::collect(&mut document).unwrap();
        assert!(!before.contains("later"));

        document.eval("function later() {}").unwrap();
        let after = GlobalFunctionTable::collect(&mut document).unwrap();
        assert!(after.contains("later"));
    }

    #[test]
    fn test_window_controls_removed() {
        let mut document = document_with("function alert() {} function keep() {}");
        let table = GlobalFunctionTable::collect(&mut document)
            .unwrap()
            .without_window_controls();
        assert!(!table.contains("alert"));
        assert!(table.contains("keep"));
    }

    #[test]
    fn test_bridged_function_matches_window_call() {
        let mut document = document_with(
            r#"
            var base = 100;
            function offset(x) { return this.base + x; }
            "#,
        );
        let mut host = HostScope::new();
        let report = bridge_globals(&mut document, &mut host, CollisionPolicy::default()).unwrap();
        assert!(report.bridged.contains(&"offset".to_string()));

        let via_host = host
            .call("offset", &[JsValue::from(5)], &mut document)
            .unwrap();
        let via_window = document.eval("window.offset(5)").unwrap();
        assert_eq!(via_host.as_number(), Some(105.0));
        assert_eq!(via_host.as_number(), via_window.as_number());
        assert_eq!(host.get("offset").unwrap().origin(), FunctionOrigin::Bridged);
    }

    #[test]
    fn test_rebridging_same_function_is_not_a_collision() {
        let mut document = document_with("function stable() {}");
        let mut host = HostScope::new();
        bridge_globals(&mut document, &mut host, CollisionPolicy::Overwrite).unwrap();
        let report = bridge_globals(&mut document, &mut host, CollisionPolicy::Overwrite).unwrap();
        assert!(report.overwritten.is_empty());
    }

    #[test]
    fn test_collision_overwrite_reported() {
        let mut document = document_with("function greet() { return 'first'; }");
        let mut host = HostScope::new();
        bridge_globals(&mut document, &mut host, CollisionPolicy::Overwrite).unwrap();

        document.eval("window.greet = function () { return 'second'; };").unwrap();
        let report = bridge_globals(&mut document, &mut host, CollisionPolicy::Overwrite).unwrap();
        assert_eq!(report.overwritten, vec!["greet".to_string()]);

        let value = host.call("greet", &[], &mut document).unwrap();
        assert_eq!(document.display(&value), "second");
    }

    #[test]
    fn test_collision_keep_existing() {
        let mut document = document_with("function greet() { return 'window'; }");
        let mut host = HostScope::new();
        host.define_native(
            "greet",
            NativeFunction::from_fn_ptr(|_this, _args, _context| {
                Ok(JsValue::from(boa_engine::js_string!("native")))
            }),
            &mut document,
        );

        let report =
            bridge_globals(&mut document, &mut host, CollisionPolicy::KeepExisting).unwrap();
        assert_eq!(report.kept, vec!["greet".to_string()]);
        assert!(!report.bridged.contains(&"greet".to_string()));

        let value = host.call("greet", &[], &mut document).unwrap();
        assert_eq!(document.display(&value), "native");
        assert_eq!(host.get("greet").unwrap().origin(), FunctionOrigin::Native);
    }

    #[test]
    fn test_unknown_function() {
        let mut document = SimulatedDocument::new().unwrap();
        let host = HostScope::new();
        assert!(matches!(
            host.call("missing", &[], &mut document),
            Err(BridgeError::UnknownFunction(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_throwing_function_reports_call_error() {
        let mut document = document_with("function fails() { throw new Error('nope'); }");
        let mut host = HostScope::new();
        bridge_globals(&mut document, &mut host, CollisionPolicy::default()).unwrap();

        let err = host.call("fails", &[], &mut document).unwrap_err();
        assert!(matches!(err, BridgeError::Call { ref name, .. } if name == "fails"));
    }
}
