//! Simulated browser document powered by the Boa engine
//!
//! The document is the host that injected scripts run in. The Boa global
//! object plays the role of `window`; a script element appended to the head
//! is evaluated synchronously in that global scope, the way inline scripts
//! behave in a browser.
//!
//! Provided to scripts:
//! - Console API, routed to `tracing` under the `karmic::console` target
//! - Timers (setTimeout, setInterval, clearTimeout, clearInterval)
//! - URL API, TextEncoder/TextDecoder, structuredClone, queueMicrotask
//! - `window`, `self`, `document.readyState`, `document.location` and
//!   `navigator.userAgent`

use boa_engine::{Context, JsObject, JsResult, JsString, JsValue, Source};
use boa_gc::{Finalize, Trace};
use boa_runtime::{
    ConsoleState, Logger,
    extensions::{
        ConsoleExtension, EncodingExtension, MicrotaskExtension, StructuredCloneExtension,
        TimeoutExtension, UrlExtension,
    },
    register_extensions,
};
use std::path::Path;
use thiserror::Error;

/// Default document URL, matching what the browser harness used
pub const DEFAULT_URL: &str = "http://localhost";

/// Errors raised by the simulated document
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("document has been disposed")]
    Disposed,

    #[error("script {label} threw: {message}")]
    Script { label: String, message: String },

    #[error("JavaScript engine error: {0}")]
    Engine(String),
}

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Console logger that forwards script output to `tracing`
#[derive(Debug, Clone, Default, Trace, Finalize)]
pub struct HarnessLogger;

impl Logger for HarnessLogger {
    fn log(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::info!(target: "karmic::console", "{}", msg);
        Ok(())
    }

    fn info(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::info!(target: "karmic::console", "{}", msg);
        Ok(())
    }

    fn warn(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::warn!(target: "karmic::console", "{}", msg);
        Ok(())
    }

    fn error(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::error!(target: "karmic::console", "{}", msg);
        Ok(())
    }
}

/// Script types that a browser executes
const EXECUTABLE_SCRIPT_TYPES: &[&str] = &[
    "",
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
    "text/ecmascript",
];

/// A detached or appended element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag_name: String,
    script_type: String,
    text_content: String,
    label: Option<String>,
}

impl Element {
    fn new(tag_name: &str) -> Self {
        Self {
            tag_name: tag_name.to_ascii_lowercase(),
            script_type: String::new(),
            text_content: String::new(),
            label: None,
        }
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn text_content(&self) -> &str {
        &self.text_content
    }

    pub fn set_text_content(&mut self, text: impl Into<String>) {
        self.text_content = text.into();
    }

    /// The `type` attribute of a script element
    pub fn script_type(&self) -> &str {
        &self.script_type
    }

    pub fn set_script_type(&mut self, script_type: impl Into<String>) {
        self.script_type = script_type.into();
    }

    /// Name used in diagnostics and error messages for this script
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("inline-script")
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    /// Whether appending this element evaluates its text
    pub fn is_executable_script(&self) -> bool {
        self.tag_name == "script"
            && EXECUTABLE_SCRIPT_TYPES.contains(&self.script_type.trim().to_ascii_lowercase().as_str())
    }
}

/// An in-process emulation of a browser document
pub struct SimulatedDocument {
    context: Context,
    head: Vec<Element>,
    url: String,
    disposed: bool,
}

impl SimulatedDocument {
    /// Create a document at the default URL
    pub fn new() -> DocumentResult<Self> {
        Self::with_url(DEFAULT_URL)
    }

    /// Create a document reporting `url` as its location
    pub fn with_url(url: impl Into<String>) -> DocumentResult<Self> {
        let url = url.into();
        let mut context = Context::default();

        register_extensions(
            (
                ConsoleExtension(HarnessLogger),
                TimeoutExtension,
                UrlExtension,
                EncodingExtension,
                StructuredCloneExtension,
                MicrotaskExtension,
            ),
            None,
            &mut context,
        )
        .map_err(|e| DocumentError::Engine(e.to_string()))?;

        Self::install_window_shim(&mut context, &url)?;

        Ok(Self {
            context,
            head: Vec::new(),
            url,
            disposed: false,
        })
    }

    /// Browser-shaped globals. They are defined non-enumerable so they never
    /// show up in the global function table.
    fn install_window_shim(context: &mut Context, url: &str) -> DocumentResult<()> {
        let url_literal =
            serde_json::to_string(url).map_err(|e| DocumentError::Engine(e.to_string()))?;
        let shim = format!(
            r#"
            (function (href) {{
                const define = (name, value) => Object.defineProperty(globalThis, name, {{
                    value: value,
                    writable: true,
                    configurable: true,
                    enumerable: false,
                }});
                define('window', globalThis);
                define('self', globalThis);
                define('navigator', {{ userAgent: 'karmic/{version}' }});
                define('document', {{
                    readyState: 'complete',
                    location: {{ href: href }},
                    URL: href,
                }});
                define('location', globalThis.document.location);
            }})({url_literal});
            "#,
            version = env!("CARGO_PKG_VERSION"),
        );

        context
            .eval(Source::from_bytes(shim.as_bytes()))
            .map_err(|e| DocumentError::Engine(e.to_string()))?;
        Ok(())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Create a detached element, like `document.createElement`
    pub fn create_element(&self, tag_name: &str) -> DocumentResult<Element> {
        if self.disposed {
            return Err(DocumentError::Disposed);
        }
        Ok(Element::new(tag_name))
    }

    /// Append an element to the head.
    ///
    /// Executable inline scripts are evaluated before this returns. The
    /// element stays in the head even when its script throws, as in a
    /// browser; the error is returned to the caller.
    pub fn append_child(&mut self, element: Element) -> DocumentResult<()> {
        if self.disposed {
            return Err(DocumentError::Disposed);
        }

        let runs = element.is_executable_script() && !element.text_content.trim().is_empty();
        let label = element.label().to_string();
        let code = if runs {
            Some(element.text_content.clone())
        } else {
            None
        };
        self.head.push(element);

        if let Some(code) = code {
            tracing::debug!(script = %label, "evaluating inline script");
            let source = Source::from_bytes(code.as_bytes()).with_path(Path::new(&label));
            let result = self.context.eval(source);
            self.drain_jobs();
            result.map_err(|e| DocumentError::Script {
                label,
                message: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Elements appended to the head, in append order
    pub fn head(&self) -> &[Element] {
        &self.head
    }

    /// Tear the document down. Later appends and evaluations fail.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.head.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// The global object scripts see as `window`
    pub fn window(&self) -> JsObject {
        self.context.global_object()
    }

    /// Evaluate code in the window's global scope, like `window.eval`
    pub fn eval(&mut self, code: &str) -> DocumentResult<JsValue> {
        if self.disposed {
            return Err(DocumentError::Disposed);
        }
        let result = self.context.eval(Source::from_bytes(code.as_bytes()));
        self.drain_jobs();
        result.map_err(|e| DocumentError::Engine(e.to_string()))
    }

    /// Run pending promise jobs and microtasks
    pub(crate) fn drain_jobs(&mut self) {
        if let Err(e) = self.context.run_jobs() {
            tracing::warn!("pending job failed: {}", e);
        }
    }

    /// Names of the window's enumerable properties, own and inherited,
    /// in `for..in` order
    pub fn enumerable_globals(&mut self) -> DocumentResult<Vec<String>> {
        let listing = self.eval(
            r#"(function () {
                const names = [];
                for (const name in globalThis) { names.push(name); }
                return JSON.stringify(names);
            })()"#,
        )?;
        let json = self.display(&listing);
        serde_json::from_str(&json).map_err(|e| DocumentError::Engine(e.to_string()))
    }

    /// Read a window property
    pub fn global(&mut self, name: &str) -> JsResult<JsValue> {
        let window = self.window();
        window.get(JsString::from(name), &mut self.context)
    }

    /// Write a window property
    pub fn set_global(&mut self, name: &str, value: JsValue) -> DocumentResult<()> {
        let window = self.window();
        window
            .set(JsString::from(name), value, true, &mut self.context)
            .map_err(|e| DocumentError::Engine(e.to_string()))?;
        Ok(())
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Convert a JsValue to a displayable string
    pub fn display(&mut self, value: &JsValue) -> String {
        value
            .to_string(&mut self.context)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|_| "[error converting value]".to_string())
    }
}
