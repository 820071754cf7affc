//! Karmic - Karma-style script injection for a simulated browser document
//!
//! Karmic loads plain browser scripts into a Boa-backed document so tests can
//! call their functions from Rust:
//! - Expander: glob patterns to an ordered, deduplicated file list
//! - Injector: each file becomes a script element, evaluated in global scope
//! - Bridge: window functions copied into an explicit host scope
//! - Executor: ad hoc evaluation with an expression fallback
//!
//! ```no_run
//! use karmic::{HarnessConfig, setup};
//!
//! # async fn demo() -> karmic::InjectResult<()> {
//! let config = HarnessConfig::with_files(["src/**/*.js"]);
//! let (mut injector, report) = setup(&config).await?;
//! println!("{} scripts loaded", report.successful);
//! let sum = injector.execute_in_context("add(2, 3)")?;
//! assert_eq!(sum.as_number(), Some(5.0));
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod document;
pub mod executor;
pub mod expander;
pub mod injector;
pub mod transpiler;

// Re-export commonly used types
pub use bridge::{
    BridgeError, BridgeReport, CollisionPolicy, FunctionOrigin, GlobalFunctionTable, HostFunction,
    HostScope, bridge_globals,
};
pub use config::{DEFAULT_FILES, HarnessConfig, HarnessOverrides};
pub use document::{DocumentError, DocumentResult, Element, SimulatedDocument};
pub use executor::{EvaluationError, execute_in_context};
pub use expander::{ExpandError, ExpandOrder, Expansion, FilePatternExpander};
pub use injector::{
    FileInjection, InjectError, InjectResult, InjectorState, LoadOutcome, LoadStatus,
    LoadedScript, ScriptInjector, ScriptStatus, SetupReport, load_config, setup,
};
pub use transpiler::{TranspileError, TranspileResult, Transpiler};
