//! Karma-style script injection
//!
//! [`ScriptInjector`] loads scripts into a [`SimulatedDocument`] the way a
//! browser test runner does: every file becomes a script element appended to
//! the head, evaluated in the window's global scope, in a fixed order. After a
//! batch the window's functions can be bridged into the [`HostScope`] so test
//! code calls them without a window lookup.
//!
//! Lifecycle: `Ready` after construction, `Bridged` once the bridge has run.
//! Neither state is terminal; injecting and bridging again is allowed.

use crate::bridge::{
    BridgeError, BridgeReport, CollisionPolicy, GlobalFunctionTable, HostFunction, HostScope,
    bridge_globals,
};
use crate::config::HarnessConfig;
use crate::document::{DocumentError, SimulatedDocument};
use crate::executor::{EvaluationError, execute_in_context};
use crate::expander::{ExpandError, FilePatternExpander, path_key};
use crate::transpiler::{TranspileError, Transpiler, is_typescript};
use boa_engine::{JsValue, NativeFunction};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while injecting or evaluating scripts
#[derive(Error, Debug)]
pub enum InjectError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to inject script {label}: {message}")]
    Injection { label: String, message: String },

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Transpile(#[from] TranspileError),

    #[error(transparent)]
    Expand(#[from] ExpandError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for injector operations
pub type InjectResult<T> = Result<T, InjectError>;

/// State of one injection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    Pending,
    Success,
    Error,
}

/// One injection attempt, in attempt order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedScript {
    /// Absolute path for files, the caller's label for inline content
    pub id: String,
    pub status: ScriptStatus,
    pub error: Option<String>,
}

/// Result of [`ScriptInjector::inject_file`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileInjection {
    /// The file was read and evaluated; carries the path as given
    Injected(String),
    /// The file had already been injected by this injector; nothing was done
    AlreadyLoaded,
}

/// Per-file status in a batch load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Success,
    Error,
    /// The pattern itself could not be parsed
    PatternError,
}

/// Outcome of one file (or one unparseable pattern) in a batch load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub file: String,
    pub status: LoadStatus,
    pub error: Option<String>,
}

impl LoadOutcome {
    pub fn is_success(&self) -> bool {
        self.status == LoadStatus::Success
    }
}

/// Injector lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorState {
    Ready,
    Bridged,
}

/// Summary of [`ScriptInjector::setup_environment`]
#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    pub results: Vec<LoadOutcome>,
    pub successful: usize,
    pub failed: usize,
    /// Global function names after the batch
    pub globals: Vec<String>,
    pub loaded_scripts: Vec<String>,
    pub bridge: Option<BridgeReport>,
}

/// Loads scripts into a simulated document and tracks what was loaded
pub struct ScriptInjector {
    document: SimulatedDocument,
    host: HostScope,
    records: Vec<LoadedScript>,
    expander: FilePatternExpander,
    transpiler: Transpiler,
    collision_policy: CollisionPolicy,
    state: InjectorState,
}

impl ScriptInjector {
    /// Wrap an existing document; paths resolve against the current directory
    pub fn new(document: SimulatedDocument) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            document,
            host: HostScope::new(),
            records: Vec::new(),
            expander: FilePatternExpander::new(base_dir),
            transpiler: Transpiler::new(),
            collision_policy: CollisionPolicy::default(),
            state: InjectorState::Ready,
        }
    }

    /// Build a fresh document and injector from a harness config
    pub fn from_config(config: &HarnessConfig) -> InjectResult<Self> {
        let document = SimulatedDocument::with_url(config.url.clone())?;
        let expander = FilePatternExpander::new(config.base_dir.clone())
            .with_excludes(&config.exclude)?
            .with_order(config.order);

        Ok(Self {
            expander,
            collision_policy: config.on_collision,
            ..Self::new(document)
        })
    }

    /// Resolve relative paths and patterns against `base_dir`, with a fresh
    /// expander using the default excludes
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        self.expander = FilePatternExpander::new(base_dir);
        self
    }

    pub fn base_dir(&self) -> &Path {
        self.expander.base_dir()
    }

    pub fn state(&self) -> InjectorState {
        self.state
    }

    pub fn document(&self) -> &SimulatedDocument {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut SimulatedDocument {
        &mut self.document
    }

    pub fn host(&self) -> &HostScope {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut HostScope {
        &mut self.host
    }

    /// Register a Rust function in the host scope
    pub fn define_native(
        &mut self,
        name: impl Into<String>,
        function: NativeFunction,
    ) -> Option<HostFunction> {
        self.host.define_native(name, function, &mut self.document)
    }

    pub fn expander(&self) -> &FilePatternExpander {
        &self.expander
    }

    /// Every injection attempt so far
    pub fn records(&self) -> &[LoadedScript] {
        &self.records
    }

    /// Ids of the scripts that were injected successfully
    pub fn loaded_scripts(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.status == ScriptStatus::Success)
            .map(|r| r.id.clone())
            .collect()
    }

    fn is_loaded(&self, id: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.id == id && r.status == ScriptStatus::Success)
    }

    fn begin_record(&mut self, id: String) -> usize {
        self.records.push(LoadedScript {
            id,
            status: ScriptStatus::Pending,
            error: None,
        });
        self.records.len() - 1
    }

    fn finish_record<T>(&mut self, index: usize, result: &InjectResult<T>) {
        let record = &mut self.records[index];
        match result {
            Ok(_) => record.status = ScriptStatus::Success,
            Err(e) => {
                record.status = ScriptStatus::Error;
                record.error = Some(e.to_string());
            }
        }
    }

    /// Create a script element for `code` and append it to the head
    fn append_script(&mut self, code: &str, label: &str) -> InjectResult<()> {
        let injection_error = |e: DocumentError| InjectError::Injection {
            label: label.to_string(),
            message: match e {
                DocumentError::Script { message, .. } => message,
                other => other.to_string(),
            },
        };

        let mut element = self
            .document
            .create_element("script")
            .map_err(injection_error)?;
        element.set_script_type("text/javascript");
        element.set_text_content(code);
        element.set_label(label);
        self.document.append_child(element).map_err(injection_error)
    }

    /// Inject raw code as an inline script. Resolves with `label`.
    pub async fn inject_content(&mut self, code: &str, label: &str) -> InjectResult<String> {
        let index = self.begin_record(label.to_string());
        let result = self.append_script(code, label).map(|()| label.to_string());
        self.finish_record(index, &result);

        match &result {
            Ok(_) => tracing::debug!(script = label, "injected inline script"),
            Err(e) => tracing::error!(script = label, "{}", e),
        }
        result
    }

    /// Absolute form of `path`, resolving symlinks in whatever part exists
    fn resolve(&self, path: &Path) -> PathBuf {
        let joined = self.base_dir().join(path);
        let absolute = std::path::absolute(&joined).unwrap_or(joined);
        if let Ok(canonical) = absolute.canonicalize() {
            return canonical;
        }
        let parent = absolute.parent().and_then(|dir| dir.canonicalize().ok());
        match (parent, absolute.file_name()) {
            (Some(dir), Some(name)) => dir.join(name),
            _ => absolute,
        }
    }

    /// Read a script file, isolate it in a closure and inject it.
    ///
    /// A file is injected at most once per injector: asking again for a path
    /// that already loaded returns [`FileInjection::AlreadyLoaded`] without
    /// touching the file.
    pub async fn inject_file(&mut self, path: impl AsRef<Path>) -> InjectResult<FileInjection> {
        let path = path.as_ref();
        let label = path_key(path);
        let resolved = self.resolve(path);
        let id = path_key(&resolved);

        if self.is_loaded(&id) {
            tracing::debug!(script = %label, "script already loaded");
            return Ok(FileInjection::AlreadyLoaded);
        }

        let index = self.begin_record(id);
        let result = self.load_file(&resolved, &label).await;
        self.finish_record(index, &result);

        match result {
            Ok(()) => {
                tracing::debug!(script = %label, "injected script file");
                Ok(FileInjection::Injected(label))
            }
            Err(e) => {
                tracing::error!(script = %label, "failed to load script file: {}", e);
                Err(e)
            }
        }
    }

    async fn load_file(&mut self, resolved: &Path, label: &str) -> InjectResult<()> {
        if !resolved.exists() {
            return Err(InjectError::FileNotFound(resolved.to_path_buf()));
        }

        let source = tokio::fs::read_to_string(resolved)
            .await
            .map_err(|source| InjectError::Read {
                path: resolved.to_path_buf(),
                source,
            })?;

        let source = if is_typescript(resolved) {
            self.transpiler.transpile(&source, label)?
        } else {
            source
        };

        let wrapped = self.isolate(&source, label);
        self.append_script(&wrapped, label)
    }

    /// Wrap a file in a closure so its variables stay local, re-exporting its
    /// top-level function declarations onto the window
    fn isolate(&self, source: &str, label: &str) -> String {
        let functions = match self.transpiler.top_level_functions(source, label) {
            Ok(functions) => functions,
            Err(e) => {
                // Evaluation reports the same syntax error with better context
                tracing::debug!(script = label, "could not scan declarations: {}", e);
                Vec::new()
            }
        };

        let exports: String = functions
            .iter()
            .map(|name| format!("globalThis.{name} = {name};\n"))
            .collect();

        format!(
            "(function () {{\n// File: {label}\n{source}\n;{exports}}}).call(this);\n"
        )
    }

    /// Expand patterns and inject every file in order, one at a time.
    ///
    /// A failing file is recorded and the batch continues; this never fails
    /// as a whole. Outcomes for unparseable patterns come first, in pattern
    /// order, followed by one outcome per file in load order. Files are not
    /// tied to a single pattern once sorted and deduplicated, so pattern
    /// errors are not interleaved with them.
    pub async fn load_all<S: AsRef<str>>(&mut self, patterns: &[S]) -> Vec<LoadOutcome> {
        let expansion = self.expander.expand_with_report(patterns);
        let mut outcomes = Vec::with_capacity(expansion.files.len() + expansion.invalid.len());

        for invalid in expansion.invalid {
            let ExpandError::InvalidPattern { ref pattern, .. } = invalid;
            outcomes.push(LoadOutcome {
                file: pattern.clone(),
                status: LoadStatus::PatternError,
                error: Some(invalid.to_string()),
            });
        }

        tracing::info!(files = expansion.files.len(), "loading scripts");
        for file in expansion.files {
            let name = path_key(&file);
            match self.inject_file(&file).await {
                Ok(_) => outcomes.push(LoadOutcome {
                    file: name,
                    status: LoadStatus::Success,
                    error: None,
                }),
                Err(e) => {
                    tracing::warn!(file = %name, "failed to load: {}", e);
                    outcomes.push(LoadOutcome {
                        file: name,
                        status: LoadStatus::Error,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        outcomes
    }

    /// Copy the window's functions into the host scope
    pub fn bridge(&mut self) -> InjectResult<BridgeReport> {
        let report = bridge_globals(&mut self.document, &mut self.host, self.collision_policy)?;
        self.state = InjectorState::Bridged;
        Ok(report)
    }

    /// Evaluate code against the window, with the host scope available to
    /// the fallback strategy
    pub fn execute_in_context(&mut self, code: &str) -> InjectResult<JsValue> {
        Ok(execute_in_context(&mut self.document, &self.host, code)?)
    }

    /// Call a bridged or native host function by name
    pub fn call(&mut self, name: &str, args: &[JsValue]) -> InjectResult<JsValue> {
        Ok(self.host.call(name, args, &mut self.document)?)
    }

    /// The window's public callable globals, recomputed on every call
    pub fn global_functions(&mut self) -> InjectResult<GlobalFunctionTable> {
        Ok(GlobalFunctionTable::collect(&mut self.document)?)
    }

    /// [`Self::global_functions`] without the browser window-control functions
    pub fn window_functions(&mut self) -> InjectResult<GlobalFunctionTable> {
        Ok(self.global_functions()?.without_window_controls())
    }

    /// Whether the window holds a callable under `name`
    pub fn is_globally_available(&mut self, name: &str) -> bool {
        self.document
            .global(name)
            .map(|value| value.is_callable())
            .unwrap_or(false)
    }

    /// Load `config.files`, then bridge when `config.bridge` is set
    pub async fn setup_environment(&mut self, config: &HarnessConfig) -> InjectResult<SetupReport> {
        tracing::info!(patterns = ?config.files, "setting up script environment");

        let results = self.load_all(&config.files).await;
        let successful = results.iter().filter(|r| r.is_success()).count();
        let failed = results
            .iter()
            .filter(|r| r.status == LoadStatus::Error)
            .count();

        tracing::info!(successful, "loaded files");
        if failed > 0 {
            tracing::warn!(failed, "some files failed to load");
        }

        let bridge = if config.bridge {
            self.collision_policy = config.on_collision;
            Some(self.bridge()?)
        } else {
            None
        };

        let globals = self.global_functions()?.names();
        tracing::info!(count = globals.len(), "global functions available");

        Ok(SetupReport {
            results,
            successful,
            failed,
            globals,
            loaded_scripts: self.loaded_scripts(),
            bridge,
        })
    }
}

/// Read a JSON harness config, merged over the defaults
pub fn load_config(path: &Path) -> InjectResult<HarnessConfig> {
    HarnessConfig::from_json_file(path).map_err(|e| {
        let err = InjectError::Config(format!("{}: {}", path.display(), e));
        tracing::error!("{}", err);
        err
    })
}

/// Build an injector from `config` and run [`ScriptInjector::setup_environment`]
pub async fn setup(config: &HarnessConfig) -> InjectResult<(ScriptInjector, SetupReport)> {
    let mut injector = ScriptInjector::from_config(config)?;
    let report = injector.setup_environment(config).await?;
    Ok((injector, report))
}
