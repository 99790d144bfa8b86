//! Diagnostics sink and source manager
//!
//! The interpreter and linker never print errors themselves; everything
//! flows through the [`DiagSink`] seam so the compiler's diagnostic engine
//! can render compile-time failures at original source positions. The
//! [`SourceManager`] maps the file names found in per-PC annotations back
//! to the engine's file ids.

use rustc_hash::FxHashMap;

/// Diagnostic category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagKind {
    /// Operation not supported in constant evaluation
    ConstEvalUnsupported,
    /// Operation not supported by the interpreter at all
    InterpUnsupported,
    /// A node the interpreter cannot evaluate
    InterpCannotInterpret,
    /// A Cangjie exception escaped during constant evaluation
    ConstEvalException,
}

/// A source position as seen by the diagnostic engine
///
/// `file_id` is a source-manager id, not a file-pool index. The all-zero
/// position means "unknown" and renders without a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Source-manager file id
    pub file_id: u32,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

impl Position {
    /// Whether this is the unknown position
    pub fn is_zero(&self) -> bool {
        self.file_id == 0 && self.line == 0 && self.column == 0
    }
}

/// One emitted diagnostic
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Position, `None` when unknown
    pub position: Option<Position>,
    /// Category
    pub kind: DiagKind,
    /// Main message
    pub message: String,
    /// Attached notes, e.g. the exception backtrace
    pub notes: Vec<String>,
}

/// Consumer of interpreter and linker diagnostics
pub trait DiagSink {
    /// Emit one diagnostic
    fn diagnose(&mut self, diag: Diagnostic);
}

/// Sink that collects diagnostics in memory; used by tests and tools
#[derive(Debug, Default)]
pub struct CollectingDiagSink {
    /// Everything emitted so far, in order
    pub diags: Vec<Diagnostic>,
}

impl CollectingDiagSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anything was emitted
    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }
}

impl DiagSink for CollectingDiagSink {
    fn diagnose(&mut self, diag: Diagnostic) {
        self.diags.push(diag);
    }
}

/// File-name to file-id mapping
///
/// Stands in for the compiler's source manager: ids are allocated on first
/// use and id 0 is reserved for "unknown".
#[derive(Debug, Default)]
pub struct SourceManager {
    ids: FxHashMap<String, u32>,
    names: Vec<String>,
}

impl SourceManager {
    /// Create a source manager with only the unknown file registered
    pub fn new() -> Self {
        Self { ids: FxHashMap::default(), names: vec![String::new()] }
    }

    /// The id for `name`, allocating one on first use
    pub fn get_file_id(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    /// The name registered under `id`, empty for unknown ids
    pub fn file_name(&self, id: u32) -> &str {
        self.names.get(id as usize).map_or("", String::as_str)
    }
}
