//! Error taxonomy for the core engine.
//!
//! Library code returns [`FabError`] rather than an opaque report so that
//! callers can match on exit status, cancellation, etc. (spec: "the
//! underlying error is unwrappable for pattern-matching on exit status").
//! The binary front-end converts these into `color_eyre::Report`s at the
//! edge, the way `hurry`'s `main.rs` wraps typed failures in `color-eyre`.

use std::path::PathBuf;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, FabError>;

/// Bytes captured from a failed subprocess's stdout/stderr, attached to
/// [`CommandError`] so the failure is debuggable without re-running it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl std::fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.stdout.is_empty() {
            writeln!(f, "--- stdout ---\n{}", String::from_utf8_lossy(&self.stdout))?;
        }
        if !self.stderr.is_empty() {
            writeln!(f, "--- stderr ---\n{}", String::from_utf8_lossy(&self.stderr))?;
        }
        Ok(())
    }
}

/// A subprocess target that exited non-zero, or could not be spawned.
#[derive(Debug, Clone, thiserror::Error)]
#[error("command failed{}{}", status_suffix(.status), display_captured(.captured))]
pub struct CommandError {
    /// The process exit code, if the process actually ran and exited.
    /// `None` means the process was killed by a signal or never started.
    pub status: Option<i32>,
    pub captured: Option<CapturedOutput>,
}

fn status_suffix(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" (exit code {code})"),
        None => " (no exit code; killed or failed to spawn)".to_string(),
    }
}

fn display_captured(captured: &Option<CapturedOutput>) -> String {
    match captured {
        Some(c) if !c.stdout.is_empty() || !c.stderr.is_empty() => format!("\n{c}"),
        _ => String::new(),
    }
}

impl CommandError {
    /// The underlying exit status, for callers that want to pattern-match
    /// on it instead of rendering the whole error.
    pub fn status(&self) -> Option<i32> {
        self.status
    }
}

/// The error taxonomy described in spec §7: kinds, not a type per failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FabError {
    /// Unknown target name, duplicate registration, malformed YAML node.
    #[error("configuration error: {0}")]
    Config(String),

    /// Mutually-exclusive fields used together, discovered at run time.
    #[error("contract error: {0}")]
    Contract(String),

    /// A filesystem operation failed, wrapped with path + operation context.
    #[error("{op} {path}: {source}")]
    Io {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A subprocess target failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The run context was cancelled before or during this target's work.
    #[error("cancelled")]
    Cancelled,

    /// A target scheduled itself as its own ancestor.
    #[error("cycle detected at target {0:?}")]
    CycleDetected(String),

    /// One or more child targets in an `All` (or the top-level scheduler)
    /// failed; collects every failure rather than short-circuiting.
    #[error("{} of {} targets failed: {}", .0.len(), .0.len(), render_aggregate(.0))]
    Aggregate(Vec<FabError>),

    /// `HashDb` storage failure (e.g. the underlying SQLite operation).
    #[error("hash database error: {0}")]
    HashDb(String),

    /// YAML document failed to load or decode.
    #[error("yaml error: {0}")]
    Yaml(String),
}

fn render_aggregate(errors: &[FabError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl FabError {
    pub fn io(path: impl Into<PathBuf>, op: &'static str, source: std::io::Error) -> Self {
        FabError::Io {
            path: path.into(),
            op,
            source: Arc::new(source),
        }
    }

    /// Flattens a list of per-target results into a single result, matching
    /// the scheduler's join-style error aggregation (spec §4.2 step 4).
    pub fn aggregate(mut errors: Vec<FabError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(FabError::Aggregate(errors)),
        }
    }
}

impl From<rusqlite::Error> for FabError {
    fn from(err: rusqlite::Error) -> Self {
        FabError::HashDb(err.to_string())
    }
}

impl From<serde_yaml::Error> for FabError {
    fn from(err: serde_yaml::Error) -> Self {
        FabError::Yaml(err.to_string())
    }
}
