//! Per-invocation configuration threaded through every target run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::hashdb::HashDb;

/// Context-carried parameters (spec §9): constructed once per invocation
/// and passed by reference down the target tree. `ArgTarget` derives a new
/// `Ctx` for its subtree via [`Ctx::with_args`] rather than mutating any
/// ambient state, so a target's view of its own arguments never leaks to
/// siblings running concurrently.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub verbose: bool,
    pub force: bool,
    pub dry_run: bool,
    pub args: Vec<String>,
    pub hashdb: Option<Arc<dyn HashDb>>,
    pub cancel: CancellationToken,
    /// Ancestor target ids on the current scheduling path, for cycle
    /// detection (spec §4.2 edge case: "a target depends on itself").
    pub(crate) ancestry: Vec<crate::target::TargetId>,
    /// Nesting depth, purely for log indentation.
    pub(crate) depth: usize,
}

impl Ctx {
    pub fn new(hashdb: Option<Arc<dyn HashDb>>) -> Self {
        Self {
            verbose: false,
            force: false,
            dry_run: false,
            args: Vec::new(),
            hashdb,
            cancel: CancellationToken::new(),
            ancestry: Vec::new(),
            depth: 0,
        }
    }

    /// A new context for an `ArgTarget`'s wrapped subtree, carrying the
    /// parsed arguments but otherwise identical to `self`.
    pub fn with_args(&self, args: Vec<String>) -> Self {
        Self {
            args,
            ..self.clone()
        }
    }

    pub(crate) fn descend(&self, id: crate::target::TargetId) -> Self {
        let mut ancestry = self.ancestry.clone();
        ancestry.push(id);
        Self {
            ancestry,
            depth: self.depth + 1,
            ..self.clone()
        }
    }
}
