//! The polymorphic `Target` model: one trait, eight built-in variants.

mod all;
mod arg;
mod clean;
mod command;
mod deferred;
mod deps;
mod files;
mod func;
mod seq;

pub use all::All;
pub use arg::ArgTarget;
pub use clean::Clean;
pub use command::{Command, CommandSpec, Exec, ParentStream, StreamSpec};
pub use deferred::DeferredName;
pub use deps::Deps;
pub use files::Files;
pub use func::F;
pub use seq::Seq;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::Result;

/// Identity for the scheduler's dedup map. Assigned once at construction
/// time from a process-wide counter — the value-semantics analogue of "a
/// stable heap address" from spec §9's Open Question on target identity,
/// since targets are handed around as `Arc<dyn Target>` rather than
/// interned by pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TargetId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn for_test(n: u64) -> Self {
        TargetId(n)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A unit of work in the build graph.
///
/// `canonical_json`/`type_tag` exist purely so a `Files` target can hash its
/// wrapped target's configuration (spec §4.5); `F` is the one built-in that
/// returns `None` from `canonical_json`, which is why `Files::new` rejects
/// it as a subject (spec §4.5's "F is explicitly excluded as a Files
/// subject").
#[async_trait]
pub trait Target: Send + Sync + fmt::Debug {
    fn id(&self) -> TargetId;

    /// Human-readable description used in "Running <description>" log lines.
    fn description(&self) -> String;

    /// The YAML/builtin tag name, used as `target_type` in a `Files` hash
    /// record.
    fn type_tag(&self) -> &'static str;

    /// A deterministic JSON serialization of this target's configuration,
    /// or `None` if this target kind cannot be a `Files` subject.
    fn canonical_json(&self) -> Option<Value> {
        None
    }

    async fn run(&self, ctx: &Ctx, controller: &Controller) -> Result<()>;
}
