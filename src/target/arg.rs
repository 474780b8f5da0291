use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::Result;

use super::{Target, TargetId};

/// Wraps a target and threads CLI arguments into its subtree via a derived
/// `Ctx` (spec §9: arguments are context-carried, not looked up by key).
/// Produced by `Controller::parse_args` when exactly one recognized target
/// is followed by `-`-prefixed arguments.
#[derive(Debug)]
pub struct ArgTarget {
    id: TargetId,
    child: Arc<dyn Target>,
    args: Vec<String>,
}

impl ArgTarget {
    pub fn new(child: Arc<dyn Target>, args: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            id: TargetId::next(),
            child,
            args,
        })
    }
}

#[async_trait]
impl Target for ArgTarget {
    fn id(&self) -> TargetId {
        self.id
    }

    fn description(&self) -> String {
        format!("{} {}", self.child.description(), self.args.join(" "))
    }

    fn type_tag(&self) -> &'static str {
        "ArgTarget"
    }

    fn canonical_json(&self) -> Option<serde_json::Value> {
        Some(json!({ "args": self.args, "child": self.child.canonical_json()? }))
    }

    async fn run(&self, ctx: &Ctx, controller: &Controller) -> Result<()> {
        let child_ctx = ctx.with_args(self.args.clone());
        controller
            .run(&child_ctx, std::slice::from_ref(&self.child))
            .await
    }
}
