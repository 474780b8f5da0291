use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::Result;

use super::{Target, TargetId};

/// Runs children one at a time, in order, stopping at the first failure
/// (spec §4.2's "sequential, short-circuit" fan-out — the opposite policy
/// from `All`).
#[derive(Debug)]
pub struct Seq {
    id: TargetId,
    children: Vec<Arc<dyn Target>>,
}

impl Seq {
    pub fn new(children: Vec<Arc<dyn Target>>) -> Arc<Self> {
        Arc::new(Self {
            id: TargetId::next(),
            children,
        })
    }
}

#[async_trait]
impl Target for Seq {
    fn id(&self) -> TargetId {
        self.id
    }

    fn description(&self) -> String {
        format!("Seq({} targets)", self.children.len())
    }

    fn type_tag(&self) -> &'static str {
        "Seq"
    }

    fn canonical_json(&self) -> Option<serde_json::Value> {
        let children = self
            .children
            .iter()
            .map(|child| child.canonical_json())
            .collect::<Option<Vec<_>>>()?;
        Some(json!({ "children": children }))
    }

    async fn run(&self, ctx: &Ctx, controller: &Controller) -> Result<()> {
        for child in &self.children {
            controller.run(ctx, std::slice::from_ref(child)).await?;
        }
        Ok(())
    }
}
