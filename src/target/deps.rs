use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::Result;

use super::{Target, TargetId};

/// Runs every prerequisite (concurrently with each other), then — only if
/// all of them succeeded — runs `main`. Distinct from `Seq` in that the
/// prerequisites have no ordering requirement among themselves; distinct
/// from `All` in that `main` is not a peer, it strictly follows.
#[derive(Debug)]
pub struct Deps {
    id: TargetId,
    main: Arc<dyn Target>,
    prereqs: Vec<Arc<dyn Target>>,
}

impl Deps {
    pub fn new(main: Arc<dyn Target>, prereqs: Vec<Arc<dyn Target>>) -> Arc<Self> {
        Arc::new(Self {
            id: TargetId::next(),
            main,
            prereqs,
        })
    }
}

#[async_trait]
impl Target for Deps {
    fn id(&self) -> TargetId {
        self.id
    }

    fn description(&self) -> String {
        format!("Deps({} prereqs -> {})", self.prereqs.len(), self.main.description())
    }

    fn type_tag(&self) -> &'static str {
        "Deps"
    }

    fn canonical_json(&self) -> Option<serde_json::Value> {
        let prereqs = self
            .prereqs
            .iter()
            .map(|child| child.canonical_json())
            .collect::<Option<Vec<_>>>()?;
        Some(json!({ "main": self.main.canonical_json()?, "prereqs": prereqs }))
    }

    async fn run(&self, ctx: &Ctx, controller: &Controller) -> Result<()> {
        controller.run(ctx, &self.prereqs).await?;
        controller.run(ctx, std::slice::from_ref(&self.main)).await
    }
}
