use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::Result;

use super::{Target, TargetId};

/// Runs every child concurrently; fails only if at least one child fails,
/// after waiting for all of them (spec §4.2's "all-children" fan-out).
#[derive(Debug)]
pub struct All {
    id: TargetId,
    children: Vec<Arc<dyn Target>>,
}

impl All {
    pub fn new(children: Vec<Arc<dyn Target>>) -> Arc<Self> {
        Arc::new(Self {
            id: TargetId::next(),
            children,
        })
    }
}

#[async_trait]
impl Target for All {
    fn id(&self) -> TargetId {
        self.id
    }

    fn description(&self) -> String {
        format!("All({} targets)", self.children.len())
    }

    fn type_tag(&self) -> &'static str {
        "All"
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
        controller.run(ctx, &self.children).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    use tempfile::tempdir;

    use crate::controller::Controller;
    use crate::target::F;

    use super::*;

    #[tokio::test]
    async fn empty_all_succeeds_without_scheduling_anything() {
        let dir = tempdir().unwrap();
        let controller = Controller::new(dir.path());
        let ctx = Ctx::new(None);
        All::new(vec![]).run(&ctx, &controller).await.unwrap();
    }

    #[tokio::test]
    async fn all_children_run_even_if_some_fail() {
        let dir = tempdir().unwrap();
        let controller = Controller::new(dir.path());
        let ctx = Ctx::new(None);

        let ran = StdArc::new(AtomicUsize::new(0));
        let ok = {
            let ran = ran.clone();
            F::new("ok", move |_, _| {
                let ran = ran.clone();
                Box::pin(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };
        let fail = F::new("fail", |_, _| {
            Box::pin(async move { Err(crate::error::FabError::Config("boom".into())) })
        });

        let all = All::new(vec![ok, fail]);
        let result = all.run(&ctx, &controller).await;
        assert!(result.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
