use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::Result;

use super::{Target, TargetId};

type RunFn = dyn Fn(&Ctx, &Controller) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
    + Send
    + Sync;

/// A target backed by an arbitrary Rust closure: the escape hatch for
/// registering targets directly from Rust code rather than YAML. Because
/// its behavior is opaque to the engine, it has no canonical serialization
/// and is rejected as a `Files` subject (spec §4.5).
pub struct F {
    id: TargetId,
    name: String,
    run: Box<RunFn>,
}

impl F {
    pub fn new<Fut>(
        name: impl Into<String>,
        run: impl Fn(&Ctx, &Controller) -> Fut + Send + Sync + 'static,
    ) -> Arc<Self>
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Arc::new(Self {
            id: TargetId::next(),
            name: name.into(),
            run: Box::new(move |ctx, controller| Box::pin(run(ctx, controller))),
        })
    }
}

impl std::fmt::Debug for F {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("F").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Target for F {
    fn id(&self) -> TargetId {
        self.id
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn type_tag(&self) -> &'static str {
        "F"
    }

    async fn run(&self, ctx: &Ctx, controller: &Controller) -> Result<()> {
        (self.run)(ctx, controller).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f_has_no_canonical_serialization() {
        let target = F::new("noop", |_, _| Box::pin(async { Ok(()) }));
        assert!(target.canonical_json().is_none());
    }
}
