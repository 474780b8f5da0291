use async_trait::async_trait;

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::{FabError, Result};

use super::{Target, TargetId};

/// A target reference resolved by name against the controller's registry at
/// run time rather than at construction time — needed by the YAML loader,
/// where a document can reference a target declared later in the same file
/// or registered by a sibling document (spec §4.6 deferred resolution).
#[derive(Debug)]
pub struct DeferredName {
    id: TargetId,
    name: String,
}

impl DeferredName {
    pub fn new(name: impl Into<String>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            id: TargetId::next(),
            name: name.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Target for DeferredName {
    fn id(&self) -> TargetId {
        self.id
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn type_tag(&self) -> &'static str {
        "DeferredName"
    }

    // Deliberately returns `None`: resolution happens at run time, so there
    // is no fixed configuration to hash until the name is looked up. A
    // `Files` target should wrap the resolved target directly, not a
    // `DeferredName` pointing at it.

    async fn run(&self, ctx: &Ctx, controller: &Controller) -> Result<()> {
        let resolved = controller.registry_target(&self.name).ok_or_else(|| {
            FabError::Config(format!("no target registered under name {:?}", self.name))
        })?;
        controller
            .run(ctx, std::slice::from_ref(&resolved))
            .await
    }
}
