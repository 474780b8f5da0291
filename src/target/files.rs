//! The content-addressed cache gate (spec §4.5): wraps a target with a set
//! of input/output paths, skips re-running it when the hash of
//! (`sub`'s configuration + input digests + output digests) is already
//! accepted by the `HashDb`, and links inputs produced by other `Files`
//! targets as prerequisites.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::{FabError, Result};
use crate::hash;

use super::{Target, TargetId};

#[derive(Debug)]
pub struct Files {
    id: TargetId,
    sub: Arc<dyn Target>,
    sub_type: &'static str,
    sub_json: serde_json::Value,
    pub(crate) inputs: Vec<PathBuf>,
    pub(crate) outputs: Vec<PathBuf>,
    autoclean: bool,
}

impl Files {
    /// Qualifies `inputs`/`outputs` against the controller's topdir,
    /// rejects `sub` if it cannot be canonically serialized (the `F`
    /// exclusion from spec §4.5), and registers each output with the
    /// controller so later `Files` targets can discover this one as a
    /// prerequisite producer and `Clean(autoclean: true)` can find it.
    pub fn new(
        controller: &Controller,
        sub: Arc<dyn Target>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        autoclean: bool,
    ) -> Result<Arc<Self>> {
        let sub_json = sub.canonical_json().ok_or_else(|| {
            FabError::Contract(format!(
                "{} targets cannot be wrapped by Files: no canonical serialization",
                sub.type_tag()
            ))
        })?;

        let inputs: Vec<PathBuf> = inputs.iter().map(|p| controller.join_path([p])).collect();
        let outputs: Vec<PathBuf> = outputs.iter().map(|p| controller.join_path([p])).collect();

        let files = Arc::new(Self {
            id: TargetId::next(),
            sub_type: sub.type_tag(),
            sub,
            sub_json,
            inputs,
            outputs,
            autoclean,
        });

        controller.register_files_target(files.clone())?;
        Ok(files)
    }

    pub(crate) fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub(crate) fn autoclean(&self) -> bool {
        self.autoclean
    }

    async fn compute_hash(&self, ctx: &Ctx) -> Result<String> {
        let mut ins = Vec::with_capacity(self.inputs.len());
        for path in &self.inputs {
            let digest = hash::file_digest(path, &ctx.cancel).await?;
            ins.push((path.display().to_string(), digest));
        }
        let mut outs = Vec::with_capacity(self.outputs.len());
        for path in &self.outputs {
            let digest = hash::file_digest(path, &ctx.cancel).await?;
            outs.push((path.display().to_string(), digest));
        }
        let record = hash::canonical_record(self.sub_json.clone(), self.sub_type, &ins, &outs);
        Ok(hash::hex_digest(&record))
    }
}

#[async_trait]
impl Target for Files {
    fn id(&self) -> TargetId {
        self.id
    }

    fn description(&self) -> String {
        format!("Files({})", self.sub.description())
    }

    fn type_tag(&self) -> &'static str {
        "Files"
    }

    fn canonical_json(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "sub": self.sub_json,
            "in": self.inputs,
            "out": self.outputs,
        }))
    }

    async fn run(&self, ctx: &Ctx, controller: &Controller) -> Result<()> {
        let mut prereqs = Vec::new();
        let mut seen = HashSet::new();
        for input in &self.inputs {
            if let Some(producer) = controller.files_producer(input) {
                if producer.id() != self.id && seen.insert(producer.id()) {
                    let producer: Arc<dyn Target> = producer;
                    prereqs.push(producer);
                }
            }
        }
        if !prereqs.is_empty() {
            controller.run(ctx, &prereqs).await?;
        }

        if ctx.force || ctx.hashdb.is_none() {
            return controller.run(ctx, std::slice::from_ref(&self.sub)).await;
        }
        let hashdb = ctx.hashdb.clone().expect("checked above");

        let before = self.compute_hash(ctx).await?;
        if hashdb.has(&before).await? {
            tracing::info!(indent = ctx.depth, target = %self.description(), "up to date");
            return Ok(());
        }

        controller.run(ctx, std::slice::from_ref(&self.sub)).await?;

        let after = self.compute_hash(ctx).await?;
        hashdb.add(&after).await?;
        Ok(())
    }
}
