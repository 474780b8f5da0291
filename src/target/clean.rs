use async_trait::async_trait;
use serde_json::json;

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::{FabError, Result};

use super::{Target, TargetId};

/// Removes a fixed list of paths (rebased against the controller's
/// topdir), plus — if `autoclean` is set — every output path ever
/// registered by a `Files` target constructed with its own `autoclean`
/// flag (spec §4.4). Missing files are not an error: `Clean` is
/// idempotent.
#[derive(Debug)]
pub struct Clean {
    id: TargetId,
    files: Vec<String>,
    autoclean: bool,
}

impl Clean {
    pub fn new(files: Vec<String>, autoclean: bool) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            id: TargetId::next(),
            files,
            autoclean,
        })
    }
}

#[async_trait]
impl Target for Clean {
    fn id(&self) -> TargetId {
        self.id
    }

    fn description(&self) -> String {
        format!("Clean({} files)", self.files.len())
    }

    fn type_tag(&self) -> &'static str {
        "Clean"
    }

    fn canonical_json(&self) -> Option<serde_json::Value> {
        Some(json!({ "files": self.files, "autoclean": self.autoclean }))
    }

    async fn run(&self, ctx: &Ctx, controller: &Controller) -> Result<()> {
        let mut paths: Vec<_> = self
            .files
            .iter()
            .map(|f| controller.join_path([f]))
            .collect();
        if self.autoclean {
            paths.extend(controller.autoclean_paths());
        }

        for path in paths {
            if ctx.dry_run {
                tracing::info!(indent = ctx.depth, path = %path.display(), "would remove (dry run)");
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "removed"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(FabError::io(&path, "remove", err)),
            }
        }
        Ok(())
    }
}
