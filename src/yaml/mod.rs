//! The declarative YAML loader (spec §4.6): parses a document of tagged
//! target nodes and registers one target per top-level key.

mod glob;
mod nodes;
mod registry;

pub use nodes::decode_target_value;
pub use registry::{register_string_list_tag, register_tag};

use std::path::Path;

use serde_yaml::Value;

use crate::controller::Controller;
use crate::error::{FabError, Result};

/// Parses `source` and registers one target per top-level mapping key. The
/// `#`-prefixed comment lines immediately preceding a key (spec §4.6) become
/// that target's doc string, the same string shown by `-list`. `yaml_dir` is
/// the directory relative paths inside `source` are resolved against —
/// pass `controller.topdir()` for a manifest with no file of its own.
pub fn load_str(source: &str, controller: &Controller, yaml_dir: &Path) -> Result<()> {
    let docs = leading_doc_comments(source);
    let value: Value = serde_yaml::from_str(source)?;
    let Value::Mapping(mapping) = value else {
        return Err(FabError::Yaml("top-level YAML document must be a mapping of target names".to_string()));
    };

    for (key, node) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| FabError::Yaml(format!("target name must be a string, found {key:?}")))?
            .to_string();
        let target = decode_target_value(&node, controller, yaml_dir)?;
        let doc = docs.get(&name).cloned().unwrap_or_default();
        controller.register_target(name, doc, target)?;
    }
    Ok(())
}

/// Loads and parses the manifest at `path`, resolving its relative paths
/// against `path`'s own parent directory (spec §4.6), not `controller`'s
/// topdir — the normal case for a manifest that isn't at the project root.
pub async fn load_file(path: impl AsRef<Path>, controller: &Controller) -> Result<()> {
    let path = path.as_ref();
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| FabError::io(path, "read", err))?;
    let yaml_dir = controller.join_path([path.parent().unwrap_or_else(|| Path::new(""))]);
    load_str(&source, controller, &yaml_dir)
}

/// Scans raw YAML source for `#`-prefixed comment lines immediately above a
/// top-level (unindented) `key:` line, joining consecutive comment lines
/// into one doc string per key. `serde_yaml::Value` does not preserve
/// comments, so this runs over the source text directly rather than the
/// parsed tree.
fn leading_doc_comments(source: &str) -> std::collections::HashMap<String, String> {
    let mut docs = std::collections::HashMap::new();
    let mut pending: Vec<&str> = Vec::new();

    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            pending.push(trimmed.trim_start_matches('#').trim());
            continue;
        }
        if trimmed.is_empty() {
            pending.clear();
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            if let Some((key, _)) = trimmed.split_once(':') {
                if !pending.is_empty() {
                    docs.insert(key.trim().to_string(), pending.join(" "));
                }
            }
        }
        pending.clear();
    }
    docs
}
