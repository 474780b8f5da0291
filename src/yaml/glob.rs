//! Glob expansion for `Files` `in`/`out` lists, the built-in `!Glob`
//! string-list tag.

use std::path::Path;

use tap::Pipe;

use crate::controller::Controller;
use crate::error::{FabError, Result};

/// Expands a glob pattern, rebased against the YAML file's directory
/// (spec §4.6), into the matching paths, relative to topdir where possible,
/// sorted for determinism.
pub fn expand(pattern: &str, controller: &Controller, yaml_dir: &Path) -> Result<Vec<String>> {
    let qualified = yaml_dir.join(pattern);
    let pattern_str = qualified.to_string_lossy().into_owned();

    glob::glob(&pattern_str)
        .map_err(|err| FabError::Yaml(format!("invalid glob pattern {pattern:?}: {err}")))?
        .filter_map(|entry| entry.ok())
        .map(|path| {
            path.strip_prefix(controller.topdir())
                .map(|rel| rel.to_string_lossy().into_owned())
                .unwrap_or_else(|_| path.to_string_lossy().into_owned())
        })
        .collect::<Vec<String>>()
        .pipe(|mut matches| {
            matches.sort();
            matches
        })
        .pipe(Ok)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn expands_to_sorted_relative_paths() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.rs"), "").unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        std::fs::write(dir.path().join("c.txt"), "").unwrap();

        let controller = Controller::new(dir.path());
        let matches = expand("*.rs", &controller, dir.path()).unwrap();
        assert_eq!(matches, vec!["a.rs".to_string(), "b.rs".to_string()]);
    }
}
