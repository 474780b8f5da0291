//! Process-wide tag-decoder registry (spec §4.6): maps a YAML tag name to
//! the function that turns its node into a target (or, for string-list
//! tags, into an expanded list of path strings). Pre-populated with the
//! built-in tags at first use; `register_tag`/`register_string_list_tag`
//! let calling code add its own without forking the loader.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{LazyLock, Mutex, OnceLock};

use serde_yaml::Value;

use crate::controller::Controller;
use crate::error::Result;
use crate::target::Target;

/// A decoder receives the node, the controller, and the directory of the
/// YAML file being decoded (spec §4.6), so relative paths it resolves are
/// rebased against the manifest rather than always the project's topdir.
pub type TargetDecoder = fn(&Value, &Controller, &Path) -> Result<std::sync::Arc<dyn Target>>;
pub type StringListDecoder = fn(&Value, &Controller, &Path) -> Result<Vec<String>>;

fn target_decoders() -> &'static Mutex<HashMap<&'static str, TargetDecoder>> {
    static REGISTRY: OnceLock<Mutex<HashMap<&'static str, TargetDecoder>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(super::nodes::builtin_target_decoders().into_iter().collect()))
}

fn string_list_decoders() -> &'static Mutex<HashMap<&'static str, StringListDecoder>> {
    static REGISTRY: OnceLock<Mutex<HashMap<&'static str, StringListDecoder>>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Mutex::new(super::nodes::builtin_string_list_decoders().into_iter().collect()))
}

/// The seven built-in tags, resolved once and shared by every loader call.
#[allow(dead_code)]
static BUILTIN_TAG_NAMES: LazyLock<Vec<&'static str>> =
    LazyLock::new(|| vec!["All", "Seq", "Deps", "ArgTarget", "Command", "Clean", "Files"]);

pub fn register_tag(tag: &'static str, decoder: TargetDecoder) {
    target_decoders().lock().expect("tag registry poisoned").insert(tag, decoder);
}

pub fn register_string_list_tag(tag: &'static str, decoder: StringListDecoder) {
    string_list_decoders()
        .lock()
        .expect("string-list tag registry poisoned")
        .insert(tag, decoder);
}

pub(crate) fn lookup_target_decoder(tag: &str) -> Option<TargetDecoder> {
    target_decoders().lock().expect("tag registry poisoned").get(tag).copied()
}

pub(crate) fn lookup_string_list_decoder(tag: &str) -> Option<StringListDecoder> {
    string_list_decoders()
        .lock()
        .expect("string-list tag registry poisoned")
        .get(tag)
        .copied()
}
