//! Decoders for the seven built-in tags, plus the generic dispatch used
//! wherever a YAML value names another target.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::Value;

use crate::controller::Controller;
use crate::error::{FabError, Result};
use crate::target::{
    ArgTarget, Clean, Command, CommandSpec, DeferredName, Deps, Exec, Files, ParentStream, Seq,
    StreamSpec, Target,
};

use super::registry::{lookup_string_list_decoder, lookup_target_decoder};

pub(crate) fn builtin_target_decoders() -> Vec<(&'static str, super::registry::TargetDecoder)> {
    vec![
        ("All", decode_all as super::registry::TargetDecoder),
        ("Seq", decode_seq),
        ("Deps", decode_deps),
        ("ArgTarget", decode_arg_target),
        ("Command", decode_command),
        ("Clean", decode_clean),
        ("Files", decode_files),
    ]
}

pub(crate) fn builtin_string_list_decoders() -> Vec<(&'static str, super::registry::StringListDecoder)>
{
    vec![("Glob", decode_glob as super::registry::StringListDecoder)]
}

/// A YAML node that names a target: a bare string is a deferred reference
/// to a target registered elsewhere (spec §4.6); a tagged node is decoded
/// recursively through the registry. `yaml_dir` is the directory of the
/// YAML file being decoded, passed down so any relative path the decoder
/// resolves is rebased against the manifest rather than always topdir.
pub fn decode_target_value(value: &Value, controller: &Controller, yaml_dir: &Path) -> Result<Arc<dyn Target>> {
    match value {
        Value::String(name) => Ok(DeferredName::new(name.clone())),
        Value::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            let tag = tag.trim_start_matches('!');
            let decoder = lookup_target_decoder(tag)
                .ok_or_else(|| FabError::Yaml(format!("unknown target tag !{tag}")))?;
            decoder(&tagged.value, controller, yaml_dir)
        }
        other => Err(FabError::Yaml(format!(
            "expected a target name or a tagged target node, found {other:?}"
        ))),
    }
}

/// A YAML sequence of either bare path strings or tagged string-list nodes
/// (e.g. `!Glob`), flattened into one `Vec<String>` (used for `Files`
/// `in`/`out` lists). Bare strings are rebased against `yaml_dir` the same
/// way `!Glob` matches are, so both forms resolve relative to the manifest.
fn decode_string_list(value: &Value, controller: &Controller, yaml_dir: &Path) -> Result<Vec<String>> {
    let Value::Sequence(items) = value else {
        return Err(FabError::Yaml(format!("expected a sequence of paths, found {value:?}")));
    };
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::String(s) => out.push(rebase_to_topdir(s, yaml_dir, controller)),
            Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                let tag = tag.trim_start_matches('!');
                let decoder = lookup_string_list_decoder(tag)
                    .ok_or_else(|| FabError::Yaml(format!("unknown string-list tag !{tag}")))?;
                out.extend(decoder(&tagged.value, controller, yaml_dir)?);
            }
            other => return Err(FabError::Yaml(format!("expected a path or tagged node, found {other:?}"))),
        }
    }
    Ok(out)
}

/// Joins `raw` onto `yaml_dir` and expresses the result relative to
/// `controller.topdir()` when possible, falling back to an absolute path
/// otherwise — the same convention `glob::expand` uses for its matches, so
/// both paths land downstream in the form `controller.join_path` expects.
fn rebase_to_topdir(raw: &str, yaml_dir: &Path, controller: &Controller) -> String {
    let absolute = yaml_dir.join(raw);
    match absolute.strip_prefix(controller.topdir()) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => absolute.to_string_lossy().into_owned(),
    }
}

fn decode_glob(value: &Value, controller: &Controller, yaml_dir: &Path) -> Result<Vec<String>> {
    let pattern = value
        .as_str()
        .ok_or_else(|| FabError::Yaml("!Glob expects a string pattern".to_string()))?;
    super::glob::expand(pattern, controller, yaml_dir)
}

fn field<'a>(mapping: &'a Value, key: &str) -> Option<&'a Value> {
    mapping.as_mapping()?.get(Value::String(key.to_string()))
}

fn require_mapping<'a>(value: &'a Value, tag: &str) -> Result<&'a Value> {
    if value.as_mapping().is_some() {
        Ok(value)
    } else {
        Err(FabError::Yaml(format!("!{tag} expects a mapping")))
    }
}

fn string_field(mapping: &Value, key: &str) -> Option<String> {
    field(mapping, key)?.as_str().map(ToString::to_string)
}

fn bool_field(mapping: &Value, key: &str, default: bool) -> bool {
    field(mapping, key).and_then(Value::as_bool).unwrap_or(default)
}

fn decode_all(value: &Value, controller: &Controller, yaml_dir: &Path) -> Result<Arc<dyn Target>> {
    let Value::Sequence(items) = value else {
        return Err(FabError::Yaml("!All expects a sequence".to_string()));
    };
    let children = items
        .iter()
        .map(|item| decode_target_value(item, controller, yaml_dir))
        .collect::<Result<Vec<_>>>()?;
    Ok(crate::target::All::new(children))
}

fn decode_seq(value: &Value, controller: &Controller, yaml_dir: &Path) -> Result<Arc<dyn Target>> {
    let Value::Sequence(items) = value else {
        return Err(FabError::Yaml("!Seq expects a sequence".to_string()));
    };
    let children = items
        .iter()
        .map(|item| decode_target_value(item, controller, yaml_dir))
        .collect::<Result<Vec<_>>>()?;
    Ok(Seq::new(children))
}

fn decode_deps(value: &Value, controller: &Controller, yaml_dir: &Path) -> Result<Arc<dyn Target>> {
    let value = require_mapping(value, "Deps")?;
    let main = field(value, "main").ok_or_else(|| FabError::Yaml("!Deps requires `main`".to_string()))?;
    let main = decode_target_value(main, controller, yaml_dir)?;
    let prereqs = match field(value, "prereqs") {
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| decode_target_value(item, controller, yaml_dir))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
        Some(other) => return Err(FabError::Yaml(format!("!Deps `prereqs` must be a sequence, found {other:?}"))),
    };
    Ok(Deps::new(main, prereqs))
}

fn decode_arg_target(value: &Value, controller: &Controller, yaml_dir: &Path) -> Result<Arc<dyn Target>> {
    let value = require_mapping(value, "ArgTarget")?;
    let target = field(value, "target")
        .ok_or_else(|| FabError::Yaml("!ArgTarget requires `target`".to_string()))?;
    let target = decode_target_value(target, controller, yaml_dir)?;
    let args = match field(value, "args") {
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| FabError::Yaml("!ArgTarget `args` entries must be strings".to_string()))
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
        Some(other) => return Err(FabError::Yaml(format!("!ArgTarget `args` must be a sequence, found {other:?}"))),
    };
    Ok(ArgTarget::new(target, args))
}

fn decode_stream(mapping: &Value, key: &str) -> Result<StreamSpec> {
    match field(mapping, key) {
        None => Ok(StreamSpec::Default),
        Some(Value::String(sentinel)) => match sentinel.as_str() {
            "$stdin" => Ok(StreamSpec::Inherit(ParentStream::Stdin)),
            "$stdout" => Ok(StreamSpec::Inherit(ParentStream::Stdout)),
            "$stderr" => Ok(StreamSpec::Inherit(ParentStream::Stderr)),
            "$discard" => Ok(StreamSpec::Discard),
            "$indent" => Ok(StreamSpec::Indent),
            "$verbose" => Ok(StreamSpec::VerboseIndent),
            other => Err(FabError::Yaml(format!("unrecognized stream sentinel {other:?} for `{key}`"))),
        },
        Some(node @ Value::Mapping(_)) => {
            let path = string_field(node, "file")
                .ok_or_else(|| FabError::Yaml(format!("`{key}` mapping requires `file`")))?;
            let append = bool_field(node, "append", false);
            Ok(StreamSpec::File { path: PathBuf::from(path), append })
        }
        Some(other) => Err(FabError::Yaml(format!("invalid value for `{key}`: {other:?}"))),
    }
}

fn decode_command(value: &Value, controller: &Controller, _yaml_dir: &Path) -> Result<Arc<dyn Target>> {
    let mapping = require_mapping(value, "Command")?;
    if let Some(Value::Sequence(scripts)) = field(mapping, "shell") {
        return decode_command_shell_list(mapping, scripts);
    }
    decode_command_single(mapping, controller)
}

/// YAML shell-as-list sugar: a `shell:` sequence of strings becomes a `Seq`
/// of otherwise-identical `Command`s, one per entry, where every entry past
/// the first forces `append: true` on any file-backed output stream so
/// later commands don't clobber what earlier ones wrote.
fn decode_command_shell_list(mapping: &Value, scripts: &[Value]) -> Result<Arc<dyn Target>> {
    let mut commands = Vec::with_capacity(scripts.len());
    for (index, script) in scripts.iter().enumerate() {
        let script = script
            .as_str()
            .ok_or_else(|| FabError::Yaml("!Command `shell` list entries must be strings".to_string()))?;
        let mut spec = decode_command_spec(mapping, Exec::Shell(script.to_string()))?;
        if index > 0 {
            force_append(&mut spec.stdout);
            force_append(&mut spec.stderr);
        }
        commands.push(Command::new(spec)?);
    }
    Ok(Seq::new(commands))
}

fn force_append(stream: &mut StreamSpec) {
    if let StreamSpec::File { append, .. } = stream {
        *append = true;
    }
}

fn decode_command_single(mapping: &Value, _controller: &Controller) -> Result<Arc<dyn Target>> {
    let shell = string_field(mapping, "shell");
    let cmd = string_field(mapping, "cmd");
    let exec = match (shell, cmd) {
        (Some(shell), None) => Exec::Shell(shell),
        (None, Some(cmd)) => {
            let args = match field(mapping, "args") {
                Some(Value::Sequence(items)) => items
                    .iter()
                    .map(|item| {
                        item.as_str().map(ToString::to_string).ok_or_else(|| {
                            FabError::Yaml("!Command `args` entries must be strings".to_string())
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
                Some(other) => {
                    return Err(FabError::Yaml(format!("!Command `args` must be a sequence, found {other:?}")))
                }
            };
            Exec::Cmd { cmd, args }
        }
        (None, None) => {
            return Err(FabError::Yaml(
                "!Command requires exactly one of `shell` or `cmd`, found neither".to_string(),
            ))
        }
        (Some(_), Some(_)) => {
            return Err(FabError::Yaml(
                "!Command requires exactly one of `shell` or `cmd`, found both".to_string(),
            ))
        }
    };

    let spec = decode_command_spec(mapping, exec)?;
    Command::new(spec)
}

/// Decodes the fields shared by every `Command`/`shell`-list entry (`args`
/// are already folded into `exec` by the caller).
fn decode_command_spec(mapping: &Value, exec: Exec) -> Result<CommandSpec> {
    let env = match field(mapping, "env") {
        Some(Value::Mapping(map)) => map
            .iter()
            .map(|(k, v)| {
                let key = k
                    .as_str()
                    .ok_or_else(|| FabError::Yaml("!Command `env` keys must be strings".to_string()))?;
                let val = v
                    .as_str()
                    .ok_or_else(|| FabError::Yaml("!Command `env` values must be strings".to_string()))?;
                Ok((key.to_string(), val.to_string()))
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
        Some(other) => return Err(FabError::Yaml(format!("!Command `env` must be a mapping, found {other:?}"))),
    };

    Ok(CommandSpec {
        exec,
        dir: string_field(mapping, "dir").map(PathBuf::from),
        env,
        stdin: decode_stream(mapping, "stdin")?,
        stdout: decode_stream(mapping, "stdout")?,
        stderr: decode_stream(mapping, "stderr")?,
    })
}

fn decode_clean(value: &Value, controller: &Controller, yaml_dir: &Path) -> Result<Arc<dyn Target>> {
    let value = require_mapping(value, "Clean")?;
    let files = match field(value, "files") {
        Some(node @ Value::Sequence(_)) => decode_string_list(node, controller, yaml_dir)?,
        None => Vec::new(),
        Some(other) => return Err(FabError::Yaml(format!("!Clean `files` must be a sequence, found {other:?}"))),
    };
    let autoclean = bool_field(value, "autoclean", false);
    Ok(Clean::new(files, autoclean))
}

fn decode_files(value: &Value, controller: &Controller, yaml_dir: &Path) -> Result<Arc<dyn Target>> {
    let value = require_mapping(value, "Files")?;
    let sub = field(value, "sub").ok_or_else(|| FabError::Yaml("!Files requires `sub`".to_string()))?;
    let sub = decode_target_value(sub, controller, yaml_dir)?;

    let inputs = match field(value, "in") {
        Some(node @ Value::Sequence(_)) => decode_string_list(node, controller, yaml_dir)?,
        None => Vec::new(),
        Some(other) => return Err(FabError::Yaml(format!("!Files `in` must be a sequence, found {other:?}"))),
    };
    let outputs = match field(value, "out") {
        Some(node @ Value::Sequence(_)) => decode_string_list(node, controller, yaml_dir)?,
        None => Vec::new(),
        Some(other) => return Err(FabError::Yaml(format!("!Files `out` must be a sequence, found {other:?}"))),
    };
    let autoclean = bool_field(value, "autoclean", false);

    Files::new(controller, sub, inputs, outputs, autoclean)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn controller() -> Controller {
        Controller::new(tempdir().unwrap().keep())
    }

    #[test]
    fn decode_command_requires_exactly_one_of_shell_or_cmd() {
        let controller = controller();
        let neither: Value = serde_yaml::from_str("{}").unwrap();
        assert!(decode_command(&neither, &controller, controller.topdir()).is_err());

        let both: Value = serde_yaml::from_str("shell: echo hi\ncmd: echo\nargs: []").unwrap();
        assert!(decode_command(&both, &controller, controller.topdir()).is_err());
    }

    #[test]
    fn decode_command_shell_list_forces_append_after_the_first_entry() {
        let controller = controller();
        let value: Value = serde_yaml::from_str(
            "shell:\n  - echo one\n  - echo two\nstdout:\n  file: out.log\n  append: false",
        )
        .unwrap();
        let target = decode_command(&value, &controller, controller.topdir()).unwrap();
        assert_eq!(target.type_tag(), "Seq");
    }

    #[test]
    fn decode_all_resolves_string_entries_as_deferred_names() {
        let controller = controller();
        let value: Value = serde_yaml::from_str("- build\n- test").unwrap();
        let target = decode_all(&value, &controller, controller.topdir()).unwrap();
        assert_eq!(target.type_tag(), "All");
    }

    #[test]
    fn decode_stream_sentinel_values() {
        let mapping: Value = serde_yaml::from_str("stdout: \"$discard\"").unwrap();
        assert_eq!(decode_stream(&mapping, "stdout").unwrap(), StreamSpec::Discard);

        let mapping: Value = serde_yaml::from_str("stdout:\n  file: out.log\n  append: true").unwrap();
        assert_eq!(
            decode_stream(&mapping, "stdout").unwrap(),
            StreamSpec::File { path: "out.log".into(), append: true }
        );
    }

    #[test]
    fn decode_stream_sentinels_carry_the_named_parent_stream() {
        let mapping: Value = serde_yaml::from_str("stdout: \"$stderr\"").unwrap();
        assert_eq!(
            decode_stream(&mapping, "stdout").unwrap(),
            StreamSpec::Inherit(ParentStream::Stderr)
        );

        let mapping: Value = serde_yaml::from_str("stdout: \"$stdout\"").unwrap();
        assert_eq!(
            decode_stream(&mapping, "stdout").unwrap(),
            StreamSpec::Inherit(ParentStream::Stdout)
        );

        let mapping: Value = serde_yaml::from_str("stdin: \"$stdin\"").unwrap();
        assert_eq!(decode_stream(&mapping, "stdin").unwrap(), StreamSpec::Inherit(ParentStream::Stdin));
    }
}
