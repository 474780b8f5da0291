//! Subprocess target (spec §4.3): spawns one process, wires its standard
//! streams per a small per-stream policy, and maps a non-zero exit into a
//! `FabError::Command`.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::context::Ctx;
use crate::controller::Controller;
use crate::error::{CapturedOutput, CommandError, FabError, Result};

use super::{Target, TargetId};

/// How the process is invoked: a shell one-liner, or a literal program plus
/// argument vector. Exactly one must be chosen — the YAML decoder, not this
/// type, is responsible for rejecting a document that specifies neither or
/// both (spec §8 boundary: "a Command with neither shell, cmd, nor both is
/// a configuration error"), since at this layer the ambiguity cannot even
/// be represented.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum Exec {
    Shell(String),
    Cmd { cmd: String, args: Vec<String> },
}

/// Which of the parent process's own streams a `$stdin`/`$stdout`/`$stderr`
/// sentinel names. Kept distinct (rather than one generic "inherit") so
/// e.g. `stdout: "$stderr"` — merge a child's stdout into the parent's real
/// stderr — can be told apart from `stdout: "$stdout"`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ParentStream {
    Stdin,
    Stdout,
    Stderr,
}

/// Policy for one of a command's three standard streams.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum StreamSpec {
    /// Unspecified: verbose mode gets a live indenting copy, otherwise the
    /// stream is captured into a buffer for inclusion in a failure report.
    Default,
    /// Passed through to the named stream of the parent process — not
    /// necessarily the stream's own namesake, e.g. `stdout: "$stderr"`.
    Inherit(ParentStream),
    /// Discarded (`/dev/null`).
    Discard,
    /// A live indenting copy, regardless of verbosity.
    Indent,
    /// A live indenting copy, only in verbose mode; silent otherwise.
    VerboseIndent,
    /// Redirected to a file, truncating or appending.
    File { path: PathBuf, append: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandSpec {
    pub exec: Exec,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: StreamSpec,
    pub stdout: StreamSpec,
    pub stderr: StreamSpec,
}

impl CommandSpec {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            exec: Exec::Shell(command.into()),
            dir: None,
            env: Vec::new(),
            stdin: StreamSpec::Default,
            stdout: StreamSpec::Default,
            stderr: StreamSpec::Default,
        }
    }

    pub fn cmd(cmd: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            exec: Exec::Cmd { cmd: cmd.into(), args },
            dir: None,
            env: Vec::new(),
            stdin: StreamSpec::Default,
            stdout: StreamSpec::Default,
            stderr: StreamSpec::Default,
        }
    }
}

#[derive(Debug)]
pub struct Command {
    id: TargetId,
    spec: CommandSpec,
}

impl Command {
    /// Validates stream-agreement constraints that can only be checked once
    /// both streams are known, then wraps the spec as a target. Resolves
    /// `cmd:`-style executables against `PATH` up front via `which` so a
    /// typo fails fast with a clear message instead of an opaque ENOENT
    /// from `exec`.
    pub fn new(spec: CommandSpec) -> Result<std::sync::Arc<Self>> {
        if let (StreamSpec::File { path: p1, append: a1 }, StreamSpec::File { path: p2, append: a2 }) =
            (&spec.stdout, &spec.stderr)
        {
            if p1 == p2 && a1 != a2 {
                return Err(FabError::Contract(format!(
                    "stdout and stderr both target {p1:?} but disagree on append mode"
                )));
            }
        }
        if let Exec::Cmd { cmd, .. } = &spec.exec {
            if !cmd.contains(std::path::MAIN_SEPARATOR) {
                which::which(cmd).map_err(|err| {
                    FabError::Config(format!("executable {cmd:?} not found on PATH: {err}"))
                })?;
            }
        }
        Ok(std::sync::Arc::new(Self {
            id: TargetId::next(),
            spec,
        }))
    }
}

#[async_trait]
impl Target for Command {
    fn id(&self) -> TargetId {
        self.id
    }

    fn description(&self) -> String {
        match &self.spec.exec {
            Exec::Shell(s) => s.clone(),
            Exec::Cmd { cmd, args } => {
                if args.is_empty() {
                    cmd.clone()
                } else {
                    format!("{cmd} {}", args.join(" "))
                }
            }
        }
    }

    fn type_tag(&self) -> &'static str {
        "Command"
    }

    fn canonical_json(&self) -> Option<serde_json::Value> {
        serde_json::to_value(&self.spec).ok()
    }

    async fn run(&self, ctx: &Ctx, controller: &Controller) -> Result<()> {
        if ctx.dry_run {
            tracing::info!(indent = ctx.depth, command = %self.description(), "would run (dry run)");
            return Ok(());
        }

        let dir = self
            .spec
            .dir
            .as_ref()
            .map(|d| controller.join_path([d]))
            .unwrap_or_else(|| controller.topdir().to_path_buf());

        let mut command = match &self.spec.exec {
            Exec::Shell(script) => {
                let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
                let mut c = tokio::process::Command::new(shell);
                c.arg("-c").arg(script);
                c
            }
            Exec::Cmd { cmd, args } => {
                let mut c = tokio::process::Command::new(cmd);
                c.args(args);
                c
            }
        };
        command.current_dir(&dir);
        for (key, value) in &self.spec.env {
            command.env(key, value);
        }

        wire_stdin(&mut command, &self.spec.stdin, controller)?;
        let capture_stdout = wants_capture(&self.spec.stdout, ctx.verbose);
        let capture_stderr = wants_capture(&self.spec.stderr, ctx.verbose);
        let copy_stdout = wants_indent(&self.spec.stdout, ctx.verbose);
        let copy_stderr = wants_indent(&self.spec.stderr, ctx.verbose);

        let (stdout_sink, stderr_sink) = if let Some(shared) = shared_output_file(&self.spec, controller).await? {
            let stdout_handle = shared.try_clone().map_err(|err| FabError::io(&dir, "clone shared output handle", err))?;
            command.stdout(Stdio::from(shared));
            command.stderr(Stdio::from(stdout_handle));
            (OutputSink::None, OutputSink::None)
        } else {
            let stdout_sink =
                wire_output(&mut command, Stream::Stdout, &self.spec.stdout, capture_stdout || copy_stdout, controller)
                    .await?;
            let stderr_sink =
                wire_output(&mut command, Stream::Stderr, &self.spec.stderr, capture_stderr || copy_stderr, controller)
                    .await?;
            (stdout_sink, stderr_sink)
        };

        tracing::debug!(indent = ctx.depth, command = %self.description(), dir = %dir.display(), "spawning");
        let mut child = command
            .spawn()
            .map_err(|err| FabError::io(&dir, "spawn command", err))?;

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump(out, ctx.depth, "stdout", copy_stdout, capture_stdout, stdout_sink)));
        let stderr_task = child
            .stderr
            .take()
            .map(|out| tokio::spawn(pump(out, ctx.depth, "stderr", copy_stderr, capture_stderr, stderr_sink)));

        let status = tokio::select! {
            status = child.wait() => status.map_err(|err| FabError::io(&dir, "wait for command", err))?,
            _ = ctx.cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(FabError::Cancelled);
            }
        };

        let stdout_bytes = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr_bytes = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if status.success() {
            Ok(())
        } else {
            let captured = if capture_stdout || capture_stderr {
                Some(CapturedOutput {
                    stdout: stdout_bytes,
                    stderr: stderr_bytes,
                })
            } else {
                None
            };
            Err(FabError::Command(CommandError {
                status: status.code(),
                captured,
            }))
        }
    }
}

fn wants_capture(stream: &StreamSpec, verbose: bool) -> bool {
    matches!(stream, StreamSpec::Default) && !verbose
}

fn wants_indent(stream: &StreamSpec, verbose: bool) -> bool {
    match stream {
        StreamSpec::Default => verbose,
        StreamSpec::Indent => true,
        StreamSpec::VerboseIndent => verbose,
        _ => false,
    }
}

fn wire_stdin(command: &mut tokio::process::Command, spec: &StreamSpec, controller: &Controller) -> Result<()> {
    match spec {
        StreamSpec::Inherit(_) => {
            command.stdin(Stdio::inherit());
        }
        StreamSpec::Default | StreamSpec::Discard => {
            command.stdin(Stdio::null());
        }
        StreamSpec::File { path, .. } => {
            let qualified = controller.join_path([path]);
            let file = std::fs::File::open(&qualified).map_err(|err| FabError::io(&qualified, "open stdin", err))?;
            command.stdin(Stdio::from(file));
        }
        StreamSpec::Indent | StreamSpec::VerboseIndent => {
            return Err(FabError::Contract(
                "indenting stream wrappers are not valid for stdin".to_string(),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_parent(self) -> ParentStream {
        match self {
            Stream::Stdout => ParentStream::Stdout,
            Stream::Stderr => ParentStream::Stderr,
        }
    }
}

/// What to do with a piped stream once the child is running: nothing (the
/// `Stdio` was wired directly), drain it line-by-line for indenting/capture,
/// or copy its raw bytes straight into one of the parent's own streams.
#[derive(Debug, Clone, Copy)]
enum OutputSink {
    None,
    Line,
    Raw(ParentStream),
}

/// If `stdout` and `stderr` both name the same output file, opens it once
/// and returns the shared handle so both `Stdio`s are derived from one file
/// description — otherwise two independent opens would each truncate and
/// track their own write offset from 0, letting one stream clobber the
/// other instead of interleaving correctly. `Command::new` already rejects
/// the case where they'd disagree on `append`, so this only needs to check
/// the path.
async fn shared_output_file(spec: &CommandSpec, controller: &Controller) -> Result<Option<std::fs::File>> {
    let (StreamSpec::File { path: p1, append }, StreamSpec::File { path: p2, .. }) = (&spec.stdout, &spec.stderr)
    else {
        return Ok(None);
    };
    if p1 != p2 {
        return Ok(None);
    }
    let qualified = controller.join_path([p1]);
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(*append)
        .truncate(!*append)
        .open(&qualified)
        .await
        .map_err(|err| FabError::io(&qualified, "open shared output", err))?;
    Ok(Some(file.into_std().await))
}

async fn wire_output(
    command: &mut tokio::process::Command,
    which: Stream,
    spec: &StreamSpec,
    needs_pipe: bool,
    controller: &Controller,
) -> Result<OutputSink> {
    let (stdio, sink) = match spec {
        StreamSpec::Inherit(target) if *target == which.as_parent() => (Stdio::inherit(), OutputSink::None),
        StreamSpec::Inherit(target) => (Stdio::piped(), OutputSink::Raw(*target)),
        StreamSpec::Discard => (Stdio::null(), OutputSink::None),
        StreamSpec::Default | StreamSpec::Indent | StreamSpec::VerboseIndent => {
            if needs_pipe {
                (Stdio::piped(), OutputSink::Line)
            } else {
                (Stdio::null(), OutputSink::None)
            }
        }
        StreamSpec::File { path, append } => {
            let qualified = controller.join_path([path]);
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(*append)
                .truncate(!*append)
                .open(&qualified)
                .await
                .map_err(|err| FabError::io(&qualified, "open output", err))?;
            (Stdio::from(file.into_std().await), OutputSink::None)
        }
    };
    match which {
        Stream::Stdout => command.stdout(stdio),
        Stream::Stderr => command.stderr(stdio),
    };
    Ok(sink)
}

/// Dispatches a piped stream to its `OutputSink`: `Raw` copies bytes
/// straight into the named parent stream (the `$stdout`/`$stderr`
/// cross-wiring case), everything else drains line-by-line.
async fn pump<R>(reader: R, depth: usize, label: &'static str, echo: bool, capture: bool, sink: OutputSink) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match sink {
        OutputSink::Raw(target) => forward_raw(reader, target).await,
        OutputSink::Line | OutputSink::None => drain(reader, depth, label, echo, capture).await,
    }
}

/// Copies a piped stream's raw bytes straight into one of the parent
/// process's own streams, preserving partial lines and binary content that
/// line-based draining would mangle.
async fn forward_raw<R>(mut reader: R, target: ParentStream) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match target {
        ParentStream::Stdin => {}
        ParentStream::Stdout => {
            let _ = tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await;
        }
        ParentStream::Stderr => {
            let _ = tokio::io::copy(&mut reader, &mut tokio::io::stderr()).await;
        }
    }
    Vec::new()
}

/// Reads a piped stream to completion, optionally echoing each line
/// indented to the current nesting depth, optionally buffering the raw
/// bytes for inclusion in a `CommandError`.
async fn drain<R>(reader: R, depth: usize, label: &'static str, echo: bool, capture: bool) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut buf = Vec::new();
    let indent = "  ".repeat(depth + 1);
    while let Ok(Some(line)) = lines.next_line().await {
        if echo {
            tracing::info!("{indent}[{label}] {line}");
        }
        if capture {
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::controller::Controller;

    use super::*;

    #[tokio::test]
    async fn shell_command_runs_and_produces_a_file() {
        let dir = tempdir().unwrap();
        let controller = Controller::new(dir.path());
        let ctx = Ctx::new(None);

        let command = Command::new(CommandSpec::shell("touch out.txt")).unwrap();
        command.run(&ctx, &controller).await.unwrap();

        assert!(dir.path().join("out.txt").exists());
    }

    #[tokio::test]
    async fn nonzero_exit_becomes_a_command_error() {
        let dir = tempdir().unwrap();
        let controller = Controller::new(dir.path());
        let ctx = Ctx::new(None);

        let command = Command::new(CommandSpec::shell("exit 7")).unwrap();
        let err = command.run(&ctx, &controller).await.unwrap_err();
        match err {
            FabError::Command(command_error) => assert_eq!(command_error.status(), Some(7)),
            other => panic!("expected FabError::Command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dry_run_does_not_spawn_anything() {
        let dir = tempdir().unwrap();
        let controller = Controller::new(dir.path());
        let mut ctx = Ctx::new(None);
        ctx.dry_run = true;

        let command = Command::new(CommandSpec::shell("touch out.txt")).unwrap();
        command.run(&ctx, &controller).await.unwrap();

        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn stdout_and_stderr_to_the_same_file_with_conflicting_append_is_rejected() {
        let mut spec = CommandSpec::shell("true");
        spec.stdout = StreamSpec::File { path: "log.txt".into(), append: true };
        spec.stderr = StreamSpec::File { path: "log.txt".into(), append: false };
        assert!(Command::new(spec).is_err());
    }

    #[test]
    fn unknown_executable_is_rejected_at_construction() {
        let spec = CommandSpec::cmd("definitely-not-a-real-binary-xyz", vec![]);
        assert!(Command::new(spec).is_err());
    }

    #[tokio::test]
    async fn stdout_and_stderr_to_the_same_file_interleave_instead_of_clobbering() {
        let dir = tempdir().unwrap();
        let controller = Controller::new(dir.path());
        let ctx = Ctx::new(None);

        let mut spec = CommandSpec::shell("echo out-line; echo err-line 1>&2");
        spec.stdout = StreamSpec::File { path: "log.txt".into(), append: false };
        spec.stderr = StreamSpec::File { path: "log.txt".into(), append: false };
        let command = Command::new(spec).unwrap();
        command.run(&ctx, &controller).await.unwrap();

        let contents = tokio::fs::read_to_string(dir.path().join("log.txt")).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2, "one handle must be shared, not two independent truncating opens: {lines:?}");
    }

    #[tokio::test]
    async fn stdout_dollar_stderr_merges_into_the_parents_real_stderr() {
        let dir = tempdir().unwrap();
        let controller = Controller::new(dir.path());
        let ctx = Ctx::new(None);

        let mut spec = CommandSpec::shell("echo merged-to-stderr");
        spec.stdout = StreamSpec::Inherit(ParentStream::Stderr);
        let command = Command::new(spec).unwrap();
        command.run(&ctx, &controller).await.unwrap();
    }
}
