//! End-to-end scenarios (spec §8), run against a real temp project
//! directory and a real `SqliteHashDb` rather than any in-process fakes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fab::context::Ctx;
use fab::controller::Controller;
use fab::hashdb::{HashDb, SqliteHashDb};
use fab::target::{Command, CommandSpec, Files, Seq, F};
use tempfile::tempdir;

fn hashdb() -> Arc<dyn HashDb> {
    Arc::new(SqliteHashDb::in_memory(None, true).unwrap())
}

/// Scenario A: a `Files` target with no changed inputs or outputs since its
/// last accepted hash is a no-op on the second run.
#[test_log::test(tokio::test)]
async fn scenario_a_cached_no_op_skips_the_subject() {
    let dir = tempdir().unwrap();
    let controller = Controller::new(dir.path());
    let ctx = Ctx::new(Some(hashdb()));

    let sub = Command::new(CommandSpec::shell("echo run >> runs.txt && echo out > out.txt")).unwrap();
    let files = Files::new(&controller, sub, vec![], vec!["out.txt".to_string()], false).unwrap();

    files.run(&ctx, &controller).await.unwrap();
    files.run(&ctx, &controller).await.unwrap();

    let runs = tokio::fs::read_to_string(dir.path().join("runs.txt")).await.unwrap();
    assert_eq!(runs.lines().count(), 1, "second run must be a cache hit");
}

/// Scenario B: changing an input file's contents invalidates the cached
/// hash and forces a rebuild.
#[test_log::test(tokio::test)]
async fn scenario_b_content_change_triggers_rebuild() {
    let dir = tempdir().unwrap();
    let controller = Controller::new(dir.path());
    let ctx = Ctx::new(Some(hashdb()));

    tokio::fs::write(dir.path().join("in.txt"), b"v1").await.unwrap();
    let sub = Command::new(CommandSpec::shell(
        "echo run >> runs.txt && cp in.txt out.txt",
    ))
    .unwrap();
    let files = Files::new(
        &controller,
        sub,
        vec!["in.txt".to_string()],
        vec!["out.txt".to_string()],
        false,
    )
    .unwrap();

    files.run(&ctx, &controller).await.unwrap();
    tokio::fs::write(dir.path().join("in.txt"), b"v2").await.unwrap();
    files.run(&ctx, &controller).await.unwrap();

    let runs = tokio::fs::read_to_string(dir.path().join("runs.txt")).await.unwrap();
    assert_eq!(runs.lines().count(), 2, "changed input must force a rebuild");
}

/// Scenario C: a `Files` target whose input is produced by another
/// registered `Files` target runs its producer first.
#[test_log::test(tokio::test)]
async fn scenario_c_prerequisite_chaining_runs_the_producer_first() {
    let dir = tempdir().unwrap();
    let controller = Controller::new(dir.path());
    let ctx = Ctx::new(Some(hashdb()));

    let producer_sub = Command::new(CommandSpec::shell("echo produced > mid.txt")).unwrap();
    let producer = Files::new(
        &controller,
        producer_sub,
        vec![],
        vec!["mid.txt".to_string()],
        false,
    )
    .unwrap();

    let consumer_sub = Command::new(CommandSpec::shell("cp mid.txt final.txt")).unwrap();
    let consumer = Files::new(
        &controller,
        consumer_sub,
        vec!["mid.txt".to_string()],
        vec!["final.txt".to_string()],
        false,
    )
    .unwrap();

    // Only the consumer is run directly; the producer must still run first.
    let _ = producer;
    consumer.run(&ctx, &controller).await.unwrap();

    assert!(dir.path().join("final.txt").exists());
    let contents = tokio::fs::read_to_string(dir.path().join("final.txt")).await.unwrap();
    assert_eq!(contents.trim(), "produced");
}

/// Scenario D: `Seq` stops at the first failing child and never runs the
/// ones after it.
#[test_log::test(tokio::test)]
async fn scenario_d_seq_short_circuits_on_first_failure() {
    let dir = tempdir().unwrap();
    let controller = Controller::new(dir.path());
    let ctx = Ctx::new(None);

    let ran_third = Arc::new(AtomicUsize::new(0));
    let first = Command::new(CommandSpec::shell("true")).unwrap();
    let second = Command::new(CommandSpec::shell("exit 1")).unwrap();
    let third = {
        let ran_third = ran_third.clone();
        F::new("third", move |_, _| {
            let ran_third = ran_third.clone();
            Box::pin(async move {
                ran_third.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    };

    let seq = Seq::new(vec![first, second, third]);
    assert!(seq.run(&ctx, &controller).await.is_err());
    assert_eq!(ran_third.load(Ordering::SeqCst), 0);
}

/// Scenario E: 1000 concurrent schedulers of the same target id still
/// produce exactly one execution (spec §4.2's at-most-once guarantee,
/// stress-tested rather than just unit-tested).
#[test_log::test(tokio::test)]
async fn scenario_e_dedup_under_heavy_parallel_fan_in() {
    let dir = tempdir().unwrap();
    let controller = Controller::new(dir.path());
    let ctx = Ctx::new(None);

    let runs = Arc::new(AtomicUsize::new(0));
    let shared = {
        let runs = runs.clone();
        F::new("shared", move |_, _| {
            let runs = runs.clone();
            Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    };

    let targets: Vec<_> = std::iter::repeat(shared).take(1000).collect();
    controller.run(&ctx, &targets).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Scenario F: a YAML manifest round-trips through the loader into a
/// runnable target graph.
#[test_log::test(tokio::test)]
async fn scenario_f_yaml_manifest_round_trip() {
    let dir = tempdir().unwrap();
    let controller = Controller::new(dir.path());
    let ctx = Ctx::new(None);

    let manifest = r#"
# builds the greeting file
build: !Command
  shell: "echo hello > greeting.txt"

# depends on build, then checks the file exists
check: !Deps
  main: !Command
    shell: "test -f greeting.txt"
  prereqs:
    - build
"#;
    fab::yaml::load_str(manifest, &controller, controller.topdir()).unwrap();

    assert_eq!(controller.registry_names(), vec!["build".to_string(), "check".to_string()]);

    let check = controller.registry_target("check").unwrap();
    controller.run(&ctx, &[check]).await.unwrap();
    assert!(dir.path().join("greeting.txt").exists());
}
