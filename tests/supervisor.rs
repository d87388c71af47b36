#![cfg(unix)]

use cp2k_dash::model::{Field, RunStatus};
use cp2k_dash::state::{load_snapshot, RunMeta, RunState};
use cp2k_dash::supervisor::{run_supervised, LaunchPlan, SuperviseOptions};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn fake_cp2k(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-cp2k");
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn plan(dir: &Path, binary: PathBuf) -> LaunchPlan {
    let input = dir.join("water.inp");
    fs::write(&input, "&GLOBAL\n&END GLOBAL\n").unwrap();
    LaunchPlan {
        binary,
        input,
        project: "water".into(),
        logfile: dir.join("water.out"),
        mode: Some("md".into()),
        profile: None,
    }
}

fn state_for(plan: &LaunchPlan, state_file: Option<PathBuf>) -> Arc<RunState> {
    Arc::new(
        RunState::new(RunMeta {
            project: plan.project.clone(),
            logfile: plan.logfile.clone(),
            input_path: Some(plan.input.clone()),
            ..RunMeta::default()
        })
        .with_state_file(state_file)
        .with_persist_interval(Duration::from_millis(10)),
    )
}

fn opts() -> SuperviseOptions {
    SuperviseOptions {
        echo: false,
        poll_interval: Duration::from_millis(20),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tees_output_and_parses_steps() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_cp2k(
        dir.path(),
        r#"echo "input=$2 project=$PROJECT"
echo " MD| Step number 12"
echo " MD| Potential energy [hartree] -10.5 -10.4"
echo " MD| Kinetic energy [hartree] 0.02 0.021"
echo " MD| ***"
echo "warning on stderr" >&2
echo " MD| Step number 13"
exit 3
"#,
    );
    let plan = plan(dir.path(), binary);
    let state_file = dir.path().join("water.state.json");
    let state = state_for(&plan, Some(state_file.clone()));

    let outcome = run_supervised(plan.clone(), state.clone(), opts())
        .await
        .unwrap();
    assert_eq!(outcome.return_code, 3);
    assert!(!outcome.interrupted);

    let snap = state.snapshot();
    assert_eq!(snap.status, Some(RunStatus::Failed(3)));
    assert_eq!(snap.return_code, Some(3));
    assert!(snap.pid.is_some());
    // The unterminated step 13 is never flushed in live mode.
    assert_eq!(snap.blocks.len(), 1);
    let rec = &snap.blocks[0];
    assert_eq!(rec.step, 12);
    assert!((rec.get(Field::TotalEnergy).unwrap() - -10.48).abs() < 1e-9);
    assert!((rec.get(Field::TotalEnergyAvg).unwrap() - -10.379).abs() < 1e-9);
    assert!(snap.tail.iter().any(|l| l == "warning on stderr"));

    let log = fs::read_to_string(&plan.logfile).unwrap();
    assert!(log.contains("project=water"));
    assert!(log.contains(&format!("input={}", plan.input.display())));
    assert!(log.contains("warning on stderr"));

    let persisted = load_snapshot(&state_file).unwrap();
    assert_eq!(persisted.status, Some(RunStatus::Failed(3)));
    assert_eq!(persisted.blocks.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_sends_a_single_interrupt() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_cp2k(
        dir.path(),
        r#"trap 'echo interrupted; exit 7' INT
echo ready
i=0
while [ $i -lt 400 ]; do sleep 0.05; i=$((i+1)); done
exit 0
"#,
    );
    let plan = plan(dir.path(), binary);
    let state = state_for(&plan, None);
    let task = tokio::spawn(run_supervised(plan, state.clone(), opts()));

    tokio::time::timeout(Duration::from_secs(10), async {
        while !state.snapshot().tail.iter().any(|l| l == "ready") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(state.request_cancel());
    assert!(!state.request_cancel());
    let outcome = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(outcome.interrupted);
    assert_eq!(outcome.return_code, 7);
    let snap = state.snapshot();
    assert_eq!(snap.status, Some(RunStatus::Failed(7)));
    let interrupts = snap.tail.iter().filter(|l| *l == "interrupted").count();
    assert_eq!(interrupts, 1);
}

#[tokio::test]
async fn spawn_failure_finalizes_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan(dir.path(), dir.path().join("does-not-exist"));
    let state = state_for(&plan, None);
    let err = run_supervised(plan, state.clone(), opts()).await;
    assert!(err.is_err());
    assert!(state.is_done());
    assert_eq!(state.snapshot().status, Some(RunStatus::Failed(1)));
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn log_write_failure_fails_a_clean_exit() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_cp2k(
        dir.path(),
        r#"echo " MD| Step number 1"
echo " MD| Temperature [K] 300 300"
echo " MD| ***"
exit 0
"#,
    );
    let mut plan = plan(dir.path(), binary);
    // Every write to /dev/full fails with ENOSPC.
    plan.logfile = PathBuf::from("/dev/full");
    let state = state_for(&plan, None);

    let outcome = run_supervised(plan, state.clone(), opts()).await.unwrap();
    assert_eq!(outcome.return_code, 1);

    let snap = state.snapshot();
    assert_eq!(snap.status, Some(RunStatus::Failed(1)));
    assert_eq!(snap.return_code, Some(1));
    // Draining continued past the failure.
    assert_eq!(snap.blocks.len(), 1);
    assert!(snap.tail.iter().any(|l| l == " MD| ***"));
    let last = snap.tail.last().unwrap();
    assert!(last.starts_with("<reader error:"), "{last}");
}
