//! Subprocess Executor Integration Tests
//!
//! Runs real child processes through `SubprocessExecutor`:
//! - Output far larger than a pipe buffer does not deadlock
//! - Hung processes are killed at the timeout
//! - stdin reaches the child and the pipe is closed afterwards
//! - Non-zero exits surface their code

use std::path::Path;
use std::time::{Duration, Instant};

use chronicle_desktop::services::analysis::{AnalysisError, SubprocessExecutor};

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

#[tokio::test]
async fn test_large_output_is_drained_without_deadlock() {
    let executor = SubprocessExecutor::new(Duration::from_secs(20));
    let output = executor
        .run(Path::new("/bin/sh"), &sh("head -c 1500000 /dev/zero"), "")
        .await
        .unwrap();
    assert_eq!(output.stdout.len(), 1_500_000);
    assert_eq!(output.exit_code, Some(0));
}

#[tokio::test]
async fn test_large_stderr_and_stdout_together() {
    let executor = SubprocessExecutor::new(Duration::from_secs(20));
    let output = executor
        .run(
            Path::new("/bin/sh"),
            &sh("head -c 300000 /dev/zero >&2; head -c 300000 /dev/zero"),
            "",
        )
        .await
        .unwrap();
    assert_eq!(output.stdout.len(), 300_000);
    assert_eq!(output.stderr.len(), 300_000);
}

const TIMEOUT: Duration = Duration::from_millis(300);
const GRACE: Duration = Duration::from_millis(400);
// scheduling jitter on a loaded machine
const SLACK: Duration = Duration::from_millis(300);

fn hung_executor() -> SubprocessExecutor {
    SubprocessExecutor::new(TIMEOUT).with_grace(GRACE)
}

/// Whether `pid` is still a live (non-zombie) process
#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // state is the first field after the parenthesised command name
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_hung_process_is_killed_at_timeout() {
    let started = Instant::now();
    let err = hung_executor()
        .run(Path::new("/bin/sh"), &sh("sleep 30"), "")
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Timeout(_)));
    assert!(
        started.elapsed() < TIMEOUT + GRACE + SLACK,
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_term_ignoring_process_group_is_force_killed() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("grandchild.pid");
    let script = format!(
        "trap '' TERM; sleep 30 & echo $! > '{}'; wait; echo done",
        pid_file.display()
    );

    let started = Instant::now();
    let err = hung_executor()
        .run(Path::new("/bin/sh"), &sh(&script), "")
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, AnalysisError::Timeout(_)));
    assert!(elapsed < TIMEOUT + GRACE + SLACK, "took {:?}", elapsed);

    #[cfg(target_os = "linux")]
    {
        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // SIGKILL is delivered asynchronously; give the kernel a moment
        let mut alive = is_running(pid);
        for _ in 0..20 {
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
            alive = is_running(pid);
        }
        assert!(!alive, "grandchild {} survived the timeout", pid);
    }
}

#[tokio::test]
async fn test_stdin_reaches_child_and_is_closed() {
    let executor = SubprocessExecutor::new(Duration::from_secs(10));
    let output = executor
        .run(Path::new("/bin/cat"), &[], "analyze these conversations")
        .await
        .unwrap();
    assert_eq!(output.stdout, "analyze these conversations");
}

#[tokio::test]
async fn test_non_zero_exit_reports_code_and_stderr() {
    let executor = SubprocessExecutor::new(Duration::from_secs(10));
    let err = executor
        .run(Path::new("/bin/sh"), &sh("echo 'unknown flag' >&2; exit 3"), "")
        .await
        .unwrap_err();

    match err {
        AnalysisError::NonZeroExit { code, stderr } => {
            assert_eq!(code, Some(3));
            assert!(stderr.contains("unknown flag"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let executor = SubprocessExecutor::new(Duration::from_secs(10)).with_working_dir(dir.path());
    let output = executor
        .run(Path::new("/bin/sh"), &sh("pwd"), "")
        .await
        .unwrap();
    let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
    assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
}
