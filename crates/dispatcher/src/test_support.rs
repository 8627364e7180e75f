//! Helpers shared by the unit tests: shell-script worker children and
//! polling waits.

use std::time::{Duration, Instant};

use crate::pool::WorkerCommand;

/// Replies `finished` to every job line it reads.
pub const ECHO_WORKER: &str = r#"while read -r job; do
  id=$(printf '%s' "$job" | sed 's/.*"job_id":"\([^"]*\)".*/\1/')
  printf '{"type":"finished","job_id":"%s"}\n' "$id"
done"#;

pub fn shell_worker(script: &str) -> WorkerCommand {
    WorkerCommand::new("/bin/sh").arg("-c").arg(script)
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn process_alive(pid: u32) -> bool {
    // Signal 0 only checks that the process exists.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
