use crate::input::Input;
use std::borrow::Cow;
use std::fs;
use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Placeholder in a file-delivery argument template that is replaced by the input path.
pub const INPUT_PATH_PLACEHOLDER: &str = "{input}";
/// NUL bytes cannot travel through the target's command line interface; they are swapped for this.
const NUL_REPLACEMENT: u8 = b'_';
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of running the target on one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    /// The target exited normally with a non-zero code, e.g. after rejecting malformed SQL.
    Exited(i32),
    Timeout,
    /// Killed by a signal, or a panic in an in-process harness.
    Crash(String),
    /// The target could not be run at all.
    Other(String),
}

/// Runs the target program on a single input.
pub trait Executor<I: Input> {
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus;
}

/// Calls a Rust closure directly; panics are reported as crashes.
pub struct InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    harness_fn: F,
}

impl<F> InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    pub fn new(harness_fn: F) -> Self {
        Self { harness_fn }
    }
}

impl<I: Input, F> Executor<I> for InProcessExecutor<F>
where
    F: Fn(&[u8]),
{
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus {
        let result = catch_unwind(AssertUnwindSafe(|| {
            (self.harness_fn)(input.as_bytes());
        }));

        match result {
            Ok(()) => ExecutionStatus::Ok,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionStatus::Crash(msg)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDelivery {
    /// Pipe the input into the target's standard input.
    StdIn,
    /// Write the input to a temporary file and pass its path as an argument.
    /// Every `{input}` in the template is replaced by the path; the result is
    /// split on whitespace into separate arguments.
    File(String),
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    /// Deleted before every run so each input starts from an empty database.
    pub reset_file: Option<PathBuf>,
}

/// Spawns the target as a child process for every input.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandExecutorConfig {
        &self.config
    }

    fn reset_target_state(&self) -> Result<(), ExecutionStatus> {
        let Some(path) = &self.config.reset_file else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExecutionStatus::Other(format!(
                "Failed to remove {path:?} before run: {e}"
            ))),
        }
    }

    fn run_and_wait_with_timeout(
        &self,
        mut child: Child,
        timeout: Duration,
    ) -> Result<ExitStatus, ExecutionStatus> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        debug!(?timeout, "target timed out, killing");
                        if let Err(e) = child.kill() {
                            return Err(ExecutionStatus::Other(format!(
                                "Failed to kill timed-out process: {e}",
                            )));
                        }
                        let _ = child.wait();
                        return Err(ExecutionStatus::Timeout);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(ExecutionStatus::Other(format!(
                        "Error waiting for child: {e}",
                    )));
                }
            }
        }
    }
}

/// Replaces NUL bytes, borrowing when there are none.
pub fn replace_nul_bytes(bytes: &[u8]) -> Cow<'_, [u8]> {
    if bytes.contains(&0) {
        Cow::Owned(
            bytes
                .iter()
                .map(|&b| if b == 0 { NUL_REPLACEMENT } else { b })
                .collect(),
        )
    } else {
        Cow::Borrowed(bytes)
    }
}

fn describe_exit(status: ExitStatus) -> ExecutionStatus {
    if status.success() {
        return ExecutionStatus::Ok;
    }
    if let Some(code) = status.code() {
        return ExecutionStatus::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExecutionStatus::Crash(format!("Terminated by signal {signal}"));
        }
    }
    ExecutionStatus::Crash("Exited abnormally".to_string())
}

impl<I: Input> Executor<I> for CommandExecutor {
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus {
        let Some((program, args)) = self.config.command.split_first() else {
            return ExecutionStatus::Other("Target command is empty".to_string());
        };
        if let Err(status) = self.reset_target_state() {
            return status;
        }

        let payload = replace_nul_bytes(input.as_bytes());

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        // Own process group, so a Ctrl-C at the terminal stops the campaign and not the target.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut temp_file_handle: Option<tempfile::NamedTempFile> = None;

        match &self.config.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let mut named_temp_file = match tempfile::NamedTempFile::new() {
                    Ok(f) => f,
                    Err(e) => {
                        return ExecutionStatus::Other(format!("Failed to create temp file: {e}"));
                    }
                };
                if let Err(e) = named_temp_file
                    .write_all(&payload)
                    .and_then(|()| named_temp_file.flush())
                {
                    return ExecutionStatus::Other(format!(
                        "Failed to write to temp file {:?}: {}",
                        named_temp_file.path(),
                        e
                    ));
                }

                let Some(path_str) = named_temp_file.path().to_str() else {
                    return ExecutionStatus::Other(
                        "Temp file path is not valid UTF-8".to_string(),
                    );
                };
                let final_arg = arg_template.replace(INPUT_PATH_PLACEHOLDER, path_str);
                cmd.args(final_arg.split_whitespace());
                cmd.stdin(Stdio::null());
                temp_file_handle = Some(named_temp_file);
            }
        }

        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let mut child_process = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let error_msg =
                    format!("Failed to spawn command '{:?}': {}", self.config.command, e);
                warn!("{error_msg}");
                return ExecutionStatus::Other(error_msg);
            }
        };

        // Stdin is fed from its own thread so a target that never reads cannot stall
        // the timeout loop. Killing the child closes the pipe and releases the writer.
        let stdin_writer = match self.config.input_delivery {
            InputDelivery::StdIn => {
                let Some(mut child_stdin) = child_process.stdin.take() else {
                    let _ = child_process.kill();
                    let _ = child_process.wait();
                    return ExecutionStatus::Other(
                        "Child stdin was not available after piping.".to_string(),
                    );
                };
                let payload = payload.into_owned();
                Some(thread::spawn(move || child_stdin.write_all(&payload)))
            }
            InputDelivery::File(_) => None,
        };

        let status = match self.run_and_wait_with_timeout(child_process, self.config.timeout) {
            Ok(exit_status) => describe_exit(exit_status),
            Err(status) => status,
        };

        if let Some(writer) = stdin_writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // A target that exits or is killed before reading all of stdin closes
                // the pipe; that is its own outcome, not a delivery failure.
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(_)) if status == ExecutionStatus::Timeout => {}
                Ok(Err(e)) => {
                    return ExecutionStatus::Other(format!("Failed to write to stdin: {e}"));
                }
                Err(_) => {
                    return ExecutionStatus::Other("Stdin writer thread panicked".to_string());
                }
            }
        }

        drop(temp_file_handle);
        status
    }
}

#[cfg(test)]
mod in_process_executor_tests {
    use super::*;

    fn simple_harness(data: &[u8]) {
        let _ = data;
    }

    fn panicking_harness(data: &[u8]) {
        if data.starts_with(b"BAD") {
            panic!("Boom!");
        }
    }

    #[test]
    fn in_process_executor_runs_harness() {
        let mut executor = InProcessExecutor::new(simple_harness);
        let input_data = "SELECT 1;".to_string();
        let status = executor.execute_sync(&input_data);
        assert_eq!(status, ExecutionStatus::Ok);
    }

    #[test]
    fn in_process_executor_catches_panic() {
        let mut executor = InProcessExecutor::new(panicking_harness);
        let crashing_input = "BAD INPUT".to_string();
        let status = executor.execute_sync(&crashing_input);
        match status {
            ExecutionStatus::Crash(msg) => assert!(msg.contains("Boom!")),
            _ => panic!("Expected a crash, got {status:?}"),
        }
    }

    #[test]
    fn in_process_executor_accepts_strings() {
        let mut executor = InProcessExecutor::new(|data: &[u8]| {
            if data.starts_with(b"DROP") {
                panic!("{}", String::from_utf8_lossy(data));
            }
        });
        assert_eq!(
            executor.execute_sync(&"SELECT 1;".to_string()),
            ExecutionStatus::Ok
        );
        assert_eq!(
            executor.execute_sync(&"DROP TABLE t;".to_string()),
            ExecutionStatus::Crash("DROP TABLE t;".to_string())
        );
    }

    #[test]
    fn replace_nul_bytes_only_allocates_when_needed() {
        assert!(matches!(replace_nul_bytes(b"abc"), Cow::Borrowed(_)));
        assert_eq!(replace_nul_bytes(b"a\0b\0").as_ref(), b"a_b_");
    }
}
