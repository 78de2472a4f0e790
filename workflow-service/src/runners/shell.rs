// Shell Runner
// Executes `run:` steps with sh, bash, pwsh or powershell

use super::{OutputCallback, Runner, RunnerOutput, StepAction, StepRequest};

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// Default shell (sh on Unix, cmd on Windows)
    Default,
    /// Bash shell
    Bash,
    /// PowerShell Core (cross-platform)
    Pwsh,
    /// Windows PowerShell (Windows only, falls back to pwsh)
    PowerShell,
}

impl Shell {
    /// Parse a `shell:` value
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "sh" => Some(Shell::Default),
            "bash" => Some(Shell::Bash),
            "pwsh" => Some(Shell::Pwsh),
            "powershell" => Some(Shell::PowerShell),
            _ => None,
        }
    }

    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if cfg!(target_os = "windows") {
                    ("cmd", &["/C"])
                } else {
                    ("sh", &["-c"])
                }
            }
            // Same as GitHub's bash template: stop on the first failing command
            Shell::Bash => ("bash", &["--noprofile", "--norc", "-eo", "pipefail", "-c"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-Command"]),
            Shell::PowerShell => {
                if cfg!(target_os = "windows") {
                    ("powershell.exe", &["-NoLogo", "-NoProfile", "-Command"])
                } else {
                    // Fall back to pwsh on non-Windows
                    ("pwsh", &["-NoLogo", "-NoProfile", "-Command"])
                }
            }
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shell::Default => "sh",
            Shell::Bash => "bash",
            Shell::Pwsh => "pwsh",
            Shell::PowerShell => "powershell",
        };
        f.write_str(name)
    }
}

/// Shell runner for executing scripts
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    /// Execute a script with a specific shell.
    ///
    /// The child is killed when the timeout elapses or when the returned
    /// future is dropped.
    pub async fn run_with_shell(
        &self,
        shell: Shell,
        script: &str,
        env: &HashMap<String, String>,
        working_dir: &Path,
        timeout: Option<Duration>,
        on_output: Option<OutputCallback>,
    ) -> RunnerOutput {
        let (shell_cmd, shell_args) = shell.get_command();

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(script);
        cmd.current_dir(working_dir);
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        // Spawn the process
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RunnerOutput::failure(format!(
                    "Failed to spawn shell process '{}': {}",
                    shell_cmd, e
                ));
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill().await;
            return RunnerOutput::failure("shell process output was not captured");
        };

        // Read output streams concurrently
        let stdout_handle = collect_lines(stdout, on_output.clone(), false);
        let stderr_handle = collect_lines(stderr, on_output, true);

        // Wait for completion with optional timeout
        let wait_result = if let Some(timeout) = timeout {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    // Timeout - kill the process
                    let _ = child.kill().await;
                    let stdout = drain(stdout_handle).await;
                    let mut stderr = drain(stderr_handle).await;
                    if !stderr.is_empty() {
                        stderr.push('\n');
                    }
                    stderr.push_str(&format!("Process timed out after {:?}", timeout));
                    return RunnerOutput {
                        stdout,
                        stderr,
                        exit_code: None,
                        timed_out: true,
                    };
                }
            }
        } else {
            child.wait().await
        };

        let exit_code = wait_result.ok().and_then(|s| s.code());
        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        RunnerOutput {
            stdout,
            stderr,
            exit_code,
            timed_out: false,
        }
    }
}

#[async_trait::async_trait]
impl Runner for ShellRunner {
    async fn execute(&self, request: StepRequest<'_>) -> RunnerOutput {
        match request.action {
            StepAction::RunCommand { command, shell } => {
                self.run_with_shell(
                    *shell,
                    command,
                    request.env,
                    request.working_dir,
                    request.timeout,
                    request.on_output.clone(),
                )
                .await
            }
            StepAction::InvokeAction { reference, .. } => {
                RunnerOutput::failure(format!("shell runner cannot invoke action '{}'", reference))
            }
        }
    }
}

/// Grandchildren of a killed shell may keep its pipes open
const DRAIN_GRACE: Duration = Duration::from_millis(500);

async fn drain(handle: JoinHandle<String>) -> String {
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(output)) => output,
        _ => String::new(),
    }
}

/// Collect a stream line by line, forwarding each line to the callback
fn collect_lines<R>(
    reader: R,
    on_output: Option<OutputCallback>,
    is_error: bool,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut output = String::new();
        // Invalid UTF-8 is replaced per line; the pipe is read until EOF
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            let line = String::from_utf8_lossy(&buf).into_owned();
            if let Some(callback) = &on_output {
                callback(&line, is_error);
            }
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&line);
        }
        output
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    fn run(command: &str) -> StepAction {
        StepAction::RunCommand {
            command: command.to_string(),
            shell: Shell::Default,
        }
    }

    #[test]
    fn test_parse_shell() {
        assert_eq!(Shell::parse("bash"), Some(Shell::Bash));
        assert_eq!(Shell::parse("sh"), Some(Shell::Default));
        assert_eq!(Shell::parse("pwsh"), Some(Shell::Pwsh));
        assert_eq!(Shell::parse("fish"), None);
    }

    #[tokio::test]
    async fn test_simple_script() {
        let dir = tempfile::tempdir().unwrap();
        let action = run("echo hello");
        let env = HashMap::new();

        let output = ShellRunner::new()
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: dir.path(),
                timeout: None,
                on_output: None,
            })
            .await;

        assert!(output.success());
        assert_eq!(output.stdout, "hello");
    }

    #[tokio::test]
    async fn test_script_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let action = run("echo \"$GREETING, $TARGET\"");
        let env = HashMap::from([
            ("GREETING".to_string(), "hi".to_string()),
            ("TARGET".to_string(), "there".to_string()),
        ]);

        let output = ShellRunner::new()
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: dir.path(),
                timeout: None,
                on_output: None,
            })
            .await;

        assert_eq!(output.stdout, "hi, there");
    }

    #[tokio::test]
    async fn test_failing_script() {
        let dir = tempfile::tempdir().unwrap();
        let action = run("echo oops >&2; exit 3");
        let env = HashMap::new();

        let output = ShellRunner::new()
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: dir.path(),
                timeout: None,
                on_output: None,
            })
            .await;

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "oops");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let action = run("sleep 5");
        let env = HashMap::new();

        let output = ShellRunner::new()
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: dir.path(),
                timeout: Some(Duration::from_millis(100)),
                on_output: None,
            })
            .await;

        assert!(output.timed_out);
        assert!(!output.success());
        assert!(output.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_streaming_callback() {
        let dir = tempfile::tempdir().unwrap();
        let action = run("echo one; echo two >&2; echo three");
        let env = HashMap::new();
        let lines: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();

        let output = ShellRunner::new()
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: dir.path(),
                timeout: None,
                on_output: Some(Arc::new(move |line: &str, is_error: bool| {
                    sink.lock().unwrap().push((line.to_string(), is_error));
                })),
            })
            .await;

        assert!(output.success());
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&("two".to_string(), true)));
        assert!(lines.contains(&("three".to_string(), false)));
    }

    #[tokio::test]
    async fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "present").unwrap();
        let action = run("cat marker.txt");
        let env = HashMap::new();

        let output = ShellRunner::new()
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: dir.path(),
                timeout: None,
                on_output: None,
            })
            .await;

        assert_eq!(output.stdout, "present");
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_stop_reading() {
        let dir = tempfile::tempdir().unwrap();
        let action = run("printf 'first\\n\\377\\nlast\\n'");
        let env = HashMap::new();

        let output = ShellRunner::new()
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: dir.path(),
                timeout: None,
                on_output: None,
            })
            .await;

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.starts_with("first"));
        assert!(output.stdout.contains('\u{FFFD}'));
        assert!(output.stdout.ends_with("last"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_before_large_output() {
        let dir = tempfile::tempdir().unwrap();
        let action = run("printf '\\377\\n'; head -c 200000 /dev/zero | tr '\\0' a; echo done");
        let env = HashMap::new();

        let output = ShellRunner::new()
            .execute(StepRequest {
                action: &action,
                env: &env,
                working_dir: dir.path(),
                timeout: Some(Duration::from_secs(30)),
                on_output: None,
            })
            .await;

        assert_eq!(output.exit_code, Some(0));
        assert!(!output.timed_out);
        assert!(output.stdout.ends_with("done"));
        assert!(output.stdout.len() > 200000);
    }
}
