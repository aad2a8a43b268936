// Command probe (subprocess adapter for ProbeExecutor)
// Spawns the tool with an allowlisted environment; cancellation terminates the child
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use probeweave_core::domain::{Payload, ProbeOutcome, ProbeParams};
use probeweave_core::port::{CancelToken, ExecutionError, ProbeExecutor};

/// How long a cancelled child gets between SIGTERM and SIGKILL (3s)
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Environment variables passed to tools by default
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "TERM", "TMPDIR"];

/// Param holding free-form extra arguments, split on whitespace
pub const EXTRA_ARGS_PARAM: &str = "extra_args";

/// Command line of one probe kind (`[probes.<kind>]` section).
///
/// Arguments may contain `{target}` and `{<param>}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Subprocess-backed probe
pub struct CommandProbe {
    spec: CommandSpec,
    env_allowlist: Vec<String>,
}

impl CommandProbe {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_env_allowlist(mut self, env_allowlist: Vec<String>) -> Self {
        self.env_allowlist = env_allowlist;
        self
    }

    /// Environment restricted to the allowlist
    fn filtered_env(&self) -> Vec<(String, String)> {
        std::env::vars()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .collect()
    }

    /// Expand placeholders into the final argument vector
    fn build_args(&self, target: &str, params: &ProbeParams) -> Result<Vec<String>, ExecutionError> {
        let mut args = Vec::with_capacity(self.spec.args.len());
        for template in &self.spec.args {
            let mut arg = template.replace("{target}", target);
            for (key, value) in params {
                let placeholder = format!("{{{}}}", key);
                if arg.contains(&placeholder) {
                    arg = arg.replace(&placeholder, &param_text(value));
                }
            }
            if is_placeholder(&arg) {
                return Err(ExecutionError::InvalidParams(format!(
                    "missing parameter for {}",
                    arg
                )));
            }
            args.push(arg);
        }

        if let Some(extra) = params.get(EXTRA_ARGS_PARAM) {
            args.extend(param_text(extra).split_whitespace().map(str::to_string));
        }
        Ok(args)
    }

    fn spawn(&self, args: &[String]) -> Result<Child, ExecutionError> {
        Command::new(&self.spec.command)
            .args(args)
            .env_clear()
            .envs(self.filtered_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExecutionError::ToolNotFound(format!(
                    "{}: command not found",
                    self.spec.command
                )),
                std::io::ErrorKind::PermissionDenied => ExecutionError::SpawnFailed(format!(
                    "{}: permission denied",
                    self.spec.command
                )),
                _ => ExecutionError::SpawnFailed(e.to_string()),
            })
    }

    fn build_outcome(
        &self,
        args: &[String],
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    ) -> ProbeOutcome {
        let mut payload = Payload::new();
        payload.insert("command".into(), serde_json::json!(self.command_line(args)));
        payload.insert("exit_code".into(), serde_json::json!(exit_code));
        payload.insert("duration_ms".into(), serde_json::json!(elapsed.as_millis() as u64));
        payload.insert("stdout".into(), serde_json::json!(stdout));

        if exit_code == Some(0) {
            if !stderr.is_empty() {
                payload.insert("stderr".into(), serde_json::json!(stderr));
            }
            return ProbeOutcome::success(payload);
        }

        let status = exit_code.map_or_else(|| "a signal".to_string(), |c| c.to_string());
        let mut outcome = ProbeOutcome::failure(format!(
            "{} exited with status {}",
            self.spec.command, status
        ));
        outcome.payload = payload;
        if !stderr.is_empty() {
            outcome.stderr = Some(stderr);
        }
        outcome
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.spec.command.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl ProbeExecutor for CommandProbe {
    async fn execute(
        &self,
        target: &str,
        params: &ProbeParams,
        cancel: &CancelToken,
    ) -> Result<ProbeOutcome, ExecutionError> {
        validate_target(target)?;
        let args = self.build_args(target, params)?;

        info!(
            command = %self.spec.command,
            args = ?args,
            "Starting probe subprocess"
        );
        let started = Instant::now();
        let mut child = self.spawn(&args)?;
        let stdout = collect(child.stdout.take());
        let stderr = collect(child.stderr.take());

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| ExecutionError::IoError(e.to_string()))?,
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                stdout.abort();
                stderr.abort();
                return Err(ExecutionError::Cancelled);
            }
        };

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();
        let elapsed = started.elapsed();

        info!(
            command = %self.spec.command,
            duration_ms = elapsed.as_millis() as u64,
            exit_code = ?status.code(),
            "Probe subprocess completed"
        );
        Ok(self.build_outcome(&args, status.code(), stdout, stderr, elapsed))
    }
}

/// Targets must not be empty or look like an option
fn validate_target(target: &str) -> Result<(), ExecutionError> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(ExecutionError::InvalidTarget("empty target".to_string()));
    }
    if trimmed.starts_with('-') {
        return Err(ExecutionError::InvalidTarget(format!(
            "target looks like an option: {}",
            trimmed
        )));
    }
    Ok(())
}

fn param_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_placeholder(arg: &str) -> bool {
    arg.len() > 2
        && arg.starts_with('{')
        && arg.ends_with('}')
        && arg[1..arg.len() - 1]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn collect<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// SIGTERM first, then SIGKILL if the child outlives the grace period
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            info!(pid, "Sending SIGTERM to cancelled probe");
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
            warn!(pid, "Probe did not exit after SIGTERM, sending SIGKILL");
        }
    }

    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill probe subprocess");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probeweave_core::port::cancel_pair;
    use serde_json::json;

    fn sh(script: &str) -> CommandProbe {
        CommandProbe::new(CommandSpec::new("sh", ["-c", script, "probe", "{target}"]))
    }

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let probe = sh("echo scanning $1");
        let outcome = tokio_test::assert_ok!(
            probe
                .execute("example.com", &ProbeParams::new(), &CancelToken::never())
                .await
        );

        assert!(outcome.success);
        assert_eq!(outcome.payload["stdout"], json!("scanning example.com\n"));
        assert_eq!(outcome.payload["exit_code"], json!(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_outcome() {
        let probe = sh("echo 'connect: Connection refused' >&2; exit 3");
        let outcome = probe
            .execute("h", &ProbeParams::new(), &CancelToken::never())
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("sh exited with status 3"));
        assert!(outcome.stderr.unwrap().contains("Connection refused"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_not_found() {
        let probe = CommandProbe::new(CommandSpec::new("definitely-not-a-real-tool-xyz", ["{target}"]));
        let result = probe
            .execute("h", &ProbeParams::new(), &CancelToken::never())
            .await;
        assert!(matches!(result, Err(ExecutionError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_option_like_target_rejected() {
        let probe = sh("true");
        let result = probe
            .execute("--script=evil", &ProbeParams::new(), &CancelToken::never())
            .await;
        assert!(matches!(result, Err(ExecutionError::InvalidTarget(_))));
    }

    #[test]
    fn test_build_args_substitutes_params() {
        let probe = CommandProbe::new(CommandSpec::new(
            "nmap",
            ["-p", "{ports}", "--max-rate={rate}", "{target}"],
        ));
        let mut params = ProbeParams::new();
        params.insert("ports".into(), json!("22,80"));
        params.insert("rate".into(), json!(100));
        params.insert(EXTRA_ARGS_PARAM.into(), json!("-sV  -Pn"));

        let args = probe.build_args("10.0.0.1", &params).unwrap();
        assert_eq!(
            args,
            vec!["-p", "22,80", "--max-rate=100", "10.0.0.1", "-sV", "-Pn"]
        );
    }

    #[test]
    fn test_unresolved_placeholder_rejected() {
        let probe = CommandProbe::new(CommandSpec::new("nmap", ["-p", "{ports}"]));
        let result = probe.build_args("h", &ProbeParams::new());
        assert!(matches!(result, Err(ExecutionError::InvalidParams(_))));
    }

    #[tokio::test]
    async fn test_env_is_filtered() {
        std::env::set_var("PROBEWEAVE_TEST_SECRET", "hunter2");
        let probe = sh("echo \"[$PROBEWEAVE_TEST_SECRET]\"");
        let outcome = probe
            .execute("h", &ProbeParams::new(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(outcome.payload["stdout"], json!("[]\n"));
    }

    #[tokio::test]
    async fn test_cancel_terminates_child() {
        let probe = sh("sleep 30");
        let (handle, token) = cancel_pair();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        let started = Instant::now();
        let result = probe.execute("h", &ProbeParams::new(), &token).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(ExecutionError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
