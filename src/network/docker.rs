use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::process::Command;

use crate::constants::COMMAND_TIMEOUT_SECS;
use crate::utils::RuntimeError;

/// Container runtime operations needed to observe and repair networking
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn is_running(&self, service: &str) -> Result<bool, RuntimeError>;

    /// Names of the containers attached to `network`
    async fn network_members(&self, network: &str) -> Result<BTreeSet<String>, RuntimeError>;

    /// Resolve `host` from inside `from`; returns the resolver output
    async fn resolve(&self, from: &str, host: &str, timeout_ms: u64)
        -> Result<String, RuntimeError>;

    /// Open a TCP connection to `host:port` from inside `from`
    async fn tcp_connect(
        &self,
        from: &str,
        host: &str,
        port: u16,
        timeout_ms: u64,
    ) -> Result<(), RuntimeError>;

    async fn connect_network(&self, network: &str, service: &str) -> Result<(), RuntimeError>;
}

/// Check if a command is available on the system
fn is_command_available(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Find the container runtime binary, preferring Docker over Podman
pub fn detect_runtime_binary() -> Option<&'static str> {
    if is_command_available("docker") {
        Some("docker")
    } else if is_command_available("podman") {
        Some("podman")
    } else {
        None
    }
}

/// `docker`/`podman` CLI backed runtime
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new(binary: Option<&str>) -> Result<Self, RuntimeError> {
        let binary = match binary {
            Some(b) => b.to_string(),
            None => detect_runtime_binary()
                .ok_or(RuntimeError::NotInstalled)?
                .to_string(),
        };
        Ok(Self { binary })
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<String, RuntimeError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        tracing::debug!(%command, "running container command");

        let child = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(result) => result.map_err(|e| RuntimeError::Io(e.to_string()))?,
            Err(_) => return Err(RuntimeError::Timeout { command }),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Err(RuntimeError::CommandFailed {
                command,
                stderr: if stderr.is_empty() { stdout } else { stderr },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(COMMAND_TIMEOUT_SECS)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn is_running(&self, service: &str) -> Result<bool, RuntimeError> {
        match self
            .run(&["inspect", "-f", "{{.State.Running}}", service], default_timeout())
            .await
        {
            Ok(out) => Ok(out == "true"),
            // A container that does not exist is simply not running
            Err(RuntimeError::CommandFailed { stderr, .. })
                if stderr.to_lowercase().contains("no such") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn network_members(&self, network: &str) -> Result<BTreeSet<String>, RuntimeError> {
        let out = self
            .run(
                &[
                    "network",
                    "inspect",
                    network,
                    "-f",
                    "{{range .Containers}}{{.Name}} {{end}}",
                ],
                default_timeout(),
            )
            .await?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }

    async fn resolve(
        &self,
        from: &str,
        host: &str,
        timeout_ms: u64,
    ) -> Result<String, RuntimeError> {
        self.run(
            &["exec", from, "getent", "hosts", host],
            Duration::from_millis(timeout_ms),
        )
        .await
    }

    async fn tcp_connect(
        &self,
        from: &str,
        host: &str,
        port: u16,
        timeout_ms: u64,
    ) -> Result<(), RuntimeError> {
        let port = port.to_string();
        let wait_secs = (timeout_ms / 1000).max(1).to_string();
        self.run(
            &["exec", from, "nc", "-z", "-w", &wait_secs, host, &port],
            Duration::from_millis(timeout_ms + 1000),
        )
        .await
        .map(|_| ())
    }

    async fn connect_network(&self, network: &str, service: &str) -> Result<(), RuntimeError> {
        self.run(&["network", "connect", network, service], default_timeout())
            .await
            .map(|_| ())
    }
}

/// Stand-in when neither docker nor podman is installed.
///
/// Route and consumer checks still run; every network check reports the
/// missing runtime instead.
pub struct MissingRuntime;

#[async_trait]
impl ContainerRuntime for MissingRuntime {
    async fn is_running(&self, _service: &str) -> Result<bool, RuntimeError> {
        Err(RuntimeError::NotInstalled)
    }

    async fn network_members(&self, _network: &str) -> Result<BTreeSet<String>, RuntimeError> {
        Err(RuntimeError::NotInstalled)
    }

    async fn resolve(&self, _from: &str, _host: &str, _timeout_ms: u64) -> Result<String, RuntimeError> {
        Err(RuntimeError::NotInstalled)
    }

    async fn tcp_connect(
        &self,
        _from: &str,
        _host: &str,
        _port: u16,
        _timeout_ms: u64,
    ) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotInstalled)
    }

    async fn connect_network(&self, _network: &str, _service: &str) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotInstalled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_binary_skips_detection() {
        let runtime = DockerRuntime::new(Some("podman")).unwrap();
        assert_eq!(runtime.binary, "podman");
    }

    #[tokio::test]
    async fn test_missing_runtime_reports_not_installed() {
        let runtime = MissingRuntime;
        assert_eq!(runtime.is_running("apisix").await, Err(RuntimeError::NotInstalled));
        assert_eq!(
            runtime.connect_network("gateway-net", "apisix").await,
            Err(RuntimeError::NotInstalled)
        );
    }

    #[tokio::test]
    async fn test_failed_command_reports_stderr() {
        let runtime = DockerRuntime::new(Some("false")).unwrap();
        match runtime.run(&["inspect", "apisix"], Duration::from_secs(5)).await {
            Err(RuntimeError::CommandFailed { command, .. }) => {
                assert_eq!(command, "false inspect apisix")
            }
            other => panic!("expected command failure, got {:?}", other),
        }
    }
}
