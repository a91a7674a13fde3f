//! Live backend probes used by target auto-detection

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::TargetResult;

/// Backend detection contract consumed by the target resolver.
///
/// Implementations answer "does this name exist right now" questions
/// against live backends. The resolver never caches probe answers beyond
/// its own target cache.
#[async_trait]
pub trait BackendProbe: Send + Sync {
    /// Whether a Docker container with this name is currently running
    async fn docker_container_running(&self, name: &str) -> TargetResult<bool>;

    /// Whether a pod with this name exists in the given namespace
    async fn k8s_pod_exists(&self, name: &str, namespace: &str) -> TargetResult<bool>;

    /// Names of Docker Compose services in the current project
    async fn list_compose_services(&self) -> TargetResult<Vec<String>>;
}

/// Probe that shells out to the `docker` and `kubectl` CLIs
pub struct CliProbe;

impl CliProbe {
    pub fn new() -> Self {
        CliProbe
    }

    async fn run_quiet(program: &str, args: &[&str]) -> Option<String> {
        let output = Command::new(program).args(args).output().await.ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            None
        }
    }
}

impl Default for CliProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendProbe for CliProbe {
    async fn docker_container_running(&self, name: &str) -> TargetResult<bool> {
        let filter = format!("name=^{}$", name);
        let out = Self::run_quiet(
            "docker",
            &["ps", "--filter", &filter, "--format", "{{.Names}}"],
        )
        .await;
        Ok(out.is_some_and(|s| s.lines().any(|line| line.trim() == name)))
    }

    async fn k8s_pod_exists(&self, name: &str, namespace: &str) -> TargetResult<bool> {
        let out = Self::run_quiet(
            "kubectl",
            &["get", "pod", name, "-n", namespace, "-o", "name"],
        )
        .await;
        Ok(out.is_some_and(|s| !s.trim().is_empty()))
    }

    async fn list_compose_services(&self) -> TargetResult<Vec<String>> {
        let out = Self::run_quiet("docker", &["compose", "ps", "--services"]).await;
        Ok(out
            .map(|s| {
                s.lines()
                    .map(|line| line.trim().to_string())
                    .filter(|line| !line.is_empty())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Probe that sees no backends at all; used when detection is disabled
/// and in deterministic tests
pub struct NullProbe;

#[async_trait]
impl BackendProbe for NullProbe {
    async fn docker_container_running(&self, _name: &str) -> TargetResult<bool> {
        Ok(false)
    }

    async fn k8s_pod_exists(&self, _name: &str, _namespace: &str) -> TargetResult<bool> {
        Ok(false)
    }

    async fn list_compose_services(&self) -> TargetResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_probe_sees_nothing() {
        let probe = NullProbe;
        assert!(!probe.docker_container_running("app").await.unwrap());
        assert!(!probe.k8s_pod_exists("app", "default").await.unwrap());
        assert!(probe.list_compose_services().await.unwrap().is_empty());
    }
}
