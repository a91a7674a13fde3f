//! Auto-detection strategies for bare target names
//!
//! Detection is an ordered chain: Docker first, then Kubernetes, then an
//! SSH heuristic over the literal reference string. The first strategy
//! that claims the name wins; a new backend is added by appending a
//! strategy to the chain.

use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::TargetResult;
use crate::exec::BackendProbe;
use crate::target::types::{Target, TargetKind, TargetSource};

/// One named detection strategy in the chain
#[async_trait]
pub trait DetectStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "not mine, try the next strategy"
    async fn detect(&self, name: &str) -> TargetResult<Option<Target>>;
}

/// Claims names that match a running Docker container
pub struct DockerDetector {
    probe: Arc<dyn BackendProbe>,
}

impl DockerDetector {
    pub fn new(probe: Arc<dyn BackendProbe>) -> Self {
        DockerDetector { probe }
    }
}

#[async_trait]
impl DetectStrategy for DockerDetector {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn detect(&self, name: &str) -> TargetResult<Option<Target>> {
        if !self.probe.docker_container_running(name).await? {
            return Ok(None);
        }
        debug!(container = %name, "Detected running Docker container");
        Ok(Some(Target::new(
            TargetKind::Docker,
            name,
            named_config(name),
            TargetSource::Detected,
        )))
    }
}

/// Claims names that match a Kubernetes pod in the configured namespace
pub struct PodDetector {
    probe: Arc<dyn BackendProbe>,
    namespace: String,
}

impl PodDetector {
    pub fn new(probe: Arc<dyn BackendProbe>, namespace: impl Into<String>) -> Self {
        PodDetector {
            probe,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl DetectStrategy for PodDetector {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn detect(&self, name: &str) -> TargetResult<Option<Target>> {
        if !self.probe.k8s_pod_exists(name, &self.namespace).await? {
            return Ok(None);
        }
        debug!(pod = %name, namespace = %self.namespace, "Detected Kubernetes pod");
        let mut config = Mapping::new();
        config.insert(Value::from("name"), Value::from(name));
        config.insert(Value::from("namespace"), Value::from(self.namespace.clone()));
        Ok(Some(Target::new(
            TargetKind::K8s,
            name,
            Value::Mapping(config),
            TargetSource::Detected,
        )))
    }
}

/// Claims names that read like SSH destinations: `user@host` or a dotted
/// hostname. Purely lexical, no network access.
pub struct SshHeuristic;

#[async_trait]
impl DetectStrategy for SshHeuristic {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn detect(&self, name: &str) -> TargetResult<Option<Target>> {
        let (user, host) = match name.split_once('@') {
            Some((user, host)) if !user.is_empty() && !host.is_empty() => (Some(user), host),
            Some(_) => return Ok(None),
            None => (None, name),
        };

        if user.is_none() && !looks_like_hostname(host) {
            return Ok(None);
        }

        debug!(host = %host, "Reference reads as an SSH destination");
        let mut config = Mapping::new();
        config.insert(Value::from("host"), Value::from(host));
        if let Some(user) = user {
            config.insert(Value::from("user"), Value::from(user));
        }
        Ok(Some(Target::new(
            TargetKind::Ssh,
            host,
            Value::Mapping(config),
            TargetSource::Detected,
        )))
    }
}

/// The standard chain, in detection order
pub fn detector_chain(
    probe: Arc<dyn BackendProbe>,
    namespace: &str,
) -> Vec<Box<dyn DetectStrategy>> {
    vec![
        Box::new(DockerDetector::new(probe.clone())),
        Box::new(PodDetector::new(probe, namespace)),
        Box::new(SshHeuristic),
    ]
}

/// A dotted name made of hostname characters, with non-empty labels
fn looks_like_hostname(s: &str) -> bool {
    s.contains('.')
        && !s.starts_with('.')
        && !s.ends_with('.')
        && s.split('.').all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn named_config(name: &str) -> Value {
    let mut config = Mapping::new();
    config.insert(Value::from("name"), Value::from(name));
    Value::Mapping(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::NullProbe;

    #[tokio::test]
    async fn test_ssh_heuristic_accepts_user_at_host() {
        let target = SshHeuristic.detect("deploy@10.0.0.5").await.unwrap().unwrap();
        assert_eq!(target.kind, TargetKind::Ssh);
        assert_eq!(target.name, "10.0.0.5");
        assert_eq!(target.config["user"], Value::from("deploy"));
        assert_eq!(target.source, TargetSource::Detected);
    }

    #[tokio::test]
    async fn test_ssh_heuristic_accepts_dotted_hostname() {
        let target = SshHeuristic
            .detect("web.example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(target.config["host"], Value::from("web.example.com"));
    }

    #[tokio::test]
    async fn test_ssh_heuristic_rejects_plain_word() {
        assert!(SshHeuristic.detect("app").await.unwrap().is_none());
        assert!(SshHeuristic.detect(".hidden").await.unwrap().is_none());
        assert!(SshHeuristic.detect("a..b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_probes_decline_when_backends_are_empty() {
        let probe: Arc<dyn BackendProbe> = Arc::new(NullProbe);
        assert!(DockerDetector::new(probe.clone())
            .detect("app")
            .await
            .unwrap()
            .is_none());
        assert!(PodDetector::new(probe, "default")
            .detect("app")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_chain_order_is_docker_k8s_ssh() {
        let chain = detector_chain(Arc::new(NullProbe), "default");
        let names: Vec<&str> = chain.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["docker", "kubernetes", "ssh"]);
    }
}
