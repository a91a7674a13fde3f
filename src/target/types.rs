//! Target descriptors and reference parsing

use serde_yaml::{Mapping, Value};

use crate::error::{TargetError, TargetResult};

/// Backend flavor of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Local,
    Ssh,
    Docker,
    K8s,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Local => "local",
            TargetKind::Ssh => "ssh",
            TargetKind::Docker => "docker",
            TargetKind::K8s => "k8s",
        }
    }

    /// Configuration group that declares targets of this kind
    pub fn group(&self) -> Option<&'static str> {
        match self {
            TargetKind::Local => None,
            TargetKind::Ssh => Some("hosts"),
            TargetKind::Docker => Some("containers"),
            TargetKind::K8s => Some("pods"),
        }
    }

    /// Key of this kind's block inside `targets.defaults`
    pub fn defaults_key(&self) -> Option<&'static str> {
        match self {
            TargetKind::Local => None,
            TargetKind::Ssh => Some("ssh"),
            TargetKind::Docker => Some("docker"),
            TargetKind::K8s => Some("kubernetes"),
        }
    }

    pub fn from_group(group: &str) -> Option<TargetKind> {
        match group {
            "hosts" => Some(TargetKind::Ssh),
            "containers" => Some(TargetKind::Docker),
            "pods" => Some(TargetKind::K8s),
            _ => None,
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<TargetKind> {
        match prefix {
            "ssh" => Some(TargetKind::Ssh),
            "docker" => Some(TargetKind::Docker),
            "pod" => Some(TargetKind::K8s),
            _ => None,
        }
    }
}

/// How a target came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    /// Declared in the configuration
    Configured,
    /// Found by probing a live backend or by the SSH heuristic
    Detected,
    /// Built ad hoc from a prefixed reference, never persisted
    Created,
}

/// A resolved, executable destination
#[derive(Debug, Clone)]
pub struct Target {
    /// Stable identity used for de-duplication, `local` or `<type>:<name>`
    pub id: String,

    pub kind: TargetKind,

    /// Leaf name within the target's group
    pub name: String,

    /// Fully layered configuration (common defaults, type defaults, own)
    pub config: Value,

    pub source: TargetSource,
}

impl Target {
    pub fn new(
        kind: TargetKind,
        name: impl Into<String>,
        config: Value,
        source: TargetSource,
    ) -> Self {
        let name = name.into();
        let id = match kind {
            TargetKind::Local => "local".to_string(),
            _ => format!("{}:{}", kind.as_str(), name),
        };
        Target {
            id,
            kind,
            name,
            config,
            source,
        }
    }
}

/// A parsed target reference, before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    Local,
    /// `hosts.web-1`, `containers.app`, `pods.api`
    Group { group: String, name: String },
    /// `ssh:user@host`, `docker:app`, `pod:api`
    Prefixed { kind: TargetKind, spec: String },
    /// No group and no prefix; resolved by lookup then auto-detection
    Bare(String),
}

/// Classify a reference string without touching any backend
pub fn parse_reference(reference: &str) -> TargetResult<TargetRef> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(TargetError::InvalidReference("empty reference".to_string()));
    }
    if reference == "local" {
        return Ok(TargetRef::Local);
    }

    if let Some((prefix, spec)) = reference.split_once(':') {
        if let Some(kind) = TargetKind::from_prefix(prefix) {
            if spec.is_empty() {
                return Err(TargetError::InvalidReference(reference.to_string()));
            }
            return Ok(TargetRef::Prefixed {
                kind,
                spec: spec.to_string(),
            });
        }
        return Err(TargetError::InvalidReference(reference.to_string()));
    }

    if let Some((group, name)) = reference.split_once('.') {
        if TargetKind::from_group(group).is_some() {
            if name.is_empty() {
                return Err(TargetError::InvalidReference(reference.to_string()));
            }
            return Ok(TargetRef::Group {
                group: group.to_string(),
                name: name.to_string(),
            });
        }
    }

    // A dotted hostname is still a bare reference
    Ok(TargetRef::Bare(reference.to_string()))
}

/// Parse an `ssh:` spec of the form `[user@]host[:port]` into a config
/// fragment
pub fn parse_ssh_spec(spec: &str) -> TargetResult<(String, Value)> {
    let (user, rest) = match spec.split_once('@') {
        Some((user, rest)) if !user.is_empty() => (Some(user), rest),
        Some(_) => return Err(TargetError::InvalidReference(spec.to_string())),
        None => (None, spec),
    };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| TargetError::InvalidReference(spec.to_string()))?;
            (host, Some(port))
        }
        None => (rest, None),
    };
    if host.is_empty() {
        return Err(TargetError::InvalidReference(spec.to_string()));
    }

    let mut config = Mapping::new();
    config.insert(Value::from("host"), Value::from(host));
    if let Some(user) = user {
        config.insert(Value::from("user"), Value::from(user));
    }
    if let Some(port) = port {
        config.insert(Value::from("port"), Value::from(port));
    }
    Ok((host.to_string(), Value::Mapping(config)))
}
