//! Target resolution
//!
//! A target is a resolved, executable destination: the local shell, an SSH
//! host, a Docker container or a Kubernetes pod. References come in four
//! shapes (`local`, `hosts.web-1`, `ssh:user@host`, a bare name) plus glob
//! patterns with brace expansion for fan-out.

pub mod detect;
pub mod resolver;
pub mod types;

pub use detect::{detector_chain, DetectStrategy, DockerDetector, PodDetector, SshHeuristic};
pub use resolver::TargetResolver;
pub use types::{parse_reference, Target, TargetKind, TargetRef, TargetSource};
