//! Target resolution with layered defaults, caching and auto-detection

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::config::TargetsConfig;
use crate::error::{TargetError, TargetResult};
use crate::exec::BackendProbe;
use crate::target::detect::{detector_chain, DetectStrategy};
use crate::target::types::{
    parse_reference, parse_ssh_spec, Target, TargetKind, TargetRef, TargetSource,
};
use crate::utils::{
    deep_merge_concat, expand_pattern, get_path, is_pattern, matches_glob, parse_duration,
};

struct CacheEntry {
    targets: Vec<Target>,
    inserted: Instant,
}

/// Resolves target references against the `targets` section and live
/// backends
pub struct TargetResolver {
    config: TargetsConfig,
    probe: Arc<dyn BackendProbe>,
    detectors: Vec<Box<dyn DetectStrategy>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Option<Duration>,
}

impl TargetResolver {
    pub fn new(config: TargetsConfig, probe: Arc<dyn BackendProbe>) -> Self {
        let namespace = get_path(&config.defaults, "kubernetes.namespace")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();
        let detectors = if config.auto_detect {
            detector_chain(probe.clone(), &namespace)
        } else {
            Vec::new()
        };
        let cache_ttl = config
            .cache_ttl
            .as_deref()
            .and_then(|s| parse_duration(&Value::from(s)));

        TargetResolver {
            config,
            probe,
            detectors,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Resolve one reference to a single target
    pub async fn resolve(&self, reference: &str) -> TargetResult<Target> {
        if is_pattern(reference) {
            return Err(TargetError::InvalidReference(format!(
                "'{}' is a pattern; patterns resolve through find",
                reference
            )));
        }
        if let Some(mut cached) = self.cache_get(reference) {
            if let Some(target) = cached.pop() {
                return Ok(target);
            }
        }

        let target = match parse_reference(reference)? {
            TargetRef::Local => self.local_target(),
            TargetRef::Group { group, name } => self.resolve_in_group(&group, &name)?,
            TargetRef::Prefixed { kind, spec } => self.resolve_prefixed(kind, &spec)?,
            TargetRef::Bare(name) => self.resolve_bare(&name).await?,
        };

        self.cache_put(reference, vec![target.clone()]);
        Ok(target)
    }

    /// Resolve a pattern to every matching declared target.
    ///
    /// Brace alternations expand first; each candidate then matches with
    /// glob semantics against one group (`hosts.web-*`) or across all
    /// groups. A groupless wildcard also sweeps Docker Compose services
    /// when auto-detection is enabled.
    pub async fn find(&self, pattern: &str) -> TargetResult<Vec<Target>> {
        if let Some(cached) = self.cache_get(pattern) {
            return Ok(cached);
        }

        let mut found: Vec<Target> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for candidate in expand_pattern(pattern) {
            let group_split = candidate
                .split_once('.')
                .filter(|(group, _)| TargetKind::from_group(group).is_some());

            match group_split {
                Some((group, name_pattern)) => {
                    self.match_group(group, name_pattern, &mut found, &mut seen);
                }
                None => {
                    for group in ["hosts", "containers", "pods"] {
                        self.match_group(group, &candidate, &mut found, &mut seen);
                    }
                    if matches_glob(&candidate, "local") {
                        let local = self.local_target();
                        if seen.insert(local.id.clone()) {
                            found.push(local);
                        }
                    }
                    if candidate.contains('*') && self.config.auto_detect {
                        self.match_compose_services(&candidate, &mut found, &mut seen)
                            .await?;
                    }
                }
            }
        }

        debug!(pattern = %pattern, count = found.len(), "Pattern resolution finished");
        self.cache_put(pattern, found.clone());
        Ok(found)
    }

    /// Every configured target plus `local`
    pub fn list(&self) -> Vec<Target> {
        let mut all = vec![self.local_target()];
        for group in ["hosts", "containers", "pods"] {
            for name in self.config.group_names(group) {
                if let Ok(target) = self.resolve_in_group(group, &name) {
                    all.push(target);
                }
            }
        }
        all
    }

    /// Build an ephemeral target from a prefixed descriptor, bypassing the
    /// configured groups. Never cached, never persisted.
    pub fn create(&self, reference: &str) -> TargetResult<Target> {
        match parse_reference(reference)? {
            TargetRef::Local => Ok(self.local_target()),
            TargetRef::Prefixed { kind, spec } => self.create_from_spec(kind, &spec),
            _ => Err(TargetError::InvalidReference(format!(
                "'{}': create requires a type prefix (ssh:, docker:, pod:)",
                reference
            ))),
        }
    }

    /// Drop every cached resolution
    pub fn clear_cache(&self) {
        self.cache_lock().clear();
    }

    fn local_target(&self) -> Target {
        let config = self.apply_defaults(TargetKind::Local, &self.config.local);
        Target::new(TargetKind::Local, "local", config, TargetSource::Configured)
    }

    fn resolve_in_group(&self, group: &str, name: &str) -> TargetResult<Target> {
        let kind = TargetKind::from_group(group)
            .ok_or_else(|| TargetError::InvalidReference(format!("{}.{}", group, name)))?;
        let declared = self.config.group_entry(group, name).ok_or_else(|| {
            TargetError::NotFoundInGroup {
                group: group.to_string(),
                name: name.to_string(),
            }
        })?;
        Ok(self.build_configured(kind, name, declared))
    }

    fn resolve_prefixed(&self, kind: TargetKind, spec: &str) -> TargetResult<Target> {
        if let Some(group) = kind.group() {
            if let Some(declared) = self.config.group_entry(group, spec) {
                return Ok(self.build_configured(kind, spec, declared));
            }
        }
        self.create_from_spec(kind, spec)
    }

    async fn resolve_bare(&self, name: &str) -> TargetResult<Target> {
        for group in ["hosts", "containers", "pods"] {
            if let Ok(target) = self.resolve_in_group(group, name) {
                return Ok(target);
            }
        }

        for detector in &self.detectors {
            if let Some(target) = detector.detect(name).await? {
                debug!(reference = %name, strategy = detector.name(), "Auto-detected target");
                let config = self.apply_defaults(target.kind, &target.config);
                return Ok(Target { config, ..target });
            }
        }

        Err(TargetError::NotFound(name.to_string()))
    }

    fn create_from_spec(&self, kind: TargetKind, spec: &str) -> TargetResult<Target> {
        let (name, declared) = match kind {
            TargetKind::Ssh => parse_ssh_spec(spec)?,
            TargetKind::Docker => {
                let mut config = Mapping::new();
                config.insert(Value::from("name"), Value::from(spec));
                (spec.to_string(), Value::Mapping(config))
            }
            TargetKind::K8s => {
                let mut config = Mapping::new();
                config.insert(Value::from("name"), Value::from(spec));
                (spec.to_string(), Value::Mapping(config))
            }
            TargetKind::Local => (spec.to_string(), Value::Null),
        };
        let config = self.apply_defaults(kind, &declared);
        Ok(Target::new(kind, name, config, TargetSource::Created))
    }

    fn build_configured(&self, kind: TargetKind, name: &str, declared: &Value) -> Target {
        let mut declared = declared.clone();
        // An SSH host entry without an explicit host uses its own name
        if kind == TargetKind::Ssh {
            if let Value::Mapping(map) = &mut declared {
                map.entry(Value::from("host"))
                    .or_insert_with(|| Value::from(name));
            }
        }
        let config = self.apply_defaults(kind, &declared);
        Target::new(kind, name, config, TargetSource::Configured)
    }

    /// Layer common defaults, then the type-specific block, then the
    /// target's own config. Nested mappings deep-merge, arrays concatenate
    /// and an explicit `null` in the target's own config survives.
    fn apply_defaults(&self, kind: TargetKind, own: &Value) -> Value {
        let mut layered = self.common_defaults();
        if let Some(key) = kind.defaults_key() {
            if let Some(block) = get_path(&self.config.defaults, key) {
                layered = deep_merge_concat(&layered, block);
            }
        }
        // A target with no declared config (undeclared `local`, ephemeral
        // local) keeps the layered defaults; only explicit fields overlay
        if own.is_null() {
            return layered;
        }
        deep_merge_concat(&layered, own)
    }

    /// Shared defaults with the per-type blocks removed
    fn common_defaults(&self) -> Value {
        match &self.config.defaults {
            Value::Mapping(map) => {
                let mut out = map.clone();
                for key in ["ssh", "docker", "kubernetes"] {
                    out.remove(Value::from(key));
                }
                Value::Mapping(out)
            }
            other => other.clone(),
        }
    }

    fn match_group(
        &self,
        group: &str,
        name_pattern: &str,
        found: &mut Vec<Target>,
        seen: &mut HashSet<String>,
    ) {
        for name in self.config.group_names(group) {
            if !matches_glob(name_pattern, &name) {
                continue;
            }
            if let Ok(target) = self.resolve_in_group(group, &name) {
                if seen.insert(target.id.clone()) {
                    found.push(target);
                }
            }
        }
    }

    async fn match_compose_services(
        &self,
        pattern: &str,
        found: &mut Vec<Target>,
        seen: &mut HashSet<String>,
    ) -> TargetResult<()> {
        for service in self.probe.list_compose_services().await? {
            if !matches_glob(pattern, &service) {
                continue;
            }
            let mut config = Mapping::new();
            config.insert(Value::from("name"), Value::from(service.clone()));
            let config = self.apply_defaults(TargetKind::Docker, &Value::Mapping(config));
            let target = Target::new(TargetKind::Docker, service, config, TargetSource::Detected);
            if seen.insert(target.id.clone()) {
                found.push(target);
            }
        }
        Ok(())
    }

    fn cache_get(&self, key: &str) -> Option<Vec<Target>> {
        let mut cache = self.cache_lock();
        let entry = cache.get(key)?;
        if let Some(ttl) = self.cache_ttl {
            if entry.inserted.elapsed() > ttl {
                cache.remove(key);
                return None;
            }
        }
        Some(cache.get(key)?.targets.clone())
    }

    fn cache_put(&self, key: &str, targets: Vec<Target>) {
        self.cache_lock().insert(
            key.to_string(),
            CacheEntry {
                targets,
                inserted: Instant::now(),
            },
        );
    }

    fn cache_lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::NullProbe;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProbe {
        containers: Vec<String>,
        pods: Vec<String>,
        services: Vec<String>,
        docker_calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new() -> Self {
            ScriptedProbe {
                containers: Vec::new(),
                pods: Vec::new(),
                services: Vec::new(),
                docker_calls: AtomicUsize::new(0),
            }
        }

        fn with_container(mut self, name: &str) -> Self {
            self.containers.push(name.to_string());
            self
        }

        fn with_pod(mut self, name: &str) -> Self {
            self.pods.push(name.to_string());
            self
        }

        fn with_service(mut self, name: &str) -> Self {
            self.services.push(name.to_string());
            self
        }
    }

    #[async_trait::async_trait]
    impl BackendProbe for ScriptedProbe {
        async fn docker_container_running(&self, name: &str) -> TargetResult<bool> {
            self.docker_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.containers.iter().any(|c| c == name))
        }

        async fn k8s_pod_exists(&self, name: &str, _namespace: &str) -> TargetResult<bool> {
            Ok(self.pods.iter().any(|p| p == name))
        }

        async fn list_compose_services(&self) -> TargetResult<Vec<String>> {
            Ok(self.services.clone())
        }
    }

    fn targets_config(yaml: &str) -> TargetsConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn defaults_yaml() -> &'static str {
        r#"
defaults:
  timeout: 30s
  shell: /bin/sh
  throwOnNonZeroExit: true
  env: {}
  ssh:
    port: 22
    keepAlive: true
  docker:
    tty: false
    execFlags: []
  kubernetes:
    namespace: default
"#
    }

    fn resolver_with(probe: Arc<dyn BackendProbe>, extra: &str) -> TargetResolver {
        let yaml = format!("{}\n{}", defaults_yaml(), extra);
        TargetResolver::new(targets_config(&yaml), probe)
    }

    #[tokio::test]
    async fn test_resolve_local() {
        let resolver = resolver_with(Arc::new(NullProbe), "");
        let target = resolver.resolve("local").await.unwrap();
        assert_eq!(target.kind, TargetKind::Local);
        assert_eq!(target.config["shell"], Value::from("/bin/sh"));
        assert!(target.config.get("port").is_none());
    }

    #[tokio::test]
    async fn test_undeclared_local_still_gets_defaults() {
        let config = targets_config(defaults_yaml());
        assert!(config.local.is_null());

        let resolver = TargetResolver::new(config, Arc::new(NullProbe));
        let target = resolver.resolve("local").await.unwrap();
        assert_eq!(target.config["timeout"], Value::from("30s"));
        assert_eq!(target.config["throwOnNonZeroExit"], Value::from(true));
    }

    #[tokio::test]
    async fn test_group_reference_layers_defaults() {
        let resolver = resolver_with(
            Arc::new(NullProbe),
            "hosts: {web-1: {host: 10.0.0.1, port: 3333}}",
        );
        let target = resolver.resolve("hosts.web-1").await.unwrap();

        assert_eq!(target.kind, TargetKind::Ssh);
        assert_eq!(target.source, TargetSource::Configured);
        // Own value wins, type and common defaults still show through
        assert_eq!(target.config["port"], Value::from(3333));
        assert_eq!(target.config["keepAlive"], Value::from(true));
        assert_eq!(target.config["shell"], Value::from("/bin/sh"));
    }

    #[tokio::test]
    async fn test_host_entry_without_host_uses_name() {
        let resolver = resolver_with(Arc::new(NullProbe), "hosts: {web.example.com: {}}");
        let target = resolver.resolve("hosts.web.example.com").await.unwrap();
        assert_eq!(target.config["host"], Value::from("web.example.com"));
    }

    #[tokio::test]
    async fn test_explicit_null_survives_defaults() {
        let resolver = resolver_with(
            Arc::new(NullProbe),
            "containers: {app: {name: app, workdir: null}}",
        );
        let target = resolver.resolve("containers.app").await.unwrap();
        assert_eq!(target.config.get("workdir"), Some(&Value::Null));
        assert_eq!(target.config["tty"], Value::from(false));
    }

    #[tokio::test]
    async fn test_missing_group_member_names_group_and_leaf() {
        let resolver = resolver_with(Arc::new(NullProbe), "hosts: {web-1: {}}");
        let err = resolver.resolve("hosts.nonexistent").await.unwrap_err();
        match err {
            TargetError::NotFoundInGroup { group, name } => {
                assert_eq!(group, "hosts");
                assert_eq!(name, "nonexistent");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_detection_order_prefers_docker() {
        let probe = ScriptedProbe::new().with_container("app").with_pod("app");
        let resolver = resolver_with(Arc::new(probe), "");
        let target = resolver.resolve("app").await.unwrap();
        assert_eq!(target.kind, TargetKind::Docker);
        assert_eq!(target.source, TargetSource::Detected);
    }

    #[tokio::test]
    async fn test_detection_falls_through_to_pod() {
        let probe = ScriptedProbe::new().with_pod("api");
        let resolver = resolver_with(Arc::new(probe), "");
        let target = resolver.resolve("api").await.unwrap();
        assert_eq!(target.kind, TargetKind::K8s);
        assert_eq!(target.config["namespace"], Value::from("default"));
    }

    #[tokio::test]
    async fn test_bare_user_at_host_detects_as_ssh() {
        let resolver = resolver_with(Arc::new(NullProbe), "");
        let target = resolver.resolve("deploy@10.0.0.5").await.unwrap();
        assert_eq!(target.kind, TargetKind::Ssh);
        assert_eq!(target.config["user"], Value::from("deploy"));
        assert_eq!(target.config["port"], Value::from(22));
    }

    #[tokio::test]
    async fn test_auto_detect_disabled_fails_without_probing() {
        let probe = Arc::new(ScriptedProbe::new().with_container("app"));
        let resolver = resolver_with(probe.clone(), "autoDetect: false");

        let err = resolver.resolve("app").await.unwrap_err();
        assert!(matches!(err, TargetError::NotFound(ref n) if n == "app"));
        assert_eq!(probe.docker_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_configured_name_shadows_detection() {
        let probe = Arc::new(ScriptedProbe::new().with_container("web-1"));
        let resolver = resolver_with(probe.clone(), "hosts: {web-1: {host: 10.0.0.1}}");
        let target = resolver.resolve("web-1").await.unwrap();
        assert_eq!(target.kind, TargetKind::Ssh);
        assert_eq!(probe.docker_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_find_group_pattern() {
        let resolver = resolver_with(
            Arc::new(NullProbe),
            "hosts: {web-1: {}, web-2: {}, db-master: {}}",
        );
        let mut names: Vec<String> = resolver
            .find("hosts.web-*")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["web-1", "web-2"]);
    }

    #[tokio::test]
    async fn test_find_brace_pattern_across_groups() {
        let resolver = resolver_with(
            Arc::new(NullProbe),
            "hosts: {web-prod-1: {}, web-prod-2: {}, db-master: {}}\ncontainers: {api-prod-1: {}, api-prod-2: {}}",
        );
        let mut names: Vec<String> = resolver
            .find("{web,api}-prod-*")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["api-prod-1", "api-prod-2", "web-prod-1", "web-prod-2"]
        );
    }

    #[tokio::test]
    async fn test_find_star_includes_compose_services() {
        let probe = ScriptedProbe::new().with_service("redis").with_service("db");
        let resolver = resolver_with(Arc::new(probe), "hosts: {web-1: {}}");
        let targets = resolver.find("*").await.unwrap();

        let ids: HashSet<String> = targets.into_iter().map(|t| t.id).collect();
        assert!(ids.contains("ssh:web-1"));
        assert!(ids.contains("docker:redis"));
        assert!(ids.contains("docker:db"));
        assert!(ids.contains("local"));
    }

    #[tokio::test]
    async fn test_find_dedupes_by_id() {
        let resolver = resolver_with(Arc::new(NullProbe), "hosts: {web-1: {}}");
        let targets = resolver.find("{web-1,web-?}").await.unwrap();
        assert_eq!(targets.len(), 1);
    }

    #[tokio::test]
    async fn test_prefixed_reference_prefers_configured_entry() {
        let resolver = resolver_with(Arc::new(NullProbe), "containers: {app: {workdir: /srv}}");
        let target = resolver.resolve("docker:app").await.unwrap();
        assert_eq!(target.source, TargetSource::Configured);
        assert_eq!(target.config["workdir"], Value::from("/srv"));
    }

    #[tokio::test]
    async fn test_prefixed_reference_creates_ephemeral() {
        let resolver = resolver_with(Arc::new(NullProbe), "");
        let target = resolver.resolve("ssh:deploy@10.0.0.5:2222").await.unwrap();
        assert_eq!(target.source, TargetSource::Created);
        assert_eq!(target.config["port"], Value::from(2222));
        assert_eq!(target.config["user"], Value::from("deploy"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_patterns() {
        let resolver = resolver_with(Arc::new(NullProbe), "hosts: {web-1: {}}");
        assert!(matches!(
            resolver.resolve("hosts.web-*").await,
            Err(TargetError::InvalidReference(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_bare_name() {
        let resolver = resolver_with(Arc::new(NullProbe), "");
        assert!(resolver.create("just-a-name").is_err());
    }

    #[tokio::test]
    async fn test_list_includes_local_and_all_groups() {
        let resolver = resolver_with(
            Arc::new(NullProbe),
            "hosts: {web-1: {}}\ncontainers: {app: {}}\npods: {api: {}}",
        );
        let ids: HashSet<String> = resolver.list().into_iter().map(|t| t.id).collect();
        assert_eq!(
            ids,
            HashSet::from([
                "local".to_string(),
                "ssh:web-1".to_string(),
                "docker:app".to_string(),
                "k8s:api".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn test_cache_avoids_repeat_probing() {
        let probe = Arc::new(ScriptedProbe::new().with_container("app"));
        let resolver = resolver_with(probe.clone(), "");

        resolver.resolve("app").await.unwrap();
        resolver.resolve("app").await.unwrap();
        assert_eq!(probe.docker_calls.load(Ordering::SeqCst), 1);

        resolver.clear_cache();
        resolver.resolve("app").await.unwrap();
        assert_eq!(probe.docker_calls.load(Ordering::SeqCst), 2);
    }
}
