//! Common test utilities
//!
//! In-memory fakes for every collaborator the engine talks to, and a
//! [`Harness`] wiring them into a [`Reconciler`].

#![allow(dead_code, reason = "each test binary uses a different subset")]

use app_controller::config::ToolPaths;
use app_controller::controller::backoff::ExponentialBackoff;
use app_controller::controller::deploy::{DeployEvent, Deployer};
use app_controller::controller::fetch::{HttpFetcher, LookupError, ResourceLookup, Resolver};
use app_controller::controller::in_flight::InFlight;
use app_controller::controller::reconciler::{
    PackageDocuments, PackageRegistry, Reconciler, RegisterError, ResourceStore, StoreError,
};
use app_controller::controller::template::TemplatePipeline;
use app_controller::crd::{App, KappOptions, PackageRepository, Reconcilable};
use app_controller::exec::{CmdRunResult, CommandRunner, CommandSpec};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::core::object::HasStatus;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

static RUSTLS_INIT: Once = Once::new();

/// Install the rustls crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub const NAMESPACE: &str = "default";

// ============================================================================
// ResourceStore
// ============================================================================

/// Records every status and finalizer write
///
/// The object last written through the store is what [`ResourceStore::get`]
/// returns, so a test can hand the engine an older snapshot than the
/// store holds.
pub struct MemoryStore<K: Reconcilable> {
    current: Mutex<Option<K>>,
    statuses: Mutex<Vec<<K as HasStatus>::Status>>,
    finalizers: Mutex<Vec<Vec<String>>>,
    /// Generation reported by re-reads; `None` means the object is gone
    generation: Mutex<Option<i64>>,
    /// Fail writes after this many succeeded
    fail_after: Mutex<Option<usize>>,
}

impl<K: Reconcilable> MemoryStore<K> {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            current: Mutex::new(None),
            statuses: Mutex::new(Vec::new()),
            finalizers: Mutex::new(Vec::new()),
            generation: Mutex::new(generation),
            fail_after: Mutex::new(None),
        }
    }

    /// Make `resource` the live object
    pub fn put(&self, resource: &K) {
        *self.current.lock().unwrap() = Some(resource.clone());
    }

    /// Apply `change` to the live object, starting from `resource` if none
    fn update(&self, resource: &K, change: impl FnOnce(&mut K)) {
        let mut current = self.current.lock().unwrap();
        change(current.get_or_insert_with(|| resource.clone()));
    }

    pub fn set_generation(&self, generation: Option<i64>) {
        *self.generation.lock().unwrap() = generation;
    }

    pub fn fail_writes_after(&self, count: usize) {
        *self.fail_after.lock().unwrap() = Some(count);
    }

    pub fn statuses(&self) -> Vec<<K as HasStatus>::Status> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn last_status(&self) -> <K as HasStatus>::Status {
        self.statuses
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no status written")
    }

    pub fn finalizer_writes(&self) -> Vec<Vec<String>> {
        self.finalizers.lock().unwrap().clone()
    }
}

#[async_trait]
impl<K: Reconcilable> ResourceStore<K> for MemoryStore<K> {
    async fn write_status(
        &self,
        resource: &K,
        status: &<K as HasStatus>::Status,
    ) -> Result<(), StoreError> {
        let mut statuses = self.statuses.lock().unwrap();
        if self.fail_after.lock().unwrap().is_some_and(|n| statuses.len() >= n) {
            return Err(StoreError::NotFound {
                kind: K::KIND_LABEL,
                namespace: resource.namespace().unwrap_or_default(),
                name: resource.name_any(),
            });
        }
        statuses.push(status.clone());
        self.update(resource, |live| *live.status_mut() = Some(status.clone()));
        Ok(())
    }

    async fn get(&self, _namespace: &str, _name: &str) -> Result<Option<K>, StoreError> {
        let Some(generation) = *self.generation.lock().unwrap() else {
            return Ok(None);
        };
        let mut live = self.current.lock().unwrap().clone();
        if let Some(live) = live.as_mut() {
            live.meta_mut().generation = Some(generation);
        }
        Ok(live)
    }

    async fn generation(&self, _namespace: &str, _name: &str) -> Result<Option<i64>, StoreError> {
        Ok(*self.generation.lock().unwrap())
    }

    async fn set_finalizers(&self, resource: &K, finalizers: Vec<String>) -> Result<(), StoreError> {
        self.update(resource, |live| *live.finalizers_mut() = finalizers.clone());
        self.finalizers.lock().unwrap().push(finalizers);
        Ok(())
    }
}

// ============================================================================
// CommandRunner
// ============================================================================

/// Scripted external tools
///
/// `vendir sync` writes [`FakeRunner::content`] into `<cwd>/content`, like a
/// real sync of a single directory would. Any program listed in `failures`
/// exits 1 with the given stderr.
#[derive(Default)]
pub struct FakeRunner {
    pub content: BTreeMap<String, String>,
    pub failures: BTreeMap<String, String>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn with_content(files: &[(&str, &str)]) -> Self {
        Self {
            content: files
                .iter()
                .map(|(path, body)| ((*path).to_string(), (*body).to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing(mut self, program: &str, stderr: &str) -> Self {
        self.failures.insert(program.to_string(), stderr.to_string());
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.program).collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _cancel: Option<&CancellationToken>,
        _progress: Option<&UnboundedSender<String>>,
    ) -> CmdRunResult {
        self.calls.lock().unwrap().push(spec.clone());

        if let Some(stderr) = self.failures.get(&spec.program) {
            let mut result = CmdRunResult::success("");
            result.exit_code = 1;
            result.stderr = stderr.clone();
            return result;
        }

        if spec.program == "vendir" {
            let Some(cwd) = &spec.cwd else {
                return CmdRunResult::failure("vendir needs a working directory");
            };
            let content = cwd.join("content");
            for (path, body) in &self.content {
                let file = content.join(path);
                if let Some(parent) = file.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(file, body).unwrap();
            }
            return CmdRunResult::success("Lock config\n");
        }

        CmdRunResult::success("")
    }
}

// ============================================================================
// Deployer
// ============================================================================

/// Records deploys and deletes; emits a started and a progress event per call
#[derive(Default)]
pub struct FakeDeployer {
    pub deploy_error: Option<String>,
    pub delete_error: Option<String>,
    manifests: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    inspects: Mutex<usize>,
}

impl FakeDeployer {
    pub fn failing_deploy(stderr: &str) -> Self {
        Self {
            deploy_error: Some(stderr.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_delete(stderr: &str) -> Self {
        Self {
            delete_error: Some(stderr.to_string()),
            ..Self::default()
        }
    }

    pub fn manifests(&self) -> Vec<String> {
        self.manifests.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn inspects(&self) -> usize {
        *self.inspects.lock().unwrap()
    }

    fn outcome(error: Option<&String>, stdout: &str) -> CmdRunResult {
        let mut result = CmdRunResult::success(stdout);
        if let Some(stderr) = error {
            result.exit_code = 1;
            result.stderr = stderr.clone();
        }
        result
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(
        &self,
        manifest: &str,
        _app_name: &str,
        _namespace: &str,
        _opts: &KappOptions,
        events: &UnboundedSender<DeployEvent>,
    ) -> CmdRunResult {
        self.manifests.lock().unwrap().push(manifest.to_string());
        let _ = events.send(DeployEvent::Started);
        let _ = events.send(DeployEvent::Progress(CmdRunResult::success(
            "Target cluster 'https://127.0.0.1:6443'\n2:00:00PM: create configmap/demo\n",
        )));
        Self::outcome(self.deploy_error.as_ref(), "Succeeded\n")
    }

    async fn delete(
        &self,
        app_name: &str,
        _namespace: &str,
        _opts: &KappOptions,
        events: &UnboundedSender<DeployEvent>,
    ) -> CmdRunResult {
        self.deletes.lock().unwrap().push(app_name.to_string());
        let _ = events.send(DeployEvent::Started);
        Self::outcome(self.delete_error.as_ref(), "Succeeded\n")
    }

    async fn inspect(&self, _app_name: &str, _namespace: &str, _opts: &KappOptions) -> CmdRunResult {
        *self.inspects.lock().unwrap() += 1;
        CmdRunResult::success("Resources in app 'demo-ctrl'\n")
    }
}

// ============================================================================
// ResourceLookup
// ============================================================================

#[derive(Default)]
pub struct FakeLookup {
    pub secrets: BTreeMap<String, Secret>,
    pub config_maps: BTreeMap<String, ConfigMap>,
}

#[async_trait]
impl ResourceLookup for FakeLookup {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, LookupError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                kind: "Secret",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, LookupError> {
        self.config_maps
            .get(name)
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                kind: "ConfigMap",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

// ============================================================================
// PackageRegistry
// ============================================================================

/// Registered document names per repository
#[derive(Default)]
pub struct FakeRegistry {
    registered: Mutex<BTreeMap<String, BTreeSet<String>>>,
    /// Names owned by another repository
    pub foreign: BTreeMap<String, String>,
}

impl FakeRegistry {
    pub fn registered(&self, repository: &str) -> BTreeSet<String> {
        self.registered
            .lock()
            .unwrap()
            .get(repository)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed(&self, repository: &str, names: &[&str]) {
        self.registered.lock().unwrap().insert(
            repository.to_string(),
            names.iter().map(|n| (*n).to_string()).collect(),
        );
    }

    fn names(documents: &PackageDocuments) -> BTreeSet<String> {
        documents
            .package_names()
            .into_iter()
            .chain(documents.metadata_names())
            .collect()
    }
}

#[async_trait]
impl PackageRegistry for FakeRegistry {
    async fn register(
        &self,
        _namespace: &str,
        repository: &str,
        documents: &PackageDocuments,
    ) -> Result<(), RegisterError> {
        for name in Self::names(documents) {
            if let Some(owner) = self.foreign.get(&name) {
                return Err(RegisterError::Conflict {
                    kind: "Package",
                    name,
                    owner: owner.clone(),
                });
            }
        }
        self.registered
            .lock()
            .unwrap()
            .entry(repository.to_string())
            .or_default()
            .extend(Self::names(documents));
        Ok(())
    }

    async fn prune(
        &self,
        _namespace: &str,
        repository: &str,
        keep: &PackageDocuments,
    ) -> Result<usize, RegisterError> {
        let keep = Self::names(keep);
        let mut registered = self.registered.lock().unwrap();
        let owned = registered.entry(repository.to_string()).or_default();
        let before = owned.len();
        owned.retain(|name| keep.contains(name));
        Ok(before - owned.len())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A reconciliation context wired to fakes
pub struct Harness {
    pub ctx: Arc<Reconciler>,
    pub apps: Arc<MemoryStore<App>>,
    pub repositories: Arc<MemoryStore<PackageRepository>>,
    pub runner: Arc<FakeRunner>,
    pub deployer: Arc<FakeDeployer>,
    pub registry: Arc<FakeRegistry>,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new(runner: FakeRunner, deployer: FakeDeployer) -> Self {
        Self::build(runner, deployer, FakeRegistry::default(), FakeLookup::default())
    }

    pub fn build(
        runner: FakeRunner,
        deployer: FakeDeployer,
        registry: FakeRegistry,
        lookup: FakeLookup,
    ) -> Self {
        init_rustls();
        let runner = Arc::new(runner);
        let deployer = Arc::new(deployer);
        let registry = Arc::new(registry);
        let apps = Arc::new(MemoryStore::<App>::new(Some(1)));
        let repositories = Arc::new(MemoryStore::<PackageRepository>::new(Some(1)));
        let scratch = tempfile::tempdir().unwrap();

        let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
        let tools = ToolPaths::default();
        let http = HttpFetcher::new(Duration::from_secs(5), dyn_runner.clone(), "tar").unwrap();
        let resolver = Resolver::new(Arc::new(lookup), dyn_runner.clone(), http, tools.clone());

        let ctx = Reconciler {
            apps: apps.clone(),
            repositories: repositories.clone(),
            resolver: Arc::new(resolver),
            pipeline: Arc::new(TemplatePipeline::new(dyn_runner, tools)),
            deployer: deployer.clone(),
            registry: registry.clone(),
            backoff: ExponentialBackoff::new(Duration::from_secs(30), Duration::from_secs(600)),
            in_flight: InFlight::new(),
            shutdown: CancellationToken::new(),
            scratch_root: scratch.path().to_path_buf(),
            status_output_limit: 10_000,
            progress_write_interval: Duration::ZERO,
        };

        Self {
            ctx: Arc::new(ctx),
            apps,
            repositories,
            runner,
            deployer,
            registry,
            scratch,
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// An App built from its JSON form, as the API server would return it
pub fn app(value: serde_json::Value) -> App {
    serde_json::from_value(value).unwrap()
}

pub fn package_repository(value: serde_json::Value) -> PackageRepository {
    serde_json::from_value(value).unwrap()
}

/// Metadata of a live object at `generation`
pub fn metadata(name: &str, generation: i64) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "namespace": NAMESPACE,
        "generation": generation,
        "uid": format!("uid-{name}"),
    })
}

/// Whether `resource` would carry its kind's finalizer after `writes`
pub fn holds_finalizer<K: Reconcilable>(writes: &[Vec<String>]) -> bool {
    writes
        .last()
        .is_some_and(|f| f.iter().any(|f| f == K::FINALIZER))
}
