use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use workshop_converge::store::get_opt;
use workshop_converge::{
    HttpTransport, MemoryStore, ObjectStore, Orchestrator, RecordingTransport,
    RemoteTransport, Simulation, StoreError,
};
use workshop_core::document::{is_document_path, list_documents_at, load_document_at};
use workshop_core::types::{API_VERSION, KIND};
use workshop_core::{ObjectRef, Workshop, WorkshopStatus};
use workshop_manifests::Manifests;

use crate::config::{self, DaemonConfig, StoreKind};
use crate::error::{io_err, DaemonError};
use crate::kube_store::KubeStore;
use crate::paths::{socket_path, workshop_root, workshops_dir, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::scheduler::{tenant_key, Scheduler, SchedulerHandle, TenantTable};

const UPSERT_ATTEMPTS: usize = 3;

/// What the socket handlers and the document tasks share.
#[derive(Clone)]
struct Shared {
    home: PathBuf,
    store: Arc<dyn ObjectStore>,
    scheduler: SchedulerHandle,
    tenants: TenantTable,
    store_kind: StoreKind,
    started_at: DateTime<Utc>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = config::load_at(&home)?;
    let manifests = Arc::new(Manifests::new(config.template_dir.as_deref())?);
    let (store, transport) = connect_store(&config).await?;
    tracing::info!(store = ?config.store, home = %home.display(), "workshop daemon starting");

    let engine = Arc::new(Orchestrator::new(
        store.clone(),
        manifests,
        transport,
        config.converge.clone(),
    ));
    let scheduler = Scheduler::new(engine, config.min_requeue());
    let shared = Shared {
        home: home.clone(),
        store,
        scheduler: scheduler.handle(),
        tenants: scheduler.tenants(),
        store_kind: config.store,
        started_at: Utc::now(),
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let scheduler_handle = supervise(&shutdown_tx, scheduler.run(shutdown_tx.subscribe()));
    let watcher_handle = supervise(&shutdown_tx, watcher_task(shared.clone(), shutdown_tx.subscribe()));
    let resync_handle = supervise(
        &shutdown_tx,
        resync_task(shared.clone(), config.resync_interval(), shutdown_tx.subscribe()),
    );
    let socket_handle = supervise(
        &shutdown_tx,
        socket_server_task(shared, shutdown_tx.clone(), shutdown_tx.subscribe()),
    );
    let signal_handle = supervise(&shutdown_tx, ctrl_c_task(shutdown_tx.subscribe()));

    let (scheduler_result, watcher_result, resync_result, socket_result, signal_result) = tokio::join!(
        scheduler_handle,
        watcher_handle,
        resync_handle,
        socket_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("resync", resync_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("workshop daemon stopped");
    Ok(())
}

/// Spawn one runtime task; whichever task ends first stops the others.
fn supervise<F>(shutdown: &broadcast::Sender<()>, task: F) -> JoinHandle<Result<(), DaemonError>>
where
    F: Future<Output = Result<(), DaemonError>> + Send + 'static,
{
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        let result = task.await;
        let _ = shutdown.send(());
        result
    })
}

async fn ctrl_c_task(mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| DaemonError::Protocol(format!("ctrl-c handler failed: {err}")))?;
            tracing::info!("received ctrl-c, shutting down daemon");
            Ok(())
        }
    }
}

async fn connect_store(
    config: &DaemonConfig,
) -> Result<(Arc<dyn ObjectStore>, Arc<dyn RemoteTransport>), DaemonError> {
    match config.store {
        StoreKind::Memory => Ok((
            Arc::new(MemoryStore::simulated(Simulation::openshift())),
            Arc::new(RecordingTransport::default()),
        )),
        StoreKind::Kube => Ok((
            Arc::new(KubeStore::connect().await?),
            Arc::new(HttpTransport::new()),
        )),
    }
}

// ---------------------------------------------------------------------------
// Desired-state documents
// ---------------------------------------------------------------------------

async fn watcher_task(shared: Shared, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
    let dir = workshops_dir(&shared.home);
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    // Event paths arrive canonicalized on some platforms.
    let dir = fs::canonicalize(&dir).unwrap_or(dir);

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %dir.display(), "watching workshop documents");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if !path.starts_with(&dir) || !is_document_path(&path) {
                        continue;
                    }
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    match sync_document(&shared, path.clone(), "watcher").await {
                        Ok(name) => tracing::info!(workshop = %name, path = %path.display(), "document change queued"),
                        Err(err) => tracing::error!(path = %path.display(), error = %err, "document change skipped"),
                    }
                }
            }
        }
    }

    Ok(())
}

/// Load one document file, apply it to the store, and queue its tenant.
async fn sync_document(shared: &Shared, path: PathBuf, source: &'static str) -> Result<String, DaemonError> {
    let doc = tokio::task::spawn_blocking(move || load_document_at(&path))
        .await
        .map_err(|err| DaemonError::Protocol(format!("document load join error: {err}")))??;
    let key = tenant_key(&workshop_target(&doc));
    upsert_workshop(shared.store.as_ref(), &doc).await?;
    shared.scheduler.enqueue(&key, source).await?;
    Ok(key)
}

/// Re-apply every document on disk and queue every tenant the store knows,
/// including ones created outside the documents directory.
async fn resync_task(
    shared: Shared,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // The first tick fires immediately and performs the startup sync.
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                if let Err(err) = resync_once(&shared).await {
                    tracing::warn!(error = %err, "resync failed");
                }
            }
        }
    }
    Ok(())
}

async fn resync_once(shared: &Shared) -> Result<usize, DaemonError> {
    let dir = workshops_dir(&shared.home);
    let listed = tokio::task::spawn_blocking(move || list_documents_at(&dir))
        .await
        .map_err(|err| DaemonError::Protocol(format!("document listing join error: {err}")))?;

    match listed {
        Ok(docs) => {
            for (path, doc) in docs {
                if let Err(err) = upsert_workshop(shared.store.as_ref(), &doc).await {
                    tracing::warn!(path = %path.display(), error = %err, "resync could not apply document");
                }
            }
        }
        Err(err) => tracing::warn!(error = %err, "resync could not read documents"),
    }

    let tenants = shared.store.list(API_VERSION, KIND, None).await?;
    for tenant in &tenants {
        shared.scheduler.enqueue(&tenant_key(&tenant.object_ref()), "resync").await?;
    }
    tracing::debug!(tenants = tenants.len(), "resync queued tenants");
    Ok(tenants.len())
}

fn workshop_target(doc: &Workshop) -> ObjectRef {
    Orchestrator::workshop_ref(&doc.metadata.name, doc.metadata.namespace.as_deref())
}

/// Make the stored Workshop carry `doc`'s spec. Status, finalizers, uid and
/// resource version stay whatever the store has.
pub async fn upsert_workshop(store: &dyn ObjectStore, doc: &Workshop) -> Result<Workshop, DaemonError> {
    let target = workshop_target(doc);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match get_opt(store, &target).await? {
            None => {
                let mut fresh = doc.clone();
                fresh.status = WorkshopStatus::default();
                fresh.metadata.uid = None;
                fresh.metadata.resource_version = None;
                fresh.metadata.finalizers.clear();
                fresh.metadata.deletion_timestamp = None;
                store.create(fresh.to_resource()?).await
            }
            Some(existing) => {
                let mut current = Workshop::from_resource(&existing)?;
                if current.spec == doc.spec && current.metadata.labels == doc.metadata.labels {
                    return Ok(current);
                }
                current.spec = doc.spec.clone();
                current.metadata.labels = doc.metadata.labels.clone();
                store.update(current.to_resource()?).await
            }
        };
        match result {
            Ok(stored) => {
                tracing::info!(workshop = %doc.metadata.name, "workshop document applied");
                return Ok(Workshop::from_resource(&stored)?);
            }
            Err(StoreError::Conflict(_) | StoreError::AlreadyExists(_)) if attempt < UPSERT_ATTEMPTS => {
                tracing::debug!(workshop = %doc.metadata.name, attempt, "workshop changed underneath, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

async fn socket_server_task(
    shared: Shared,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    clear_stale_socket(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    let served = loop {
        let stream = tokio::select! {
            _ = shutdown_rx.recv() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(err) => break Err(io_err(&socket, err)),
            },
        };
        let client = SocketClient {
            shared: shared.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(err) = client.serve(stream).await {
                tracing::error!(error = %err, "control socket client failed");
            }
        });
    };

    if let Err(err) = fs::remove_file(&socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(socket = %socket.display(), error = %err, "failed to remove control socket");
        }
    }
    served
}

/// One control-socket connection: newline-delimited requests, one response each.
struct SocketClient {
    shared: Shared,
    shutdown_tx: broadcast::Sender<()>,
}

impl SocketClient {
    async fn serve(self, stream: UnixStream) -> Result<(), DaemonError> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(err) => return Err(io_err("control socket read", err)),
            };
            if line.trim().is_empty() {
                continue;
            }

            let (response, done) = match serde_json::from_str::<DaemonRequest>(&line) {
                Ok(request) => self.dispatch(&request).await,
                Err(err) => (DaemonResponse::error(format!("malformed request: {err}")), false),
            };
            let mut frame = serde_json::to_vec(&response)?;
            frame.push(b'\n');
            writer
                .write_all(&frame)
                .await
                .map_err(|e| io_err("control socket write", e))?;
            writer.flush().await.map_err(|e| io_err("control socket write", e))?;
            if done {
                return Ok(());
            }
        }
    }

    /// The response plus whether the connection should close after it.
    async fn dispatch(&self, request: &DaemonRequest) -> (DaemonResponse, bool) {
        match (request.cmd.as_str(), request.workshop.as_deref()) {
            ("status", _) => (DaemonResponse::ok(status_payload(&self.shared).await), false),
            ("reconcile", Some(name)) => {
                let response = match self.shared.scheduler.enqueue(name, "socket").await {
                    Ok(()) => DaemonResponse::ok(json!({ "workshop": name, "queued": true })),
                    Err(err) => DaemonResponse::error(err.to_string()),
                };
                (response, false)
            }
            ("reconcile", None) => (DaemonResponse::error("reconcile requires a workshop name"), false),
            ("stop", _) => {
                tracing::info!("stop requested over control socket");
                let _ = self.shutdown_tx.send(());
                (DaemonResponse::ok(json!({ "stopping": true })), true)
            }
            (other, _) => (DaemonResponse::error(format!("unsupported command '{other}'")), false),
        }
    }
}

async fn status_payload(shared: &Shared) -> Value {
    let tenants: Vec<Value> = shared.tenants.read().await.values().map(|t| json!(t)).collect();
    json!({
        "running": true,
        "started_at": shared.started_at.to_rfc3339(),
        "store": shared.store_kind,
        "tenants": tenants,
        "socket": socket_path(&shared.home).display().to_string(),
        "workshops_dir": workshops_dir(&shared.home).display().to_string(),
    })
}

/// Refuses to start next to a live daemon; otherwise removes a leftover socket file.
fn clear_stale_socket(socket: &Path) -> Result<(), DaemonError> {
    if StdUnixStream::connect(socket).is_ok() {
        return Err(DaemonError::Protocol(format!(
            "another daemon is listening on {}",
            socket.display()
        )));
    }
    match fs::remove_file(socket) {
        Ok(()) => {
            tracing::warn!(socket = %socket.display(), "removed stale control socket");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn should_process_event(debounce: &mut HashMap<PathBuf, Instant>, path: &Path, now: Instant) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [workshop_root(home), workshops_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!("{task} task join failure: {err}"))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;
    use crate::scheduler::tenant_ref;
    use workshop_converge::ReconcileOutcome;
    use workshop_core::document::sample_document;
    use workshop_core::{Component, ComponentStatus};

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_saves() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<PathBuf, Instant>::new();
        let path = PathBuf::from("/tmp/ocp-dev.yaml");
        let mut triggers = 0usize;

        for _ in 0..5 {
            if should_process_event_with_threshold(&mut debounce, &path, Instant::now(), threshold) {
                triggers += 1;
            }
            advance(Duration::from_millis(10)).await;
        }
        advance(Duration::from_millis(150)).await;
        if should_process_event_with_threshold(&mut debounce, &path, Instant::now(), threshold) {
            triggers += 1;
        }
        assert_eq!(triggers, 2, "a burst collapses to one trigger, a later save gets its own");
    }

    #[tokio::test]
    async fn upsert_creates_then_replaces_spec_only() {
        let store = MemoryStore::new();
        let doc = sample_document("ocp-dev", 2);

        let created = upsert_workshop(&store, &doc).await.expect("create");
        assert!(created.metadata.uid.is_some());

        // Simulate the engine having worked on it.
        let mut worked = created.clone();
        worked.metadata.finalizers.push("finalizer.workshop.mcouliba.com".into());
        worked.status.set(Component::Project, ComponentStatus::Installed);
        store.update(worked.to_resource().expect("encode")).await.expect("update");

        let mut edited = doc.clone();
        edited.spec.user.number = 5;
        let applied = upsert_workshop(&store, &edited).await.expect("replace");

        assert_eq!(applied.spec.user.number, 5);
        assert_eq!(applied.metadata.uid, created.metadata.uid);
        assert_eq!(applied.metadata.finalizers, vec!["finalizer.workshop.mcouliba.com".to_string()]);
        assert_eq!(applied.status.installed(), vec![Component::Project]);
    }

    #[tokio::test]
    async fn unchanged_document_is_not_rewritten() {
        let store = MemoryStore::new();
        let doc = sample_document("ocp-dev", 2);
        upsert_workshop(&store, &doc).await.expect("create");
        upsert_workshop(&store, &doc).await.expect("again");

        let counts = store.counts(KIND);
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.updates, 0);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn namespaced_document_is_upserted_and_reconciled() {
        let store = MemoryStore::simulated(Simulation::openshift());
        let mut doc = sample_document("ocp-dev", 1);
        doc.metadata.namespace = Some("workshop".into());

        upsert_workshop(&store, &doc).await.expect("create");
        upsert_workshop(&store, &doc).await.expect("again");
        let counts = store.counts(KIND);
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.updates, 0);

        let key = tenant_key(&workshop_target(&doc));
        assert_eq!(key, "workshop/ocp-dev");
        let engine = Orchestrator::new(
            Arc::new(store.clone()),
            Arc::new(Manifests::embedded().expect("manifests")),
            Arc::new(RecordingTransport::default()),
            Default::default(),
        );
        let target = tenant_ref(&key);
        let mut converged = false;
        for _ in 0..10 {
            let outcome = engine.reconcile(&target).await.expect("reconcile");
            assert_ne!(outcome, ReconcileOutcome::Gone, "the namespaced document must be found");
            if outcome.is_converged() {
                converged = true;
                break;
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        assert!(converged);
        let stored = Workshop::from_resource(&store.get(&target).await.expect("stored")).expect("decode");
        assert_eq!(stored.status.installed(), vec![Component::Portal, Component::Project]);
    }

    #[test]
    fn only_create_and_modify_events_matter() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};
        assert!(is_relevant_event_kind(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant_event_kind(&EventKind::Modify(ModifyKind::Any)));
        assert!(!is_relevant_event_kind(&EventKind::Remove(RemoveKind::File)));
    }
}
