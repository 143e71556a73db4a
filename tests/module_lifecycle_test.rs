//! Module lifecycle integration tests
//! Run with: cargo test --test module_lifecycle_test

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use guildkit::application::cron::Schedule;
use guildkit::application::events::ListenerTable;
use guildkit::domain::entities::{
    CommandData, CommandDefinition, EventKind, HandlerResult, Interaction, MessageEvent, ModuleMetadata,
    PlatformEvent, User,
};
use guildkit::application::orchestrator::ModuleHostBuilder;
use guildkit::domain::traits::{DeployScope, EventBinding, GuildGate, Module};
use guildkit::infrastructure::adapters::console::{ConsoleCatalog, ConsoleResponder};
use guildkit::modules::CoreModule;
use guildkit::{Config, HandlerError, InvocationOutcome, ModuleContext, ModuleHost, OrchestratorError};

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Shared record of what the test modules did
#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
    messages_seen: AtomicUsize,
    bus_seen: AtomicUsize,
}

impl Journal {
    fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

struct TestModule {
    metadata: ModuleMetadata,
    journal: Arc<Journal>,
    generation: usize,
    fail_on_load: bool,
}

#[async_trait]
impl Module for TestModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn commands(&self) -> Vec<CommandDefinition> {
        let reply = format!("{} gen {}", self.metadata.id, self.generation);
        let name = format!("{}-info", self.metadata.id);
        vec![CommandDefinition::new(CommandData::chat_input(name, "Module info"), move |ctx| {
            let reply = reply.clone();
            async move {
                ctx.reply(reply).await?;
                Ok(())
            }
        })]
    }

    fn events(&self) -> Vec<EventBinding> {
        let journal = Arc::clone(&self.journal);
        vec![EventBinding::on(EventKind::MessageCreate, move |_event| {
            journal.messages_seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })]
    }

    async fn on_load(&self, ctx: &ModuleContext) -> HandlerResult {
        let journal = Arc::clone(&self.journal);
        ctx.on("test:ping", move |_msg| {
            journal.bus_seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        ctx.register_job("tick", Schedule::Hourly, || async { Ok(()) })?;

        if self.fail_on_load {
            return Err(HandlerError::failed("database unreachable"));
        }
        self.journal.push(format!("load:{}", self.metadata.id));
        Ok(())
    }

    async fn on_unload(&self) -> HandlerResult {
        self.journal.push(format!("unload:{}", self.metadata.id));
        Ok(())
    }

    async fn on_disable(&self, guild_id: &str) -> HandlerResult {
        self.journal.push(format!("disable:{}:{}", self.metadata.id, guild_id));
        Ok(())
    }
}

fn module(id: &str, dependencies: &[&str]) -> ModuleMetadata {
    let mut metadata = ModuleMetadata::new(id, "1.0.0");
    metadata.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
    metadata
}

struct Harness {
    host: ModuleHost,
    events: ListenerTable,
    catalog: Arc<ConsoleCatalog>,
    journal: Arc<Journal>,
    _modules_dir: TempDir,
}

fn harness(modules: Vec<ModuleMetadata>, failing: &[&str]) -> Harness {
    harness_in(TempDir::new().unwrap(), modules, failing)
}

fn harness_in(dir: TempDir, modules: Vec<ModuleMetadata>, failing: &[&str]) -> Harness {
    harness_with(dir, modules, failing, |builder| builder)
}

fn harness_with<F>(
    dir: TempDir,
    modules: Vec<ModuleMetadata>,
    failing: &[&str],
    configure: F,
) -> Harness
where
    F: FnOnce(ModuleHostBuilder) -> ModuleHostBuilder,
{
    ensure_init();

    let mut config = Config::default();
    config.modules.directory = dir.path().to_path_buf();
    config.modules.shadow_directory = dir.path().join(".shadow");
    config.commands.dev_guild_id = Some("dev".to_string());

    let events = ListenerTable::new();
    let catalog = Arc::new(ConsoleCatalog::new());
    let journal = Arc::new(Journal::default());

    let mut builder = ModuleHost::builder(config)
        .with_event_source(Arc::new(events.clone()))
        .with_catalog(catalog.clone())
        .with_builtin(CoreModule::default_metadata(), || Box::new(CoreModule::new()));

    for metadata in modules {
        let fail_on_load = failing.contains(&metadata.id.as_str());
        let journal = Arc::clone(&journal);
        let generation = Arc::new(AtomicUsize::new(0));
        let template = metadata.clone();
        builder = builder.with_builtin(metadata, move || {
            Box::new(TestModule {
                metadata: template.clone(),
                journal: Arc::clone(&journal),
                generation: generation.fetch_add(1, Ordering::SeqCst) + 1,
                fail_on_load,
            })
        });
    }

    Harness {
        host: configure(builder).build(),
        events,
        catalog,
        journal,
        _modules_dir: dir,
    }
}

async fn invoke(host: &ModuleHost, command: &str, guild_id: &str) -> (InvocationOutcome, Option<String>) {
    let responder = Arc::new(ConsoleResponder::new());
    let interaction = Interaction::chat_input(command, User::new("u1")).with_guild(guild_id);
    let outcome = host.handle_interaction(interaction, responder.clone()).await;
    (outcome, responder.last_content())
}

fn message_in(guild_id: &str) -> PlatformEvent {
    PlatformEvent::MessageCreate(MessageEvent::new("c1", User::new("u2"), "hello").in_guild(guild_id))
}

#[tokio::test]
async fn test_load_all_in_dependency_order() {
    let h = harness(
        vec![module("shop", &["economy"]), module("economy", &["base"]), module("base", &[])],
        &[],
    );

    let report = h.host.load_all().await.unwrap();

    let position = |id: &str| report.loaded.iter().position(|m| m == id).unwrap();
    assert_eq!(report.loaded.len(), 4);
    assert!(position("base") < position("economy"));
    assert!(position("economy") < position("shop"));
    assert!(report.failed.is_empty() && report.skipped.is_empty() && report.invalid.is_empty());
    assert_eq!(h.host.load_order().await, report.loaded);

    // One deployment for the whole set, scoped to the development guild
    let deployments = h.catalog.deployments();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].0, DeployScope::Guild("dev".into()));
    assert!(deployments[0].1.contains(&"shop-info".to_string()));
    assert!(deployments[0].1.contains(&"ping".to_string()));

    let (outcome, reply) = invoke(&h.host, "shop-info", "g1").await;
    assert_eq!(outcome, InvocationOutcome::Completed);
    assert_eq!(reply.as_deref(), Some("shop gen 1"));
}

#[tokio::test]
async fn test_unload_removes_every_registration() {
    let h = harness(vec![module("economy", &[])], &[]);
    h.host.load_all().await.unwrap();

    assert!(h.host.commands().get("economy-info").is_some());
    assert_eq!(h.host.bus().module_subscription_count("economy"), 1);
    assert_eq!(h.host.cron().module_job_count("economy"), 1);
    assert_eq!(h.host.events().module_listeners("economy").len(), 1);
    let listeners_before = h.events.len();

    h.host.unload_module("economy").await.unwrap();

    assert!(!h.host.is_loaded("economy").await);
    assert!(h.host.commands().get("economy-info").is_none());
    assert!(h.host.commands().module_command_names("economy").is_empty());
    assert_eq!(h.host.bus().module_subscription_count("economy"), 0);
    assert_eq!(h.host.bus().subscriber_count("test:ping"), 0);
    assert_eq!(h.host.cron().module_job_count("economy"), 0);
    assert!(h.host.events().module_listeners("economy").is_empty());
    assert_eq!(h.events.len(), listeners_before - 1);
    assert_eq!(h.journal.entries(), vec!["load:economy", "unload:economy"]);

    // Events and bus messages no longer reach it
    h.events.dispatch(message_in("g1")).await;
    h.host.bus().emit("test:ping", "tester", json!({})).await;
    assert_eq!(h.journal.messages_seen.load(Ordering::SeqCst), 0);
    assert_eq!(h.journal.bus_seen.load(Ordering::SeqCst), 0);

    assert!(matches!(
        h.host.unload_module("economy").await,
        Err(OrchestratorError::NotLoaded(_))
    ));
}

#[tokio::test]
async fn test_failed_module_skips_dependents() {
    let h = harness(
        vec![module("base", &[]), module("economy", &["base"]), module("fun", &[])],
        &["base"],
    );

    let report = h.host.load_all().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "base");
    assert!(report.failed[0].1.contains("database unreachable"));
    assert_eq!(report.skipped, vec!["economy"]);
    assert!(report.loaded.contains(&"fun".to_string()));

    // Whatever the failed on_load registered is gone
    assert_eq!(h.host.bus().module_subscription_count("base"), 0);
    assert_eq!(h.host.cron().module_job_count("base"), 0);
    assert!(h.host.commands().get("base-info").is_none());
}

#[tokio::test]
async fn test_graph_errors_abort_loading() {
    let h = harness(vec![module("a", &["b"]), module("b", &["a"]), module("c", &[])], &[]);
    let err = h.host.load_all().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::CircularDependency { .. }));
    assert!(h.host.load_order().await.is_empty());

    let h = harness(vec![module("a", &["ghost"])], &[]);
    match h.host.load_all().await {
        Err(OrchestratorError::MissingDependency {
            module_id,
            missing_dependency,
        }) => {
            assert_eq!(module_id, "a");
            assert_eq!(missing_dependency, "ghost");
        }
        other => panic!("expected a missing dependency, got {:?}", other),
    }
    assert!(h.catalog.deployments().is_empty());
}

#[tokio::test]
async fn test_guild_gating_applies_to_commands_and_events() {
    let h = harness(vec![module("economy", &[])], &[]);
    h.host.load_all().await.unwrap();

    h.host.disable_module("economy", "g1").await.unwrap();
    assert!(!h.host.is_module_enabled("economy", "g1").await);
    assert!(h.host.is_module_enabled("economy", "g2").await);
    assert_eq!(h.catalog.permission("g1", "economy-info"), Some(false));

    assert_eq!(invoke(&h.host, "economy-info", "g1").await.0, InvocationOutcome::ModuleDisabled);
    assert_eq!(invoke(&h.host, "economy-info", "g2").await.0, InvocationOutcome::Completed);

    h.events.dispatch(message_in("g1")).await;
    assert_eq!(h.journal.messages_seen.load(Ordering::SeqCst), 0);
    h.events.dispatch(message_in("g2")).await;
    assert_eq!(h.journal.messages_seen.load(Ordering::SeqCst), 1);

    h.host.enable_module("economy", "g1").await.unwrap();
    assert_eq!(invoke(&h.host, "economy-info", "g1").await.0, InvocationOutcome::Completed);
    assert_eq!(h.catalog.permission("g1", "economy-info"), Some(true));

    assert!(h.journal.entries().contains(&"disable:economy:g1".to_string()));
}

#[tokio::test]
async fn test_core_module_cannot_be_disabled() {
    let h = harness(vec![], &[]);
    h.host.load_all().await.unwrap();

    assert!(matches!(
        h.host.disable_module("core", "g1").await,
        Err(OrchestratorError::CoreModule(_))
    ));
    assert_eq!(invoke(&h.host, "ping", "g1").await.1.as_deref(), Some("Pong!"));
    assert!(matches!(
        h.host.disable_module("nope", "g1").await,
        Err(OrchestratorError::NotLoaded(_))
    ));
}

#[tokio::test]
async fn test_reload_replaces_instance() {
    let h = harness(vec![module("economy", &[]), module("shop", &["economy"])], &[]);
    h.host.load_all().await.unwrap();
    let order = h.host.load_order().await;

    h.host.reload_module("economy").await.unwrap();

    assert_eq!(invoke(&h.host, "economy-info", "g1").await.1.as_deref(), Some("economy gen 2"));
    assert_eq!(h.host.bus().module_subscription_count("economy"), 1);
    assert_eq!(h.host.cron().module_job_count("economy"), 1);
    assert_eq!(h.host.events().module_listeners("economy").len(), 1);
    assert!(h.host.is_loaded("shop").await);
    assert_eq!(h.host.load_order().await, order);

    let entries = h.journal.entries();
    assert_eq!(
        &entries[entries.len() - 2..],
        &["unload:economy".to_string(), "load:economy".to_string()]
    );

    assert!(matches!(
        h.host.reload_module("ghost").await,
        Err(OrchestratorError::NotLoaded(_))
    ));
}

#[tokio::test]
async fn test_single_load_checks_dependencies() {
    let h = harness(vec![module("economy", &[]), module("shop", &["economy"])], &[]);
    h.host.load_all().await.unwrap();

    h.host.unload_module("economy").await.unwrap();
    h.host.unload_module("shop").await.unwrap();

    match h.host.load_module("shop").await {
        Err(OrchestratorError::DependencyNotLoaded { module_id, missing }) => {
            assert_eq!(module_id, "shop");
            assert_eq!(missing, vec!["economy"]);
        }
        other => panic!("expected unmet dependency, got {:?}", other),
    }

    h.host.load_module("economy").await.unwrap();
    h.host.load_module("shop").await.unwrap();
    assert!(matches!(
        h.host.load_module("shop").await,
        Err(OrchestratorError::AlreadyLoaded(_))
    ));
}

#[tokio::test]
async fn test_unload_all_runs_in_reverse_order() {
    let h = harness(vec![module("base", &[]), module("economy", &["base"])], &[]);
    h.host.load_all().await.unwrap();

    assert_eq!(h.host.unload_all().await, 3);
    assert!(h.host.load_order().await.is_empty());
    assert!(h.host.commands().is_empty());
    assert_eq!(h.host.cron().list_jobs().len(), 0);
    assert!(h.events.is_empty());

    let entries = h.journal.entries();
    assert_eq!(entries, vec!["load:base", "load:economy", "unload:economy", "unload:base"]);
}

#[tokio::test]
async fn test_invalid_directories_are_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("broken")).unwrap();
    std::fs::create_dir_all(dir.path().join("nolib")).unwrap();
    std::fs::write(
        dir.path().join("nolib").join("module.yaml"),
        "id: nolib\nname: No Library\nversion: 1.0.0\n",
    )
    .unwrap();

    let h = harness_in(dir, vec![module("economy", &[])], &[]);
    let report = h.host.load_all().await.unwrap();

    assert_eq!(report.invalid.len(), 1);
    assert_eq!(report.invalid[0].0, "broken");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "nolib");
    assert!(report.loaded.contains(&"economy".to_string()));
}

#[tokio::test]
async fn test_core_announces_ready_on_the_bus() {
    let h = harness(vec![], &[]);
    h.host.load_all().await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    h.host.bus().on("listener", "core:ready", move |msg| {
        let counter = Arc::clone(&counter);
        async move {
            assert_eq!(msg.source_module, "core");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    h.events.dispatch(PlatformEvent::Ready).await;
    h.events.dispatch(PlatformEvent::Ready).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

/// Panics from the named hook
#[derive(Clone, Copy)]
enum Fault {
    Commands,
    Events,
}

struct FaultyModule {
    metadata: ModuleMetadata,
    fault: Fault,
}

#[async_trait]
impl Module for FaultyModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn commands(&self) -> Vec<CommandDefinition> {
        if let Fault::Commands = self.fault {
            panic!("commands() bug");
        }
        vec![CommandDefinition::new(
            CommandData::chat_input(format!("{}-run", self.metadata.id), "Run"),
            |_ctx| async { Ok(()) },
        )]
    }

    fn events(&self) -> Vec<EventBinding> {
        if let Fault::Events = self.fault {
            panic!("events() bug");
        }
        Vec::new()
    }

    async fn on_load(&self, ctx: &ModuleContext) -> HandlerResult {
        ctx.register_job("tick", Schedule::Hourly, || async { Ok(()) })?;
        Ok(())
    }

    async fn on_unload(&self) -> HandlerResult {
        Ok(())
    }
}

fn faulty(
    metadata: ModuleMetadata,
    fault: Fault,
) -> impl Fn() -> Box<dyn Module> + Send + Sync + 'static {
    move || {
        Box::new(FaultyModule {
            metadata: metadata.clone(),
            fault,
        })
    }
}

#[tokio::test]
async fn test_panicking_module_is_isolated() {
    let h = harness_with(TempDir::new().unwrap(), vec![module("good", &[])], &[], |builder| {
        let bad_commands = module("bad-commands", &[]);
        let bad_events = module("bad-events", &[]);
        let needs_bad = module("needs-bad", &["bad-events"]);
        builder
            .with_builtin(bad_commands.clone(), faulty(bad_commands, Fault::Commands))
            .with_builtin(bad_events.clone(), faulty(bad_events, Fault::Events))
            .with_builtin(needs_bad.clone(), faulty(needs_bad, Fault::Events))
            .with_builtin(module("bad-new", &[]), || -> Box<dyn Module> {
                panic!("constructor bug")
            })
    });

    let report = h.host.load_all().await.unwrap();

    assert!(report.loaded.contains(&"good".to_string()));
    assert!(report.loaded.contains(&"core".to_string()));
    let mut failed: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["bad-commands", "bad-events", "bad-new"]);
    assert_eq!(report.skipped, vec!["needs-bad"]);

    // Nothing of the failed modules stayed registered
    assert!(h.host.commands().get("bad-events-run").is_none());
    assert!(h.host.cron().list_jobs().iter().all(|job| !job.key.starts_with("bad-")));
    assert_eq!(invoke(&h.host, "good-info", "g1").await.1.as_deref(), Some("good gen 1"));
}

/// Gate backed by a store that outlives the host
#[derive(Default)]
struct StoredGate {
    disabled: Mutex<HashSet<(String, String)>>,
}

impl StoredGate {
    fn with_disabled(module_id: &str, guild_id: &str) -> Self {
        let gate = Self::default();
        gate.disabled
            .lock()
            .unwrap()
            .insert((module_id.to_string(), guild_id.to_string()));
        gate
    }

    fn is_disabled(&self, module_id: &str, guild_id: &str) -> bool {
        self.disabled
            .lock()
            .unwrap()
            .contains(&(module_id.to_string(), guild_id.to_string()))
    }
}

#[async_trait]
impl GuildGate for StoredGate {
    async fn is_module_enabled(&self, module_id: &str, guild_id: &str) -> bool {
        !self.is_disabled(module_id, guild_id)
    }

    async fn set_module_enabled(&self, module_id: &str, guild_id: &str, enabled: bool) -> bool {
        let key = (module_id.to_string(), guild_id.to_string());
        let mut disabled = self.disabled.lock().unwrap();
        if enabled {
            disabled.remove(&key)
        } else {
            disabled.insert(key)
        }
    }
}

#[tokio::test]
async fn test_host_uses_supplied_gate() {
    let gate = Arc::new(StoredGate::with_disabled("economy", "g1"));
    let supplied: Arc<dyn GuildGate> = gate.clone();
    let modules = vec![module("economy", &[])];
    let h = harness_with(TempDir::new().unwrap(), modules, &[], move |builder| {
        builder.with_gate(supplied)
    });
    h.host.load_all().await.unwrap();

    // State from the store applies without any call to disable_module
    assert!(!h.host.is_module_enabled("economy", "g1").await);
    assert_eq!(invoke(&h.host, "economy-info", "g1").await.0, InvocationOutcome::ModuleDisabled);
    assert_eq!(invoke(&h.host, "economy-info", "g2").await.0, InvocationOutcome::Completed);
    h.events.dispatch(message_in("g1")).await;
    assert_eq!(h.journal.messages_seen.load(Ordering::SeqCst), 0);

    h.host.enable_module("economy", "g1").await.unwrap();
    assert!(!gate.is_disabled("economy", "g1"));
    h.events.dispatch(message_in("g1")).await;
    assert_eq!(h.journal.messages_seen.load(Ordering::SeqCst), 1);

    h.host.disable_module("economy", "g2").await.unwrap();
    assert!(gate.is_disabled("economy", "g2"));
    assert!(h.journal.entries().contains(&"disable:economy:g2".to_string()));
}
