//! Runtime module management: unload, restart and operator commands

mod support;

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use modhost::http::Dispatcher;
use modhost::module::{Composer, ModuleManager, ModuleState};
use modhost::{HttpRequest, LoadError, ModuleError};
use support::{test_config, Probe, StubModule};

async fn manager_with(dir: &TempDir, modules: Vec<(StubModule, &str)>) -> Arc<ModuleManager> {
    let config = Arc::new(test_config(dir.path()));
    let descriptors = modules
        .into_iter()
        .map(|(module, base)| module.descriptor(base, base))
        .collect();
    let composition = Composer::new(Arc::clone(&config)).compose(descriptors, Vec::new());
    let manager = Arc::new(ModuleManager::new(config));
    manager.install(composition.records).await;
    manager
}

#[tokio::test]
async fn test_list_modules() {
    let dir = TempDir::new().unwrap();
    let mut catchall = StubModule::new(Probe::new());
    catchall.with_catchall = true;
    let manager = manager_with(
        &dir,
        vec![(StubModule::new(Probe::new()), "Beta"), (catchall, "Alpha")],
    )
    .await;

    let modules = manager.list_modules().await;
    let bases: Vec<&str> = modules.iter().map(|m| m.base_path.as_str()).collect();
    assert_eq!(bases, vec!["Alpha", "Beta"]);
    assert!(modules[0].has_catchall);
    assert_eq!(modules[1].paths, vec!["", "hello"]);
    assert_ne!(modules[0].module_id, modules[1].module_id);
    assert_eq!(manager.module_state("Alpha").await, Some(ModuleState::Running));
    assert_eq!(manager.module_state("Gamma").await, None);
}

#[tokio::test]
async fn test_unload_removes_route() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let manager = manager_with(
        &dir,
        vec![(StubModule::new(probe.clone()), "Demo"), (StubModule::new(Probe::new()), "Other")],
    )
    .await;
    let dispatcher = Dispatcher::new(manager.routes());

    assert_eq!(dispatcher.dispatch(HttpRequest::get("/Demo/")).await.status, 200);
    manager.unload_module("Demo").await.unwrap();
    assert_eq!(probe.stops(), 1);
    assert_eq!(dispatcher.dispatch(HttpRequest::get("/Demo/")).await.status, 404);
    assert_eq!(dispatcher.dispatch(HttpRequest::get("/Other/")).await.status, 200);
    assert!(manager.commands().await.iter().all(|c| !c.starts_with("demo.")));

    assert!(matches!(
        manager.unload_module("Demo").await,
        Err(LoadError::NotFound(_))
    ));

    // Unloaded modules are not stopped again at shutdown
    let report = manager.stop_all(std::time::Duration::from_secs(2)).await;
    assert_eq!(report.stopped, 1);
    assert_eq!(probe.stops(), 1);
}

#[tokio::test]
async fn test_restart_creates_fresh_instance() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let manager = manager_with(&dir, vec![(StubModule::new(probe.clone()), "Demo")]).await;
    let before = manager.list_modules().await[0].module_id.clone();

    manager.restart_module("Demo").await.unwrap();
    assert_eq!(probe.inits(), 2);
    assert_eq!(probe.stops(), 1);
    assert_eq!(manager.module_state("Demo").await, Some(ModuleState::Running));
    assert_ne!(manager.list_modules().await[0].module_id, before);

    let dispatcher = Dispatcher::new(manager.routes());
    assert_eq!(dispatcher.dispatch(HttpRequest::get("/Demo/hello")).await.status, 200);
    assert_eq!(manager.commands().await, vec!["demo.bump_counter".to_string()]);

    manager.stop_all(std::time::Duration::from_secs(2)).await;
    assert_eq!(probe.stops(), 2);
}

#[tokio::test]
async fn test_restart_unknown_module() {
    let dir = TempDir::new().unwrap();
    let manager = manager_with(&dir, vec![(StubModule::new(Probe::new()), "Demo")]).await;
    assert!(matches!(
        manager.restart_module("Nope").await,
        Err(LoadError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_commands_are_qualified_and_executable() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let manager = manager_with(&dir, vec![(StubModule::new(probe.clone()), "MyDemo")]).await;

    // The blank verb is skipped
    assert_eq!(manager.commands().await, vec!["mydemo.bump_counter".to_string()]);
    assert_eq!(
        manager.command_help("mydemo.bump_counter").await.as_deref(),
        Some("Count a command call")
    );

    manager
        .execute_command("mydemo.bump_counter", vec!["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(probe.commands(), 3);

    assert!(matches!(
        manager.execute_command("mydemo.nope", Vec::new()).await,
        Err(ModuleError::CommandNotFound(_))
    ));
}

#[tokio::test]
async fn test_stop_all_stops_each_module_once() {
    let dir = TempDir::new().unwrap();
    let probes: Vec<_> = (0..3).map(|_| Probe::new()).collect();
    let manager = manager_with(
        &dir,
        vec![
            (StubModule::new(probes[0].clone()), "A"),
            (StubModule::new(probes[1].clone()), "B"),
            (StubModule::new(probes[2].clone()), "C"),
        ],
    )
    .await;

    let report = manager.stop_all(std::time::Duration::from_secs(2)).await;
    assert_eq!(report.stopped, 3);
    let again = manager.stop_all(std::time::Duration::from_secs(2)).await;
    assert_eq!(again.stopped, 0);
    for probe in probes {
        assert_eq!(probe.stops(), 1);
    }
    assert!(manager.routes().current().is_empty());
    assert!(manager.list_modules().await.is_empty());
}

#[tokio::test]
async fn test_running_command_keeps_module_loaded() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut slow = StubModule::new(probe.clone());
    slow.command_delay = Some(Duration::from_millis(400));
    let manager = manager_with(&dir, vec![(slow, "Demo")]).await;

    // The caller gives up while the action is still running
    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        manager.execute_command("demo.bump_counter", Vec::new()),
    )
    .await;
    assert!(waited.is_err());

    manager.stop_all(Duration::from_secs(2)).await;
    assert_eq!(probe.stops(), 1);
    assert_eq!(probe.drops(), 0);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(probe.commands(), 1);
    assert_eq!(probe.drops(), 1);
}

#[tokio::test]
async fn test_abandoned_restart_still_completes() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut slow = StubModule::new(probe.clone());
    slow.stop_delay = Some(Duration::from_millis(300));
    let manager = manager_with(&dir, vec![(slow, "Demo")]).await;

    let waited =
        tokio::time::timeout(Duration::from_millis(50), manager.restart_module("Demo")).await;
    assert!(waited.is_err());

    // The restart carries on without a caller
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(probe.inits(), 2);
    assert_eq!(manager.module_state("Demo").await, Some(ModuleState::Running));

    let report = manager.stop_all(Duration::from_secs(2)).await;
    assert_eq!(report.stopped, 1);
    assert_eq!(probe.stops(), 2);
}
