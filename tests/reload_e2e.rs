use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use regconf::{
    ConfigurationProvider, FlatConfig, InMemoryRegistry, KeyItemMapping, KeyTreeMapping, LoadSource, LoadState,
    MappingRules, MemoryCache, MergeError, RegistryConfigProvider, RegistryError, RegistryObserver, RegistrySnapshot,
    ReloadConfig, ReloadController, ServiceInstance, ServiceMapping, ServiceRegistration,
};

const WAIT: Duration = Duration::from_secs(5);
const RELOAD_DELAY: Duration = Duration::from_millis(20);

fn api_snapshot(port: u16) -> RegistrySnapshot {
    RegistrySnapshot::new()
        .with_service(ServiceRegistration::new("api").with_instance(ServiceInstance::new("api-1", "10.0.0.1", port)))
        .with_key("feature/x", "on")
        .with_key("feature/y", "off")
}

fn scenario_rules() -> MappingRules {
    MappingRules::new()
        .service(ServiceMapping::endpoint("api", "Api:Endpoint"))
        .tree(KeyTreeMapping::nested("feature/", "Feature"))
}

fn provider(
    registry: &Arc<InMemoryRegistry>,
    cache: &Arc<MemoryCache>,
    rules: MappingRules,
) -> RegistryConfigProvider {
    let observer: Arc<dyn RegistryObserver> = registry.clone();
    let controller = ReloadController::new(
        observer,
        cache.clone(),
        rules,
        ReloadConfig::default().with_reload_delay(RELOAD_DELAY),
    )
    .unwrap();
    RegistryConfigProvider::new(controller)
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached within {WAIT:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn scenario_service_and_tree_mapping() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(api_snapshot(8080)));
    let cache = Arc::new(MemoryCache::new());
    let provider = provider(&registry, &cache, scenario_rules());

    assert_eq!(provider.load_with_source().unwrap(), LoadSource::Live);

    let expected: FlatConfig = [
        ("Api:Endpoint", "10.0.0.1:8080"),
        ("Feature:x", "on"),
        ("Feature:y", "off"),
    ]
    .into_iter()
    .collect();
    assert_eq!(*provider.current().unwrap(), expected);
    assert_eq!(cache.stored(), Some(expected));
}

#[test]
fn reload_publishes_new_snapshots_and_notifies() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(api_snapshot(8080)));
    let cache = Arc::new(MemoryCache::new());
    let provider = provider(&registry, &cache, scenario_rules());
    let changes = provider.subscribe();

    provider.load().unwrap();
    // The reload worker's own subscription first re-delivers the current snapshot.
    assert!(changes.recv_timeout(WAIT).is_some());

    registry.publish(api_snapshot(9090));
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:9090"));
    assert_eq!(cache.stored().unwrap().get("Api:Endpoint"), Some("10.0.0.1:9090"));
    assert_eq!(provider.state(), LoadState::LoadedLive);
}

#[test]
fn failing_cycle_keeps_previous_config_and_later_cycles_still_fire() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(api_snapshot(8080)));
    let cache = Arc::new(MemoryCache::new());
    // Port 0 means a broken registration.
    let rules = MappingRules::new().service(ServiceMapping::new("api", |reg| {
        let instance = &reg.instances[0];
        if instance.port == 0 {
            return Err(MergeError::bind(reg.name.clone(), "port 0"));
        }
        Ok(vec![("Api:Endpoint".to_string(), instance.endpoint())])
    }));
    let provider = provider(&registry, &cache, rules);
    let changes = provider.subscribe();

    provider.load().unwrap();
    assert!(changes.recv_timeout(WAIT).is_some());
    let before = provider.current().unwrap();
    let saves_before = cache.save_count();

    registry.publish(api_snapshot(0));
    let controller = provider.controller();
    wait_until(|| controller.reload_failures() >= 1);

    assert_eq!(provider.current().unwrap(), before);
    assert_eq!(provider.get("Api:Endpoint").as_deref(), Some("10.0.0.1:8080"));
    assert_eq!(cache.save_count(), saves_before);
    assert_eq!(provider.state(), LoadState::ReloadFailed);
    assert!(!changes.try_recv());

    registry.publish(api_snapshot(7070));
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(provider.get("Api:Endpoint").as_deref(), Some("10.0.0.1:7070"));
    assert_eq!(provider.state(), LoadState::LoadedLive);
}

#[test]
fn panicking_bind_is_isolated_to_its_cycle() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(api_snapshot(8080)));
    let cache = Arc::new(MemoryCache::new());
    let rules = MappingRules::new().service(ServiceMapping::new("api", |reg| {
        let instance = &reg.instances[0];
        assert!(instance.port != 0, "broken registration");
        Ok(vec![("Api:Endpoint".to_string(), instance.endpoint())])
    }));
    let provider = provider(&registry, &cache, rules);
    let changes = provider.subscribe();

    provider.load().unwrap();
    assert!(changes.recv_timeout(WAIT).is_some());

    registry.publish(api_snapshot(0));
    let controller = provider.controller();
    wait_until(|| controller.reload_failures() >= 1);
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:8080"));

    registry.publish(api_snapshot(6060));
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:6060"));
}

#[test]
fn stream_failure_resubscribes_after_delay() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(api_snapshot(8080)));
    let cache = Arc::new(MemoryCache::new());
    let provider = provider(&registry, &cache, scenario_rules());
    let changes = provider.subscribe();

    provider.load().unwrap();
    assert!(changes.recv_timeout(WAIT).is_some());
    let calls_before = registry.observe_calls();

    registry.fail_streams(RegistryError::unavailable("leader election"));
    // Resubscription receives the current contents again.
    assert!(changes.recv_timeout(WAIT).is_some());
    assert!(registry.observe_calls() > calls_before);
    assert!(provider.controller().reload_failures() >= 1);

    registry.publish(api_snapshot(5050));
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:5050"));
}

#[test]
fn outage_serves_last_good_then_recovers() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(api_snapshot(8080)));
    let cache = Arc::new(MemoryCache::new());
    let provider = provider(&registry, &cache, scenario_rules());
    let changes = provider.subscribe();

    provider.load().unwrap();
    assert!(changes.recv_timeout(WAIT).is_some());

    registry.begin_outage(RegistryError::unavailable("partition"));
    let controller = provider.controller();
    wait_until(|| controller.reload_failures() >= 3);
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:8080"));
    assert_eq!(provider.state(), LoadState::ReloadFailed);

    registry.publish(api_snapshot(4040));
    registry.recover();
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:4040"));
    assert_eq!(provider.state(), LoadState::LoadedLive);
}

#[test]
fn cache_start_then_live_reload_replaces_cached_config() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.begin_outage(RegistryError::unavailable("down at startup"));
    let cached: FlatConfig = [("Api:Endpoint", "cached:1")].into_iter().collect();
    let cache = Arc::new(MemoryCache::with(cached.clone()));
    let provider = provider(&registry, &cache, scenario_rules());
    let changes = provider.subscribe();

    assert_eq!(provider.load_with_source().unwrap(), LoadSource::Cache);
    assert_eq!(*provider.current().unwrap(), cached);
    assert_eq!(cache.save_count(), 0);
    assert_eq!(provider.state(), LoadState::LoadedCache);

    registry.publish(api_snapshot(8080));
    registry.recover();
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:8080"));
    assert_eq!(cache.save_count(), 1);
    assert_eq!(provider.state(), LoadState::LoadedLive);
}

#[test]
fn shutdown_stops_all_further_publication() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(api_snapshot(8080)));
    let cache = Arc::new(MemoryCache::new());
    let provider = provider(&registry, &cache, scenario_rules());
    let changes = provider.subscribe();

    provider.load().unwrap();
    assert!(changes.recv_timeout(WAIT).is_some());

    provider.shutdown();
    let generation = provider.controller().generation();

    registry.publish(api_snapshot(3030));
    assert!(changes.recv_timeout(Duration::from_millis(100)).is_none());
    assert_eq!(provider.controller().generation(), generation);
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:8080"));
}

#[test]
fn readers_never_observe_partial_maps() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(RegistrySnapshot::new()));
    let cache = Arc::new(MemoryCache::new());
    let rules = MappingRules::new().tree(KeyTreeMapping::nested("gen/", "Gen"));
    let provider = Arc::new(provider(&registry, &cache, rules));
    provider.load().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let provider = Arc::clone(&provider);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if let Some(cfg) = provider.current() {
                    // Every published map has either zero or all ten keys, all equal.
                    assert!(cfg.is_empty() || cfg.len() == 10);
                    let mut values = cfg.iter().map(|(_, v)| v);
                    if let Some(first) = values.next() {
                        assert!(values.all(|v| v == first));
                    }
                }
            }
        })
    };

    for round in 0..50 {
        let mut snapshot = RegistrySnapshot::new();
        for k in 0..10 {
            snapshot = snapshot.with_key(format!("gen/k{k}"), round.to_string());
        }
        registry.publish(snapshot);
    }
    let controller = provider.controller();
    wait_until(|| provider.get("gen:k0").as_deref() == Some("49"));
    assert!(controller.generation() >= 2);

    stop.store(true, Ordering::Relaxed);
    reader.join().unwrap();
}

#[test]
fn absent_item_key_is_omitted_until_it_appears() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(RegistrySnapshot::new()));
    let cache = Arc::new(MemoryCache::new());
    let rules = MappingRules::new().item(KeyItemMapping::new("global/timeout", "Http:Timeout"));
    let provider = provider(&registry, &cache, rules);
    let changes = provider.subscribe();

    provider.load().unwrap();
    assert!(changes.recv_timeout(WAIT).is_some());
    assert!(provider.get("Http:Timeout").is_none());
    assert!(provider.current().unwrap().is_empty());

    registry.publish(RegistrySnapshot::new().with_key("global/timeout", "30s"));
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(provider.get("http:timeout").as_deref(), Some("30s"));
}

#[test]
fn failing_cache_save_during_reload_keeps_new_config() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(api_snapshot(8080)));
    let cache = Arc::new(MemoryCache::new());
    let provider = provider(&registry, &cache, scenario_rules());
    let changes = provider.subscribe();

    provider.load().unwrap();
    assert!(changes.recv_timeout(WAIT).is_some());
    let controller = provider.controller();
    let failures_before = controller.reload_failures();
    let saves_before = cache.save_count();

    cache.set_fail_saves(true);
    registry.publish(api_snapshot(9090));
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:9090"));
    assert_eq!(controller.reload_failures(), failures_before + 1);
    assert_eq!(cache.save_count(), saves_before);
    assert_eq!(provider.state(), LoadState::LoadedLive);
    assert!(provider.is_reloading());

    cache.set_fail_saves(false);
    registry.publish(api_snapshot(9191));
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(provider.get("api:endpoint").as_deref(), Some("10.0.0.1:9191"));
    assert_eq!(cache.save_count(), saves_before + 1);
    assert_eq!(cache.stored().unwrap().get("Api:Endpoint"), Some("10.0.0.1:9191"));
}

#[test]
fn repeated_load_during_outage_keeps_newer_live_config() {
    let registry = Arc::new(InMemoryRegistry::with_snapshot(RegistrySnapshot::new().with_key("app/a", "1")));
    let cache = Arc::new(MemoryCache::new());
    let rules = MappingRules::new().tree(KeyTreeMapping::nested("app/", "App"));
    let provider = provider(&registry, &cache, rules);
    let changes = provider.subscribe();

    assert_eq!(provider.load_with_source().unwrap(), LoadSource::Live);
    assert!(changes.recv_timeout(WAIT).is_some());

    // The cache keeps holding "1" while the live map moves on to "2".
    cache.set_fail_saves(true);
    registry.publish(RegistrySnapshot::new().with_key("app/a", "2"));
    assert!(changes.recv_timeout(WAIT).is_some());
    assert_eq!(cache.stored().unwrap().get("app:a"), Some("1"));

    registry.begin_outage(RegistryError::unavailable("partition"));
    assert_eq!(provider.load_with_source().unwrap(), LoadSource::Live);
    assert_eq!(provider.get("app:a").as_deref(), Some("2"));
    assert_ne!(provider.state(), LoadState::LoadedCache);
    assert!(provider.state().is_loaded());
    assert!(provider.is_reloading());
}
