use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use simsync::{InMemorySimulation, RegistryConfig, SessionFactory, SessionRegistry, SimulationHandle, SyncResult};

fn recording_factory(created: Arc<Mutex<Vec<Arc<InMemorySimulation>>>>) -> Arc<dyn SessionFactory> {
    Arc::new(move |_: &str| -> SyncResult<Arc<dyn SimulationHandle>> {
        let sim = Arc::new(InMemorySimulation::new());
        created.lock().unwrap().push(Arc::clone(&sim));
        Ok(sim)
    })
}

#[test]
fn idle_session_is_stopped_once_within_cleanup_interval() {
    let cfg = RegistryConfig {
        inactivity_limit_ms: 200,
        cleanup_interval_ms: 300,
        sweep_tick_ms: 20,
    };
    let created = Arc::new(Mutex::new(Vec::new()));
    let registry = SessionRegistry::new(cfg.clone(), recording_factory(Arc::clone(&created)));
    registry.start().unwrap();

    registry.get_or_create("idle").unwrap();
    let crossed_at = Instant::now() + cfg.inactivity_limit();
    let bound = cfg.cleanup_interval() + Duration::from_secs(1);

    while registry.exists("idle") {
        assert!(Instant::now() < crossed_at + bound, "session outlived its expiry bound");
        thread::sleep(Duration::from_millis(10));
    }

    // Let a few more sweeps run; the handle must not be stopped again.
    thread::sleep(cfg.cleanup_interval() * 2);
    let sims = created.lock().unwrap().clone();
    assert_eq!(sims.len(), 1);
    assert_eq!(sims[0].stop_count(), 1);

    registry.stop().unwrap();
    assert_eq!(sims[0].stop_count(), 1);
}

#[test]
fn active_session_survives_sweeps() {
    let cfg = RegistryConfig {
        inactivity_limit_ms: 150,
        cleanup_interval_ms: 50,
        sweep_tick_ms: 10,
    };
    let created = Arc::new(Mutex::new(Vec::new()));
    let registry = SessionRegistry::new(cfg, recording_factory(Arc::clone(&created)));
    registry.start().unwrap();

    registry.get_or_create("busy").unwrap();
    let until = Instant::now() + Duration::from_millis(600);
    while Instant::now() < until {
        assert!(registry.get("busy").unwrap().is_some());
        thread::sleep(Duration::from_millis(30));
    }

    registry.stop().unwrap();
    assert_eq!(created.lock().unwrap()[0].stop_count(), 1);
    assert_eq!(registry.total(), 0);
}

#[test]
fn expired_id_is_recreated_on_next_access() {
    let cfg = RegistryConfig {
        inactivity_limit_ms: 50,
        cleanup_interval_ms: 1000,
        sweep_tick_ms: 10,
    };
    let created = Arc::new(Mutex::new(Vec::new()));
    let registry = SessionRegistry::new(cfg, recording_factory(Arc::clone(&created)));

    let first = registry.get_or_create("s").unwrap();
    thread::sleep(Duration::from_millis(80));
    assert_eq!(registry.sweep().unwrap(), vec!["s".to_string()]);

    let second = registry.get_or_create("s").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(created.lock().unwrap().len(), 2);
}
