//! Daemon regression tests.
//!
//! Drives whole rollouts through the tick driver against a local scheduler,
//! the way `capstand run` does, and checks the stored records afterwards.

use std::path::Path;
use std::time::Duration;

use capstan_core::{CapstanConfig, StepPolicy};
use capstan_scheduler::{InstanceScheduler, LocalScheduler};
use capstan_state::*;
use capstand::{StoreAccess, TickDriver, local_updater, open_when_free};
use tokio::sync::watch;

struct Daemon {
    store: StateStore,
    scheduler: LocalScheduler,
    driver: TickDriver<LocalScheduler>,
}

fn daemon(store: StateStore, policy: StepPolicy) -> Daemon {
    let scheduler = LocalScheduler::new(store.clone(), true);
    let driver = TickDriver::new(
        StoreAccess::Shared(store.clone()),
        local_updater(policy, true),
        Duration::from_millis(10),
    );
    Daemon {
        store,
        scheduler,
        driver,
    }
}

async fn create(
    daemon: &Daemon,
    id: &str,
    app: &str,
    stable: u32,
    desired: u32,
    canary: Option<u32>,
) {
    let deployment = Deployment::new(
        NewDeployment {
            id: id.to_string(),
            app_id: app.to_string(),
            version: "v2".to_string(),
            previous_version: "v1".to_string(),
            original_instances: stable,
            desired_web_instances: desired,
            canary_total_instances: canary,
        },
        1000,
    )
    .unwrap();
    daemon.store.create_deployment(&deployment).unwrap();
    daemon
        .scheduler
        .set_instance_count(app, "v1", stable)
        .await
        .unwrap();
}

fn phase(daemon: &Daemon, id: &str) -> DeploymentPhase {
    daemon.store.get_deployment(id).unwrap().unwrap().phase
}

async fn tick_until(daemon: &Daemon, id: &str, want: DeploymentPhase) -> usize {
    for pass in 1..=20 {
        daemon.driver.tick_all().await;
        if phase(daemon, id) == want {
            return pass;
        }
    }
    panic!("{id} never reached {want}, stuck at {}", phase(daemon, id));
}

#[tokio::test]
async fn rollout_reaches_deployed_and_stops_ticking() {
    let d = daemon(StateStore::open_in_memory().unwrap(), StepPolicy::default());
    create(&d, "dep-web", "web", 3, 3, None).await;

    tick_until(&d, "dep-web", DeploymentPhase::Deployed).await;

    let record = d.store.get_deployment("dep-web").unwrap().unwrap();
    assert_eq!(record.deploying_instances, 3);
    assert_eq!(record.stable_instances, 0);
    assert_eq!(record.status_value, StatusValue::Finalized);
    assert_eq!(record.error, None);
    assert_eq!(d.scheduler.instance_count("web", "v1").unwrap(), 0);
    assert_eq!(d.scheduler.instance_count("web", "v2").unwrap(), 3);

    let revision = record.revision;
    assert_eq!(d.driver.tick_all().await, 0);
    assert_eq!(d.store.get_deployment("dep-web").unwrap().unwrap().revision, revision);
}

#[tokio::test]
async fn canary_pauses_until_promoted() {
    let d = daemon(StateStore::open_in_memory().unwrap(), StepPolicy::default());
    create(&d, "dep-api", "api", 4, 4, Some(2)).await;

    tick_until(&d, "dep-api", DeploymentPhase::Paused).await;

    let paused = d.store.get_deployment("dep-api").unwrap().unwrap();
    assert_eq!(paused.deploying_instances, 2);
    assert_eq!(paused.stable_instances, 2);
    assert_eq!(paused.status_value, StatusValue::Active);
    assert_eq!(paused.status_reason, StatusReason::Paused);
    assert!(paused.last_healthy_at.is_some());

    // Paused deployments are left alone.
    assert_eq!(d.driver.tick_all().await, 0);
    assert_eq!(d.scheduler.instance_count("api", "v2").unwrap(), 2);

    let mut promoted = false;
    d.store
        .update_deployment("dep-api", |dep| promoted = dep.promote())
        .unwrap();
    assert!(promoted);

    tick_until(&d, "dep-api", DeploymentPhase::Deployed).await;
    assert_eq!(d.scheduler.instance_count("api", "v1").unwrap(), 0);
    assert_eq!(d.scheduler.instance_count("api", "v2").unwrap(), 4);
}

#[tokio::test]
async fn cancel_request_reverts_on_next_pass() {
    let d = daemon(StateStore::open_in_memory().unwrap(), StepPolicy::default());
    create(&d, "dep-worker", "worker", 3, 5, None).await;

    for _ in 0..3 {
        d.driver.tick_all().await;
    }
    assert!(d.scheduler.instance_count("worker", "v2").unwrap() > 0);

    d.store
        .update_deployment("dep-worker", |dep| {
            assert!(dep.request_cancel());
        })
        .unwrap();
    assert_eq!(d.driver.tick_all().await, 1);

    let record = d.store.get_deployment("dep-worker").unwrap().unwrap();
    assert_eq!(record.phase, DeploymentPhase::Canceled);
    assert_eq!(record.status_reason, StatusReason::Canceled);
    assert_eq!(record.deploying_instances, 0);
    assert_eq!(record.stable_instances, 3);
    assert_eq!(d.scheduler.instance_count("worker", "v1").unwrap(), 3);
    assert_eq!(d.scheduler.instance_count("worker", "v2").unwrap(), 0);
}

#[tokio::test]
async fn independent_deployments_progress_in_one_pass() {
    let d = daemon(
        StateStore::open_in_memory().unwrap(),
        StepPolicy::Fraction { percent: 50 },
    );
    create(&d, "dep-a", "app-a", 4, 4, None).await;
    create(&d, "dep-b", "app-b", 2, 2, Some(1)).await;

    assert_eq!(d.driver.tick_all().await, 2);

    let a = d.store.get_deployment("dep-a").unwrap().unwrap();
    assert_eq!(a.deploying_instances, 2);
    let b = d.store.get_deployment("dep-b").unwrap().unwrap();
    assert_eq!(b.canary.unwrap().current_instance_target, 1);

    tick_until(&d, "dep-a", DeploymentPhase::Deployed).await;
    tick_until(&d, "dep-b", DeploymentPhase::Paused).await;
}

#[tokio::test]
async fn rollout_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CapstanConfig::default();
    config.store.data_dir = dir.path().to_path_buf();
    let db_path = config.database_path();

    {
        let d = daemon(StateStore::open(&db_path).unwrap(), StepPolicy::default());
        create(&d, "dep-web", "web", 2, 2, None).await;
        d.driver.tick_all().await;
        d.driver.tick_all().await;
    }

    let d = daemon(StateStore::open(&db_path).unwrap(), StepPolicy::default());
    let record = d.store.get_deployment("dep-web").unwrap().unwrap();
    assert_eq!(record.phase, DeploymentPhase::Deploying);
    assert_eq!(record.deploying_instances, 2);
    assert_eq!(record.stable_instances, 1);
    assert_eq!(d.scheduler.instance_count("web", "v2").unwrap(), 2);

    tick_until(&d, "dep-web", DeploymentPhase::Deployed).await;
}

#[tokio::test]
async fn run_loop_exits_on_shutdown() {
    let d = daemon(StateStore::open_in_memory().unwrap(), StepPolicy::default());
    create(&d, "dep-web", "web", 1, 1, None).await;

    let (tx, rx) = watch::channel(false);
    let Daemon { store, driver, .. } = d;
    let handle = tokio::spawn(async move { driver.run(rx).await });

    let mut deployed = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if store.get_deployment("dep-web").unwrap().unwrap().phase == DeploymentPhase::Deployed {
            deployed = true;
            break;
        }
    }
    tx.send(true).unwrap();
    handle.await.unwrap();
    assert!(deployed, "run loop never finished the rollout");
}

async fn wait_for_record(
    db_path: &Path,
    id: &str,
    done: impl Fn(&Deployment) -> bool,
) -> Deployment {
    for _ in 0..200 {
        let record = {
            let store = open_when_free(db_path, Duration::from_secs(5)).await.unwrap();
            store.get_deployment(id).unwrap().unwrap()
        };
        if done(&record) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{id} never reached the expected state");
}

#[tokio::test]
async fn cancel_reaches_running_daemon_through_on_disk_store() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("capstan.redb");
    {
        let d = daemon(StateStore::open(&db_path).unwrap(), StepPolicy::default());
        create(&d, "dep-web", "web", 3, 5, None).await;
    }

    // New instances never turn healthy, so the rollout holds mid-way.
    let driver = TickDriver::new(
        StoreAccess::PerPass(db_path.clone()),
        local_updater(StepPolicy::default(), false),
        Duration::from_millis(10),
    );
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { driver.run(rx).await });

    wait_for_record(&db_path, "dep-web", |d| d.deploying_instances > 0).await;

    let mut requested = false;
    {
        let store = open_when_free(&db_path, Duration::from_secs(5)).await.unwrap();
        store
            .update_deployment("dep-web", |d| requested = d.request_cancel())
            .unwrap();
    }
    assert!(requested);

    let record =
        wait_for_record(&db_path, "dep-web", |d| d.phase == DeploymentPhase::Canceled).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(record.stable_instances, 3);
    assert_eq!(record.deploying_instances, 0);
    let scheduler = LocalScheduler::new(StateStore::open(&db_path).unwrap(), true);
    assert_eq!(scheduler.instance_count("web", "v1").unwrap(), 3);
    assert_eq!(scheduler.instance_count("web", "v2").unwrap(), 0);
}

#[tokio::test]
async fn busy_store_skips_the_pass() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("capstan.redb");
    let d = daemon(StateStore::open(&db_path).unwrap(), StepPolicy::default());
    create(&d, "dep-web", "web", 1, 1, None).await;

    let driver = TickDriver::new(
        StoreAccess::PerPass(db_path.clone()),
        local_updater(StepPolicy::default(), true),
        Duration::from_millis(10),
    );
    assert_eq!(driver.tick_all().await, 0);

    drop(d);
    assert_eq!(driver.tick_all().await, 1);
}
