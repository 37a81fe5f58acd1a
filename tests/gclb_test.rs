//! Integration tests for the gclb frontend against an in-memory Compute API.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use feed_ingress::config::GclbConfig;
use feed_ingress::gclb::{
    CloudError, CloudResult, ComputeApi, GclbUpdater, Instance, InstanceGroup, REGISTERED_FRONTENDS,
};
use feed_ingress::ingress::IngressUpdate;
use feed_ingress::updater::{FrontendError, Updater};

#[derive(Default)]
struct FakeCompute {
    /// Group name → member instance names.
    groups: Mutex<HashMap<String, HashSet<String>>>,
    fail_remove: HashSet<String>,
    metadata_calls: AtomicUsize,
    add_calls: AtomicUsize,
    delay: Duration,
}

impl FakeCompute {
    fn with_groups(names: &[&str]) -> Self {
        let mut groups = HashMap::new();
        groups.insert("unrelated-group".to_string(), HashSet::new());
        for name in names {
            groups.insert(name.to_string(), HashSet::new());
        }
        Self {
            groups: Mutex::new(groups),
            ..Self::default()
        }
    }

    fn members(&self, group: &str) -> HashSet<String> {
        self.groups.lock().unwrap().get(group).cloned().unwrap_or_default()
    }

    fn join(&self, group: &str, instance: &str) {
        self.groups
            .lock()
            .unwrap()
            .get_mut(group)
            .unwrap()
            .insert(instance.to_string());
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn self_instance(&self) -> CloudResult<Instance> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Instance {
            project: "ingress-prod".into(),
            zone: "europe-west1-b".into(),
            name: "node-1".into(),
            id: "4021".into(),
        })
    }

    async fn find_instance_groups(
        &self,
        project: &str,
        zone: &str,
        prefix: &str,
    ) -> CloudResult<Vec<InstanceGroup>> {
        assert_eq!((project, zone), ("ingress-prod", "europe-west1-b"));
        let mut names: Vec<_> = self
            .groups
            .lock()
            .unwrap()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names.into_iter().map(InstanceGroup::new).collect())
    }

    async fn is_member(&self, instance: &Instance, group: &str) -> CloudResult<bool> {
        Ok(self.members(group).contains(&instance.name))
    }

    async fn add_instance(&self, instance: &Instance, group: &str) -> CloudResult<()> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.join(group, &instance.name);
        Ok(())
    }

    async fn remove_instance(&self, instance: &Instance, group: &str) -> CloudResult<()> {
        if self.fail_remove.contains(group) {
            return Err(CloudError::Api {
                status: 503,
                message: "backend unavailable".into(),
            });
        }
        self.groups
            .lock()
            .unwrap()
            .get_mut(group)
            .unwrap()
            .remove(&instance.name);
        Ok(())
    }
}

fn gclb_config(expected: usize) -> GclbConfig {
    GclbConfig {
        enabled: true,
        instance_group_prefix: "ingress-".into(),
        expected_frontends: expected,
        drain_delay_ms: 10,
        ..GclbConfig::default()
    }
}

#[tokio::test]
async fn test_attaches_to_every_matching_group() {
    let api = Arc::new(FakeCompute::with_groups(&["ingress-a", "ingress-b"]));
    let gclb = GclbUpdater::new(gclb_config(2), api.clone());

    assert_eq!(gclb.health().unwrap_err().to_string(), "gclb is not running");
    gclb.start().await.unwrap();
    assert!(matches!(gclb.health(), Err(FrontendError::WaitingForInitialUpdate)));
    assert!(api.members("ingress-a").is_empty());

    gclb.update(&IngressUpdate::default()).await.unwrap();
    assert!(api.members("ingress-a").contains("node-1"));
    assert!(api.members("ingress-b").contains("node-1"));
    assert!(api.members("unrelated-group").is_empty());
    assert_eq!(gclb.registered_frontends(), 2);
    assert_eq!(gclb.metrics().gauge_value(REGISTERED_FRONTENDS), Some(2.0));
    assert!(gclb.health().is_ok());

    // Later updates do not touch the cloud again.
    gclb.update(&IngressUpdate::default()).await.unwrap();
    assert_eq!(api.add_calls.load(Ordering::SeqCst), 2);
    assert_eq!(api.metadata_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_existing_membership_counts_as_registered() {
    let api = Arc::new(FakeCompute::with_groups(&["ingress-a", "ingress-b"]));
    api.join("ingress-a", "node-1");
    let gclb = GclbUpdater::new(gclb_config(2), api.clone());
    gclb.start().await.unwrap();

    gclb.update(&IngressUpdate::default()).await.unwrap();
    assert_eq!(api.add_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gclb.registered_frontends(), 2);
}

#[tokio::test]
async fn test_count_mismatch_keeps_attachments() {
    let api = Arc::new(FakeCompute::with_groups(&["ingress-a", "ingress-b"]));
    let gclb = GclbUpdater::new(gclb_config(3), api.clone());
    gclb.start().await.unwrap();

    let err = gclb.update(&IngressUpdate::default()).await.unwrap_err();
    assert!(matches!(
        err,
        FrontendError::AttachMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert_eq!(err.to_string(), "expected frontends: 3, registered: 2");
    assert!(api.members("ingress-a").contains("node-1"));
    assert!(api.members("ingress-b").contains("node-1"));

    let health = gclb.health().unwrap_err();
    assert_eq!(health.to_string(), "expected frontends: 3, registered: 2");
}

#[tokio::test]
async fn test_unchecked_count_is_always_healthy() {
    let api = Arc::new(FakeCompute::with_groups(&[]));
    let gclb = GclbUpdater::new(gclb_config(0), api);
    gclb.start().await.unwrap();

    gclb.update(&IngressUpdate::default()).await.unwrap();
    assert_eq!(gclb.registered_frontends(), 0);
    assert!(gclb.health().is_ok());
}

#[tokio::test]
async fn test_concurrent_first_updates_attach_once() {
    let api = Arc::new(FakeCompute {
        delay: Duration::from_millis(100),
        ..FakeCompute::with_groups(&["ingress-a", "ingress-b"])
    });
    let gclb = Arc::new(GclbUpdater::new(gclb_config(2), api.clone()));
    gclb.start().await.unwrap();

    let callers: Vec<_> = (0..5)
        .map(|_| {
            let gclb = gclb.clone();
            tokio::spawn(async move { gclb.update(&IngressUpdate::default()).await })
        })
        .collect();
    for caller in callers {
        caller.await.unwrap().unwrap();
    }

    assert_eq!(api.metadata_calls.load(Ordering::SeqCst), 1);
    assert_eq!(api.add_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_waiters_observe_first_outcome() {
    let api = Arc::new(FakeCompute {
        delay: Duration::from_millis(100),
        ..FakeCompute::with_groups(&["ingress-a"])
    });
    let gclb = Arc::new(GclbUpdater::new(gclb_config(2), api.clone()));
    gclb.start().await.unwrap();

    let callers: Vec<_> = (0..3)
        .map(|_| {
            let gclb = gclb.clone();
            tokio::spawn(async move { gclb.update(&IngressUpdate::default()).await })
        })
        .collect();
    for caller in callers {
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, FrontendError::AttachMismatch { .. }));
    }
    assert_eq!(api.metadata_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_detach_failure_is_reported_after_trying_every_group() {
    let mut api = FakeCompute::with_groups(&["ingress-a", "ingress-b"]);
    api.fail_remove.insert("ingress-a".into());
    let api = Arc::new(api);

    let mut config = gclb_config(2);
    config.drain_delay_ms = 200;
    let gclb = GclbUpdater::new(config, api.clone());
    gclb.start().await.unwrap();
    gclb.update(&IngressUpdate::default()).await.unwrap();

    let started = Instant::now();
    let err = gclb.stop().await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(200));

    match &err {
        FrontendError::PartialDetachFailure { failed } => assert_eq!(failed, &vec!["ingress-a".to_string()]),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(err.to_string(), "failed to detach from 1 instance group(s): ingress-a");
    assert!(api.members("ingress-a").contains("node-1"));
    assert!(api.members("ingress-b").is_empty());
    assert!(matches!(gclb.health(), Err(FrontendError::NotRunning("gclb"))));
}

#[tokio::test]
async fn test_clean_stop_detaches_and_drains() {
    let api = Arc::new(FakeCompute::with_groups(&["ingress-a", "ingress-b"]));
    let mut config = gclb_config(2);
    config.drain_delay_ms = 100;
    let gclb = GclbUpdater::new(config, api.clone());
    gclb.start().await.unwrap();
    gclb.update(&IngressUpdate::default()).await.unwrap();

    let started = Instant::now();
    gclb.stop().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(api.members("ingress-a").is_empty());
    assert!(api.members("ingress-b").is_empty());
    assert_eq!(gclb.metrics().gauge_value(REGISTERED_FRONTENDS), Some(0.0));
}
