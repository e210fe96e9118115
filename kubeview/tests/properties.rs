#![deny(rust_2018_idioms)]

use k8s_openapi::{
    api::core::v1::{Event, ObjectReference, Pod, PodCondition, PodStatus},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kubeview::{
    cache::{Selector, Writers},
    channels::ResourceChannels,
    event::derive_warnings,
    podinfo::PodInfo,
    IndexerCache, NamespaceQuery,
};
use maplit::{btreemap, convert_args};
use std::{sync::Arc, time::Duration};
use tokio::time;
use tokio_util::sync::CancellationToken;

const PHASES: [&str; 5] = ["Running", "Pending", "Failed", "Succeeded", "Unknown"];

#[test]
fn pod_counts_never_exceed_pods() {
    for n in 0..PHASES.len() * 3 {
        let pods = (0..n)
            .map(|i| Arc::new(pod("ns", &format!("p{i}"), PHASES[i % PHASES.len()], i % 2 == 0)))
            .collect::<Vec<_>>();
        let info = PodInfo::new(n as i32, Some(n as i32), &pods);
        let counted = info.running + info.pending + info.failed + info.succeeded;
        assert!(counted as usize <= pods.len(), "{info:?}");
    }
}

#[test]
fn warning_derivation_is_idempotent() {
    let pods = PHASES
        .iter()
        .enumerate()
        .map(|(i, phase)| Arc::new(pod("ns", &format!("p{i}"), phase, i % 2 == 1)))
        .collect::<Vec<_>>();
    let reasons = ["BackOff", "FailedMount", "Pulled", "Unhealthy", "Scheduled"];
    let events = (0..20)
        .map(|i| {
            let target = &pods[i % pods.len()].metadata;
            let type_ = match i % 3 {
                0 => None,
                1 => Some("Warning"),
                _ => Some("Normal"),
            };
            Arc::new(event(&format!("e{i}"), reasons[i % reasons.len()], type_, target))
        })
        .collect::<Vec<_>>();

    let once = derive_warnings(&events, &pods);
    let twice = derive_warnings(&once, &pods);
    assert_eq!(once, twice);
    assert!(!once.is_empty());

    let mut seen = std::collections::HashSet::new();
    assert!(once.iter().all(|e| seen.insert(e.reason.clone())));
}

#[tokio::test(flavor = "current_thread")]
async fn lists_are_scoped_by_namespace_and_labels() {
    let mut writers = Writers::default();
    for (ns, name, app) in [
        ("alice", "web-1", "web"),
        ("alice", "web-2", "web"),
        ("alice", "db-1", "db"),
        ("bob", "web-3", "web"),
    ] {
        let mut p = pod(ns, name, "Running", true);
        p.metadata.labels = Some(convert_args!(btreemap!("app" => app)));
        writers.apply(p);
    }
    let cache = Arc::new(IndexerCache::from_writers("test", &writers));

    let channels =
        ResourceChannels::new(cache, NamespaceQuery::one("alice"), CancellationToken::new());
    let web = channels.open_selected::<Pod>(Selector::eq("app", "web"));
    let everything = channels.open_in::<Pod>(NamespaceQuery::All, Selector::everything());

    let web = web.recv().await.expect("web pods");
    let names = web
        .iter()
        .map(|p| p.metadata.name.as_deref().unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(names, ["web-1", "web-2"]);
    assert_eq!(everything.recv().await.expect("pods").len(), 4);
    channels.close().await;
}

#[tokio::test(flavor = "current_thread")]
async fn producers_complete_with_the_request() {
    let mut writers = Writers::default();
    writers.apply(pod("alice", "web-1", "Running", true));
    let cache = Arc::new(IndexerCache::from_writers("test", &writers));

    // Sources that are read, dropped unread, or cancelled all leave no producer behind.
    let cancel = CancellationToken::new();
    let channels = ResourceChannels::new(cache, NamespaceQuery::All, cancel.clone());
    let read = channels.open::<Pod>();
    let unread = channels.open::<Event>();
    assert_eq!(read.recv().await.expect("pods").len(), 1);
    drop(unread);
    cancel.cancel();
    let cancelled = channels.open::<Pod>();
    assert!(cancelled.recv().await.is_err());

    time::timeout(Duration::from_secs(1), channels.close())
        .await
        .expect("producers must complete");
}

fn pod(ns: &str, name: &str, phase: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            uid: Some(format!("{ns}/{name}")),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn event(name: &str, reason: &str, type_: Option<&str>, involved: &ObjectMeta) -> Event {
    Event {
        metadata: ObjectMeta {
            namespace: involved.namespace.clone(),
            name: Some(name.to_string()),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        type_: type_.map(str::to_string),
        involved_object: ObjectReference {
            uid: involved.uid.clone(),
            ..Default::default()
        },
        ..Default::default()
    }
}
