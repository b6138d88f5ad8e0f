// crates/algo-core/tests/lifecycle.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use algo_core::{
    AlgoError, AlgoRef, Confirmation, ExecType, MemoryEventLog, ParamError, ParamValue,
    RecordKind, SecurityId,
};

use common::*;

#[test]
fn spawn_assigns_distinct_ids_and_tokens() {
    let h = harness(2, Arc::new(MemoryEventLog::new()));

    let a = h.manager.spawn("probe", "a", user(), &probe_params(1, 0.0)).unwrap();
    let b = h.manager.spawn("probe", "b", user(), &probe_params(2, 0.0)).unwrap();
    let c = h.manager.spawn("probe", "", user(), &probe_params(3, 0.0)).unwrap();

    assert_ne!(a, b);
    assert_ne!(b, c);
    assert_eq!(h.manager.get_by_token("a").unwrap().id, a);
    assert_eq!(h.manager.get_by_token("b").unwrap().id, b);
    assert_eq!(h.manager.get(c).unwrap().token, format!("probe-{c}"));
    assert_eq!(h.manager.algo_count(), 3);
    assert_eq!(h.probe.events(a), vec![Event::Started]);

    // Two lanes, round-robin.
    let lanes: Vec<usize> = h.manager.snapshot().iter().map(|s| s.lane).collect();
    assert_eq!(lanes, vec![0, 1, 0]);
}

#[test]
fn spawn_rejects_without_side_effects() {
    let log = Arc::new(MemoryEventLog::new());
    let h = harness(1, log.clone());

    let err = h.manager.spawn("probe", "t", user(), &Default::default()).unwrap_err();
    assert!(matches!(err, AlgoError::InvalidParams(ParamError::MissingRequired(ref name)) if name == "security"));
    assert_eq!(err.to_string(), "missing required parameter: security");

    let mut params = probe_params(1, 0.0);
    params.insert("price".to_string(), ParamValue::Double(-1.0));
    let err = h.manager.spawn("probe", "t", user(), &params).unwrap_err();
    assert!(matches!(err, AlgoError::InvalidParams(ParamError::OutOfRange { .. })));

    let err = h.manager.spawn("nope", "t", user(), &probe_params(1, 0.0)).unwrap_err();
    assert!(matches!(err, AlgoError::UnknownAlgoType(_)));

    assert_eq!(h.manager.algo_count(), 0);
    assert!(log.records().is_empty());
    assert!(!h.manager.is_subscribed(src(), SecurityId(1)));
}

#[test]
fn duplicate_token_is_refused() {
    let h = harness(1, Arc::new(MemoryEventLog::new()));
    h.manager.spawn("probe", "dup", user(), &probe_params(1, 0.0)).unwrap();
    let err = h.manager.spawn("probe", "dup", user(), &probe_params(1, 0.0)).unwrap_err();
    assert!(matches!(err, AlgoError::DuplicateToken(ref t) if t == "dup"));
    assert_eq!(h.manager.algo_count(), 1);
}

#[test]
fn failed_start_record_leaves_nothing_registered() {
    let log = Arc::new(MemoryEventLog::new());
    let h = harness(1, log.clone());

    log.set_failing(true);
    let err = h.manager.spawn("probe", "t", user(), &probe_params(1, 0.0)).unwrap_err();
    assert!(matches!(err, AlgoError::Persistence(_)));
    assert_eq!(h.manager.algo_count(), 0);

    // The token was not burnt.
    log.set_failing(false);
    h.manager.spawn("probe", "t", user(), &probe_params(1, 0.0)).unwrap();
}

#[test]
fn refused_on_start_stops_and_releases() {
    let log = Arc::new(MemoryEventLog::new());
    let h = harness(1, log.clone());
    let mut params = probe_params(4, 0.0);
    params.insert("fail".to_string(), ParamValue::Bool(true));

    let err = h.manager.spawn("probe", "f", user(), &params).unwrap_err();
    assert!(matches!(err, AlgoError::StartFailed(ref reason) if reason == "told to fail"));

    assert_eq!(h.manager.algo_count(), 0);
    assert!(h.manager.get_by_token("f").is_none());
    assert_eq!(h.manager.subscription_count(src(), SecurityId(4)), 0);
    assert_eq!(h.feed.subscribes(key(4)), 1);
    assert_eq!(h.feed.unsubscribes(key(4)), 1);

    let kinds: Vec<RecordKind> = log.records().iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![RecordKind::Start, RecordKind::Stop]);
    assert_eq!(log.records()[1].status, "start failed: told to fail");
}

#[test]
fn modify_is_persisted_and_delivered() {
    let log = Arc::new(MemoryEventLog::new());
    let h = harness(1, log.clone());
    let id = h.manager.spawn("probe", "m", user(), &probe_params(1, 0.0)).unwrap();

    h.manager.modify_raw(&AlgoRef::Token("m".into()), r#"{"price": 12.5}"#).unwrap();
    h.manager.sync();

    let mut expected = algo_core::ParamMap::new();
    expected.insert("price".to_string(), ParamValue::Double(12.5));
    assert_eq!(h.probe.events(id), vec![Event::Started, Event::Modified(expected)]);
    assert_eq!(log.records().last().unwrap().kind, RecordKind::Modify);

    let err = h.manager.modify_raw(&AlgoRef::Id(id), r#"{"price": 2000000}"#).unwrap_err();
    assert!(matches!(err, AlgoError::InvalidParams(ParamError::OutOfRange { .. })));

    let err = h.manager.modify_raw(&AlgoRef::Id(999), "{}").unwrap_err();
    assert!(matches!(err, AlgoError::NotFound(_)));
}

#[test]
fn stop_is_idempotent_and_on_stop_comes_last() {
    let log = Arc::new(MemoryEventLog::new());
    let h = harness(1, log.clone());
    let id = h.manager.spawn("probe", "s", user(), &probe_params(1, 0.0)).unwrap();

    assert!(h.manager.stop(&AlgoRef::Id(id)).unwrap());
    // Still registered until the lane has run on_stop.
    let _ = h.manager.stop(&AlgoRef::Id(id));
    h.manager.sync();

    assert_eq!(h.probe.events(id).last(), Some(&Event::Stopped { active: false }));
    assert!(h.manager.get(id).is_none());
    assert!(matches!(h.manager.stop(&AlgoRef::Id(id)), Err(AlgoError::NotFound(_))));

    let stops = log.records().iter().filter(|r| r.kind == RecordKind::Stop).count();
    assert_eq!(stops, 1);
}

#[test]
fn modify_after_stop_is_refused() {
    let h = harness(1, Arc::new(MemoryEventLog::new()));
    let id = h.manager.spawn("probe", "s", user(), &probe_params(1, 0.0)).unwrap();
    let gate = h.probe.install_gate();

    // Park the lane so the stop cannot complete yet.
    h.manager.set_timeout(&AlgoRef::Id(id), Duration::ZERO, PARK).unwrap();
    gate.wait();
    h.manager.stop(&AlgoRef::Id(id)).unwrap();
    let err = h.manager.modify_raw(&AlgoRef::Id(id), "{}").unwrap_err();
    assert!(matches!(err, AlgoError::Inactive(i) if i == id));
    gate.wait();
    h.manager.sync();

    assert!(h.probe.events(id).iter().all(|e| !matches!(e, Event::Modified(_))));
}

#[test]
fn stop_all_and_stop_security() {
    let h = harness(2, Arc::new(MemoryEventLog::new()));
    let a = h.manager.spawn("probe", "a", user(), &probe_params(1, 0.0)).unwrap();
    let b = h.manager.spawn("probe", "b", user(), &probe_params(2, 0.0)).unwrap();
    let c = h.manager.spawn("probe", "c", user(), &probe_params(2, 0.0)).unwrap();

    assert_eq!(h.manager.stop_security(SecurityId(2)), 2);
    h.manager.sync();
    assert!(h.manager.get(a).is_some());
    assert!(h.manager.get(b).is_none());
    assert!(h.manager.get(c).is_none());
    assert!(!h.manager.is_subscribed(src(), SecurityId(2)));

    assert_eq!(h.manager.stop_all(), 1);
    h.manager.sync();
    assert_eq!(h.manager.algo_count(), 0);
}

#[test]
fn shared_subscription_is_released_with_its_last_instrument() {
    let h = harness(2, Arc::new(MemoryEventLog::new()));
    let one = h.manager.spawn("probe", "one", user(), &probe_params(5, 0.0)).unwrap();
    let two = h.manager.spawn("probe", "two", user(), &probe_params(5, 0.0)).unwrap();

    assert_eq!(h.manager.subscription_count(src(), SecurityId(5)), 2);
    assert_eq!(h.feed.subscribes(key(5)), 1);

    h.manager.stop(&AlgoRef::Id(one)).unwrap();
    h.manager.sync();
    assert_eq!(h.manager.subscription_count(src(), SecurityId(5)), 1);
    assert_eq!(h.feed.unsubscribes(key(5)), 0);

    h.manager.stop(&AlgoRef::Id(two)).unwrap();
    h.manager.sync();
    assert_eq!(h.manager.subscription_count(src(), SecurityId(5)), 0);
    assert_eq!(h.feed.unsubscribes(key(5)), 1);
    assert!(!h.manager.update(src(), SecurityId(5)));
}

#[test]
fn fill_moves_outstanding_into_bought() {
    let h = harness(1, Arc::new(MemoryEventLog::new()));
    let id = h.manager.spawn("probe", "f", user(), &probe_params(9, 100.0)).unwrap();
    let order = h.router.placed_by(id).pop().unwrap();
    assert_eq!(order.contract.qty, 100.0);

    h.manager.handle(&Confirmation::new(order.id, ExecType::New)).unwrap();
    h.manager.sync();
    let before = h.manager.get(id).unwrap().instruments[0].exposure;
    assert_eq!(before.outstanding_buy_qty, 100.0);

    h.manager.handle(&Confirmation::fill(order.id, 100.0, 10.0, true)).unwrap();
    let after = h.manager.get(id).unwrap().instruments[0].exposure;
    assert_eq!(after.bought_qty, 100.0);
    assert_eq!(after.outstanding_buy_qty, before.outstanding_buy_qty - 100.0);
    assert_eq!(after.net_qty(), 100.0);
    assert_eq!(h.manager.get(id).unwrap().instruments[0].active_orders, 0);

    h.manager.sync();
    let confirmations: Vec<Event> = h
        .probe
        .events(id)
        .into_iter()
        .filter(|e| matches!(e, Event::Confirmed { .. }))
        .collect();
    assert_eq!(
        confirmations,
        vec![
            Event::Confirmed { exec_type: ExecType::New, bought: 0.0, outstanding: 100.0 },
            Event::Confirmed { exec_type: ExecType::Filled, bought: 100.0, outstanding: 0.0 },
        ]
    );

    // The order is gone once filled.
    let err = h.manager.handle(&Confirmation::fill(order.id, 1.0, 10.0, false)).unwrap_err();
    assert!(matches!(err, AlgoError::NotFound(_)));
}

#[test]
fn confirmation_is_not_applied_when_it_cannot_be_persisted() {
    let log = Arc::new(MemoryEventLog::new());
    let h = harness(1, log.clone());
    let id = h.manager.spawn("probe", "p", user(), &probe_params(9, 50.0)).unwrap();
    let order = h.router.placed_by(id).pop().unwrap();

    log.set_failing(true);
    let err = h.manager.handle(&Confirmation::new(order.id, ExecType::New)).unwrap_err();
    assert!(matches!(err, AlgoError::Persistence(_)));
    assert_eq!(h.manager.get(id).unwrap().instruments[0].exposure.outstanding_buy_qty, 0.0);

    log.set_failing(false);
    h.manager.handle(&Confirmation::new(order.id, ExecType::New)).unwrap();
    assert_eq!(h.manager.get(id).unwrap().instruments[0].exposure.outstanding_buy_qty, 50.0);
}

#[test]
fn live_orders_are_forgotten_once_the_algo_finishes() {
    let log = Arc::new(MemoryEventLog::new());
    let h = harness(1, log.clone());
    let id = h.manager.spawn("probe", "l", user(), &probe_params(9, 20.0)).unwrap();
    let order = h.router.placed_by(id).pop().unwrap();
    h.manager.handle(&Confirmation::new(order.id, ExecType::New)).unwrap();

    h.manager.stop(&AlgoRef::Id(id)).unwrap();
    h.manager.sync();
    assert!(h.manager.get(id).is_none());

    // The venue never answered a cancel; a late fill finds nothing.
    let err = h.manager.handle(&Confirmation::fill(order.id, 5.0, 10.0, false)).unwrap_err();
    assert!(matches!(err, AlgoError::NotFound(_)));
    assert_eq!(log.records().last().unwrap().kind, RecordKind::Stop);
}

#[test]
fn router_rejection_is_reported_to_the_algo() {
    let h = harness(1, Arc::new(MemoryEventLog::new()));
    h.router.set_reject(true);
    let err = h.manager.spawn("probe", "r", user(), &probe_params(9, 10.0)).unwrap_err();
    assert!(matches!(err, AlgoError::StartFailed(ref reason) if reason.contains("venue closed")));
    assert!(h.router.placed().is_empty());
}

#[test]
fn timers_fire_on_the_lane_and_can_stop_the_algo() {
    let h = harness(1, Arc::new(MemoryEventLog::new()));
    let id = h.manager.spawn("probe", "t", user(), &probe_params(1, 0.0)).unwrap();

    h.manager.set_timeout(&AlgoRef::Id(id), Duration::from_millis(10), 1).unwrap();
    assert!(wait_for(Duration::from_secs(5), || h.probe.events(id).contains(&Event::Timer(1))));

    h.manager.set_timeout(&AlgoRef::Id(id), Duration::ZERO, STOP_SELF).unwrap();
    assert!(wait_for(Duration::from_secs(5), || h.manager.get(id).is_none()));
    let events = h.probe.events(id);
    assert_eq!(events[events.len() - 2], Event::Timer(STOP_SELF));
    assert_eq!(events[events.len() - 1], Event::Stopped { active: false });
}
