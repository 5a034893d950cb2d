// tests/action_manager.rs

use std::collections::BTreeMap;

use proptest::prelude::*;
use svcgraph::dag::{Action, DagGraph, EntityId, Service};
use svcgraph::engine::{ActionManager, DEFAULT_FANOUT};

/// Real action ids from a throwaway graph.
fn action_ids(count: usize) -> Vec<EntityId> {
    let mut graph = DagGraph::new();
    let service = graph.add_service("svc", Service::new());
    (0..count)
        .map(|i| {
            graph
                .add_action(service, format!("a{i}"), Action::new("true"))
                .expect("unique action name")
        })
        .collect()
}

#[test]
fn limit_is_the_lowest_fanout_in_flight() {
    let ids = action_ids(3);
    let mut manager = ActionManager::new(DEFAULT_FANOUT);
    assert_eq!(manager.fanout(), None);

    assert!(manager.add_task(ids[0], Some(60)));
    assert_eq!(manager.fanout(), Some(60));
    assert!(manager.add_task(ids[1], Some(12)));
    assert_eq!(manager.fanout(), Some(12));
    assert!(!manager.add_task(ids[2], Some(50)));
    assert_eq!(manager.fanout(), Some(12));
    assert_eq!(manager.in_flight(), 3);

    assert!(manager.remove_task(ids[1]));
    assert_eq!(manager.fanout(), Some(50));
    assert!(!manager.remove_task(ids[0]));
    assert!(manager.remove_task(ids[2]));
    assert_eq!(manager.fanout(), None);
    assert_eq!(manager.total_submitted(), 3);
}

#[test]
fn unset_or_zero_fanout_uses_the_default() {
    let ids = action_ids(2);
    let mut manager = ActionManager::new(16);

    manager.add_task(ids[0], None);
    manager.add_task(ids[1], Some(0));

    assert_eq!(manager.fanout(), Some(16));
    assert_eq!(manager.running_tasks().len(), 2);
}

#[test]
fn adding_twice_and_removing_unknown_are_no_ops() {
    let ids = action_ids(2);
    let mut manager = ActionManager::default();

    assert!(manager.add_task(ids[0], Some(4)));
    assert!(!manager.add_task(ids[0], Some(2)));
    assert_eq!(manager.fanout(), Some(4));
    assert_eq!(manager.total_submitted(), 1);

    assert!(!manager.remove_task(ids[1]));
    assert!(manager.contains(ids[0]));
    assert!(!manager.contains(ids[1]));
}

#[test]
fn clear_forgets_in_flight_actions() {
    let ids = action_ids(2);
    let mut manager = ActionManager::default();
    manager.add_task(ids[0], Some(3));
    manager.add_task(ids[1], None);

    manager.clear();

    assert_eq!(manager.fanout(), None);
    assert_eq!(manager.in_flight(), 0);
    assert_eq!(manager.total_submitted(), 2);
}

proptest! {
    #[test]
    fn limit_always_matches_the_tracked_minimum(
        ops in proptest::collection::vec((any::<bool>(), 0..6usize, 0..80usize), 1..60)
    ) {
        let ids = action_ids(6);
        let mut manager = ActionManager::new(DEFAULT_FANOUT);
        let mut model: BTreeMap<EntityId, usize> = BTreeMap::new();

        for (add, idx, fanout) in ops {
            let id = ids[idx];
            let before = manager.fanout();
            let changed = if add {
                if !model.contains_key(&id) {
                    model.insert(id, if fanout == 0 { DEFAULT_FANOUT } else { fanout });
                }
                manager.add_task(id, Some(fanout))
            } else {
                model.remove(&id);
                manager.remove_task(id)
            };

            let expected = model.values().min().copied();
            prop_assert_eq!(manager.fanout(), expected);
            prop_assert_eq!(changed, before != expected);
            prop_assert_eq!(manager.in_flight(), model.len());
        }
    }
}
