// ABOUTME: Integration tests for dependency grouping
// ABOUTME: Tests level assignment across generated DAGs, cycle detection and filtered grouping

use netsched::engine::{filters, DependencyGrouper, ExecutionContext, SchedulerError};
use netsched::network::{Connection, ExecutionState, Module, ModuleId, NetworkInterface};

mod common;
use common::TestNetworkBuilder;

/// Deterministic pseudo-random DAG: edges only ever point from lower to higher index.
fn generated_dag(size: usize, seed: u64) -> common::TestNetwork {
    let names: Vec<String> = (0..size).map(|i| format!("n{:03}", i)).collect();
    let mut builder = TestNetworkBuilder::new();
    for name in &names {
        builder = builder.module(name);
    }

    let mut state = seed;
    for to in 1..size {
        for from in 0..to {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            if (state >> 33) % 7 == 0 {
                builder = builder.edge(&names[from], &names[to]);
            }
        }
    }

    builder.build()
}

fn assert_edges_increase(network: &dyn NetworkInterface) {
    let order = DependencyGrouper::new().schedule(network).unwrap();
    assert_eq!(order.len(), network.module_count());

    for Connection { from, to } in network.connections() {
        let from_group = order.group_of(&from).unwrap();
        let to_group = order.group_of(&to).unwrap();
        assert!(from_group < to_group, "{} -> {}", from, to);
    }

    // Every module above group 0 sits exactly one level above its deepest dependency
    for (index, members) in order.groups() {
        for id in members {
            let deepest = network
                .dependencies(id)
                .iter()
                .filter_map(|dep| order.group_of(dep))
                .max();
            match deepest {
                Some(level) => assert_eq!(index, level + 1, "{}", id),
                None => assert_eq!(index, 0, "{}", id),
            }
        }
    }
}

#[test]
fn test_generated_dags_are_layered() {
    for seed in [1, 7, 42, 1234, 98765] {
        let test = generated_dag(30, seed);
        assert_edges_increase(test.network.as_ref());
    }
}

#[test]
fn test_diamond_grouping() {
    let test = TestNetworkBuilder::new()
        .modules(&["top", "left", "right", "bottom"])
        .edge("top", "left")
        .edge("top", "right")
        .edge("left", "bottom")
        .edge("right", "bottom")
        .build();

    let order = DependencyGrouper::new()
        .schedule(test.network.as_ref())
        .unwrap();
    assert_eq!(order.depth(), 3);
    assert_eq!(order.max_parallelism(), 2);
    assert_eq!(
        order.group(1),
        &[ModuleId::from("left"), ModuleId::from("right")]
    );
}

#[test]
fn test_cycle_anywhere_in_network_is_reported() {
    let test = TestNetworkBuilder::new()
        .modules(&["src", "a", "b", "c", "sink"])
        .edge("src", "a")
        .edge("a", "b")
        .edge("b", "c")
        .edge("c", "a")
        .edge("c", "sink")
        .build();

    match DependencyGrouper::new().schedule(test.network.as_ref()) {
        Err(SchedulerError::CyclicGraph { modules }) => {
            assert_eq!(
                modules,
                vec![ModuleId::from("a"), ModuleId::from("b"), ModuleId::from("c")]
            );
        }
        other => panic!("expected a cycle error, got {:?}", other.map(|o| o.len())),
    }
}

#[test]
fn test_grouping_follows_completion() {
    let test = TestNetworkBuilder::new()
        .modules(&["a", "b", "c"])
        .edge("a", "b")
        .edge("b", "c")
        .build();
    test.module("a").set_execution_state(ExecutionState::Completed);

    let pending = |module: &dyn Module| module.execution_state() != ExecutionState::Completed;
    let order = DependencyGrouper::new()
        .schedule_filtered(test.network.as_ref(), &pending)
        .unwrap();

    assert_eq!(order.min_group(), Some(0));
    assert_eq!(order.group(0), &[ModuleId::from("b")]);
    assert_eq!(order.group(1), &[ModuleId::from("c")]);
}

#[test]
fn test_context_filter_drives_grouping() {
    let test = TestNetworkBuilder::new()
        .modules(&["a", "b", "c", "d"])
        .edge("a", "b")
        .edge("b", "c")
        .edge("a", "d")
        .build();

    let context = ExecutionContext::for_network(test.network.clone()).with_filter(
        filters::downstream_of(test.network.as_ref(), &ModuleId::from("b")),
    );
    let order = DependencyGrouper::new()
        .schedule_filtered(test.network.as_ref(), &|module: &dyn Module| {
            context.accepts(module)
        })
        .unwrap();

    assert_eq!(order.flatten(), vec![ModuleId::from("b"), ModuleId::from("c")]);
    assert!(!order.contains(&ModuleId::from("d")));
}
