// ABOUTME: Dependency grouping of network modules into concurrently runnable levels
// ABOUTME: Layers the module DAG by longest dependency chain and rejects cycles

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};

use super::error::{Result, SchedulerError};
use crate::network::{Module, ModuleId, NetworkInterface};

/// Predicate restricting which modules take part in a grouping.
pub type ModulePredicate<'a> = dyn Fn(&dyn Module) -> bool + 'a;

/// Group index -> modules at that depth.
///
/// Every module's group is strictly greater than the group of each module it
/// depends on. Order inside a group carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    groups: BTreeMap<usize, Vec<ModuleId>>,
}

/// Computes [`ExecutionOrder`]s from a network.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGrouper;

struct ModuleGraph {
    graph: DiGraph<ModuleId, ()>,
}

impl DependencyGrouper {
    pub fn new() -> Self {
        Self
    }

    /// Groups every module in the network.
    pub fn schedule(&self, network: &dyn NetworkInterface) -> Result<ExecutionOrder> {
        self.schedule_filtered(network, &|_| true)
    }

    /// Groups only the modules accepted by `filter`.
    ///
    /// Connections whose source is filtered out are treated as satisfied.
    pub fn schedule_filtered(
        &self,
        network: &dyn NetworkInterface,
        filter: &ModulePredicate<'_>,
    ) -> Result<ExecutionOrder> {
        ModuleGraph::build(network, filter).levels()
    }
}

impl ModuleGraph {
    fn build(network: &dyn NetworkInterface, filter: &ModulePredicate<'_>) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for module in network.modules() {
            if filter(module.as_ref()) {
                let id = module.id().clone();
                let index = graph.add_node(id.clone());
                indices.insert(id, index);
            }
        }

        for connection in network.connections() {
            if let (Some(&from), Some(&to)) =
                (indices.get(&connection.from), indices.get(&connection.to))
            {
                graph.add_edge(from, to, ());
            }
        }

        Self { graph }
    }

    fn levels(&self) -> Result<ExecutionOrder> {
        let sorted = toposort(&self.graph, None).map_err(|_| self.cycle_error())?;

        let mut level_of: HashMap<NodeIndex, usize> = HashMap::with_capacity(sorted.len());
        let mut groups: BTreeMap<usize, Vec<ModuleId>> = BTreeMap::new();

        for node in sorted {
            // Topological order guarantees every predecessor already has a level.
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|dep| level_of.get(&dep))
                .map(|dep_level| dep_level + 1)
                .max()
                .unwrap_or(0);

            level_of.insert(node, level);
            groups
                .entry(level)
                .or_default()
                .push(self.graph[node].clone());
        }

        for members in groups.values_mut() {
            members.sort();
        }

        Ok(ExecutionOrder { groups })
    }

    fn cycle_error(&self) -> SchedulerError {
        let mut modules: Vec<ModuleId> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self
                        .graph
                        .find_edge(component[0], component[0])
                        .is_some()
            })
            .flatten()
            .map(|node| self.graph[node].clone())
            .collect();
        modules.sort();

        SchedulerError::CyclicGraph { modules }
    }
}

impl ExecutionOrder {
    /// Lowest non-empty group, or `None` when there is nothing to do.
    pub fn min_group(&self) -> Option<usize> {
        self.groups.keys().next().copied()
    }

    pub fn group(&self, index: usize) -> &[ModuleId] {
        self.groups.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn groups(&self) -> impl Iterator<Item = (usize, &[ModuleId])> {
        self.groups
            .iter()
            .map(|(index, members)| (*index, members.as_slice()))
    }

    pub fn group_of(&self, id: &ModuleId) -> Option<usize> {
        self.groups
            .iter()
            .find(|(_, members)| members.contains(id))
            .map(|(index, _)| *index)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.group_of(id).is_some()
    }

    /// Number of modules across all groups.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of groups.
    pub fn depth(&self) -> usize {
        self.groups.len()
    }

    /// Size of the largest group.
    pub fn max_parallelism(&self) -> usize {
        self.groups.values().map(Vec::len).max().unwrap_or(0)
    }

    /// All modules, group by group. A valid serial execution order.
    pub fn flatten(&self) -> Vec<ModuleId> {
        self.groups.values().flatten().cloned().collect()
    }
}
