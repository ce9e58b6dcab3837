// ABOUTME: Network interfaces consumed by the scheduler and an in-memory network
// ABOUTME: Holds modules, dependency connections and the per-run error accumulator

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tracing::debug;

use super::error::{NetworkError, Result};
use super::module::{ExecutionState, ModuleHandle, ModuleId};

/// A dependency edge: `to` consumes the output of `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from: ModuleId,
    pub to: ModuleId,
}

impl Connection {
    pub fn new(from: impl Into<ModuleId>, to: impl Into<ModuleId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Read-only view of a network's structure.
pub trait NetworkInterface: Send + Sync {
    fn modules(&self) -> Vec<ModuleHandle>;

    fn connections(&self) -> Vec<Connection>;

    fn module_count(&self) -> usize {
        self.modules().len()
    }

    /// Modules `id` depends on.
    fn dependencies(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.connections()
            .into_iter()
            .filter(|connection| &connection.to == id)
            .map(|connection| connection.from)
            .collect()
    }

    /// Modules that depend on `id`.
    fn dependents(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.connections()
            .into_iter()
            .filter(|connection| &connection.from == id)
            .map(|connection| connection.to)
            .collect()
    }

    /// Dependencies of every module with at least one incoming connection,
    /// built from a single snapshot of the connections.
    fn dependency_map(&self) -> HashMap<ModuleId, Vec<ModuleId>> {
        let mut map: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();
        for connection in self.connections() {
            map.entry(connection.to).or_default().push(connection.from);
        }
        map
    }

    /// Called by the scheduler when a run starts touching this network.
    fn begin_execution(&self) {}

    fn end_execution(&self) {}
}

pub trait ExecutableLookup: Send + Sync {
    fn lookup_executable(&self, id: &ModuleId) -> Option<ModuleHandle>;

    /// Aggregate error code of the current run, 0 when nothing errored.
    fn error_code(&self) -> i32;

    fn record_error(&self, id: &ModuleId);

    fn reset_error_code(&self);

    fn contains_view_scene(&self) -> bool {
        false
    }
}

#[derive(Default)]
struct NetworkStructure {
    modules: IndexMap<ModuleId, ModuleHandle>,
    connections: IndexSet<Connection>,
    incoming: HashMap<ModuleId, IndexSet<ModuleId>>,
    outgoing: HashMap<ModuleId, IndexSet<ModuleId>>,
    /// Set while a run is in progress. Only read or written under the structure lock.
    executing: bool,
}

impl NetworkStructure {
    fn ensure_mutable(&self) -> Result<()> {
        if self.executing {
            Err(NetworkError::ExecutionInProgress)
        } else {
            Ok(())
        }
    }

    fn link(&mut self, connection: &Connection) {
        self.incoming
            .entry(connection.to.clone())
            .or_default()
            .insert(connection.from.clone());
        self.outgoing
            .entry(connection.from.clone())
            .or_default()
            .insert(connection.to.clone());
    }

    fn unlink(&mut self, connection: &Connection) {
        if let Some(sources) = self.incoming.get_mut(&connection.to) {
            sources.shift_remove(&connection.from);
        }
        if let Some(targets) = self.outgoing.get_mut(&connection.from) {
            targets.shift_remove(&connection.to);
        }
    }
}

/// In-memory network implementing both scheduler-facing interfaces.
#[derive(Default)]
pub struct Network {
    structure: RwLock<NetworkStructure>,
    error_code: AtomicI32,
    errored: Mutex<Vec<ModuleId>>,
    view_scene: AtomicBool,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&self, module: ModuleHandle) -> Result<ModuleId> {
        let id = module.id().clone();
        let mut structure = self.structure.write();
        structure.ensure_mutable()?;

        if structure.modules.contains_key(&id) {
            return Err(NetworkError::DuplicateModule { module_id: id });
        }

        debug!("Adding module {} to network", id);
        structure.modules.insert(id.clone(), module);
        Ok(id)
    }

    /// Removes a module together with every connection touching it.
    pub fn remove_module(&self, id: &ModuleId) -> Result<ModuleHandle> {
        let mut structure = self.structure.write();
        structure.ensure_mutable()?;

        let module =
            structure
                .modules
                .shift_remove(id)
                .ok_or_else(|| NetworkError::UnknownModule {
                    module_id: id.clone(),
                })?;
        let touching: Vec<Connection> = structure
            .connections
            .iter()
            .filter(|connection| &connection.from == id || &connection.to == id)
            .cloned()
            .collect();
        for connection in &touching {
            structure.connections.shift_remove(connection);
            structure.unlink(connection);
        }
        structure.incoming.remove(id);
        structure.outgoing.remove(id);

        Ok(module)
    }

    /// Adds a dependency edge. Returns false if the edge already existed.
    ///
    /// Self-loops are accepted here; rejecting cycles is the scheduler's job.
    pub fn connect(&self, from: impl Into<ModuleId>, to: impl Into<ModuleId>) -> Result<bool> {
        let connection = Connection::new(from, to);
        let mut structure = self.structure.write();
        structure.ensure_mutable()?;

        for endpoint in [&connection.from, &connection.to] {
            if !structure.modules.contains_key(endpoint) {
                return Err(NetworkError::UnknownModule {
                    module_id: endpoint.clone(),
                });
            }
        }

        debug!("Connecting {} -> {}", connection.from, connection.to);
        structure.link(&connection);
        Ok(structure.connections.insert(connection))
    }

    pub fn disconnect(&self, from: &ModuleId, to: &ModuleId) -> Result<bool> {
        let connection = Connection::new(from.clone(), to.clone());
        let mut structure = self.structure.write();
        structure.ensure_mutable()?;

        let removed = structure.connections.shift_remove(&connection);
        if removed {
            structure.unlink(&connection);
        }
        Ok(removed)
    }

    pub fn module(&self, id: &ModuleId) -> Option<ModuleHandle> {
        self.structure.read().modules.get(id).cloned()
    }

    pub fn nmodules(&self) -> usize {
        self.structure.read().modules.len()
    }

    pub fn nconnections(&self) -> usize {
        self.structure.read().connections.len()
    }

    pub fn is_executing(&self) -> bool {
        self.structure.read().executing
    }

    /// Modules recorded as errored since the last reset, in recording order.
    pub fn errored_modules(&self) -> Vec<ModuleId> {
        self.errored.lock().clone()
    }

    /// Puts every module back into `Waiting` so the network can be run again.
    pub fn reset_states(&self) -> Result<()> {
        let structure = self.structure.read();
        structure.ensure_mutable()?;
        for module in structure.modules.values() {
            module.set_execution_state(ExecutionState::Waiting);
        }
        Ok(())
    }

    pub fn set_contains_view_scene(&self, value: bool) {
        self.view_scene.store(value, Ordering::Release);
    }
}

impl NetworkInterface for Network {
    fn modules(&self) -> Vec<ModuleHandle> {
        self.structure.read().modules.values().cloned().collect()
    }

    fn connections(&self) -> Vec<Connection> {
        self.structure.read().connections.iter().cloned().collect()
    }

    fn module_count(&self) -> usize {
        self.nmodules()
    }

    fn dependencies(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.structure
            .read()
            .incoming
            .get(id)
            .map(|sources| sources.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn dependents(&self, id: &ModuleId) -> Vec<ModuleId> {
        self.structure
            .read()
            .outgoing
            .get(id)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn dependency_map(&self) -> HashMap<ModuleId, Vec<ModuleId>> {
        self.structure
            .read()
            .incoming
            .iter()
            .filter(|(_, sources)| !sources.is_empty())
            .map(|(id, sources)| (id.clone(), sources.iter().cloned().collect()))
            .collect()
    }

    // Flipped under the write lock so no mutation can slip in between a check and the freeze.
    fn begin_execution(&self) {
        self.structure.write().executing = true;
    }

    fn end_execution(&self) {
        self.structure.write().executing = false;
    }
}

impl ExecutableLookup for Network {
    fn lookup_executable(&self, id: &ModuleId) -> Option<ModuleHandle> {
        self.module(id)
    }

    fn error_code(&self) -> i32 {
        self.error_code.load(Ordering::Acquire)
    }

    fn record_error(&self, id: &ModuleId) {
        self.errored.lock().push(id.clone());
        self.error_code.fetch_add(1, Ordering::AcqRel);
    }

    fn reset_error_code(&self) {
        self.errored.lock().clear();
        self.error_code.store(0, Ordering::Release);
    }

    fn contains_view_scene(&self) -> bool {
        self.view_scene.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let structure = self.structure.read();
        f.debug_struct("Network")
            .field("modules", &structure.modules.keys().collect::<Vec<_>>())
            .field("connections", &structure.connections)
            .field("error_code", &self.error_code())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::module::FnModule;

    fn diamond() -> Network {
        let network = Network::new();
        for id in ["a", "b", "c", "d"] {
            network.add_module(FnModule::noop(id).into_handle()).unwrap();
        }
        network.connect("a", "b").unwrap();
        network.connect("a", "c").unwrap();
        network.connect("b", "d").unwrap();
        network.connect("c", "d").unwrap();
        network
    }

    #[test]
    fn test_add_and_connect_modules() {
        let network = diamond();
        assert_eq!(network.nmodules(), 4);
        assert_eq!(network.nconnections(), 4);

        assert!(!network.connect("a", "b").unwrap());
        assert_eq!(network.nconnections(), 4);

        let mut deps = network.dependencies(&ModuleId::from("d"));
        deps.sort();
        assert_eq!(deps, vec![ModuleId::from("b"), ModuleId::from("c")]);
        assert_eq!(network.dependents(&ModuleId::from("a")).len(), 2);
    }

    #[test]
    fn test_duplicate_and_unknown_modules() {
        let network = diamond();
        assert_eq!(
            network.add_module(FnModule::noop("a").into_handle()),
            Err(NetworkError::DuplicateModule {
                module_id: ModuleId::from("a")
            })
        );
        assert!(matches!(
            network.connect("a", "missing"),
            Err(NetworkError::UnknownModule { .. })
        ));
    }

    #[test]
    fn test_remove_module_drops_connections() {
        let network = diamond();
        network.remove_module(&ModuleId::from("b")).unwrap();
        assert_eq!(network.nmodules(), 3);
        assert_eq!(network.nconnections(), 2);
    }

    #[test]
    fn test_structure_frozen_during_execution() {
        let network = diamond();
        network.begin_execution();
        assert_eq!(
            network.connect("d", "a"),
            Err(NetworkError::ExecutionInProgress)
        );
        assert!(network.reset_states().is_err());
        network.end_execution();
        assert!(network.connect("d", "a").is_ok());
    }

    #[test]
    fn test_adjacency_tracks_removals() {
        let network = diamond();
        network
            .disconnect(&ModuleId::from("b"), &ModuleId::from("d"))
            .unwrap();
        assert_eq!(
            network.dependencies(&ModuleId::from("d")),
            vec![ModuleId::from("c")]
        );

        network.remove_module(&ModuleId::from("a")).unwrap();
        assert!(network.dependencies(&ModuleId::from("b")).is_empty());
        assert!(network.dependents(&ModuleId::from("a")).is_empty());

        let map = network.dependency_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&ModuleId::from("d")], vec![ModuleId::from("c")]);
    }

    #[test]
    fn test_no_mutation_lands_after_freeze() {
        use std::sync::Arc;
        use std::thread;

        for _ in 0..20 {
            let network = Arc::new(Network::new());
            for i in 0..200 {
                network
                    .add_module(FnModule::noop(format!("m{}", i)).into_handle())
                    .unwrap();
            }

            let writers: Vec<_> = (0..4)
                .map(|worker| {
                    let network = Arc::clone(&network);
                    thread::spawn(move || {
                        let mut rejected = false;
                        for i in 0..199 {
                            let from = format!("m{}", i);
                            let to = format!("m{}", (i + 1 + worker) % 200);
                            match network.connect(from, to) {
                                Ok(_) => assert!(!rejected, "mutation accepted after a rejection"),
                                Err(NetworkError::ExecutionInProgress) => rejected = true,
                                Err(other) => panic!("unexpected error: {}", other),
                            }
                        }
                    })
                })
                .collect();

            network.begin_execution();
            let frozen = network.nconnections();
            for writer in writers {
                writer.join().unwrap();
            }

            assert_eq!(network.nconnections(), frozen);
            network.end_execution();
        }
    }

    #[test]
    fn test_error_accumulator() {
        let network = diamond();
        assert_eq!(network.error_code(), 0);
        network.record_error(&ModuleId::from("b"));
        network.record_error(&ModuleId::from("c"));
        assert_eq!(network.error_code(), 2);
        assert_eq!(network.errored_modules().len(), 2);
        network.reset_error_code();
        assert_eq!(network.error_code(), 0);
        assert!(network.errored_modules().is_empty());
    }
}
