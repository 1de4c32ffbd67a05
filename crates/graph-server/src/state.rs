//! Process-wide server state (SPEC_FULL.md §3: graph registry plus the
//! four process-wide mutable cells). Grounded on
//! `moire_web::app::{AppState, ServerState}`: a `Clone`-able handle wrapping
//! an `Arc<Mutex<...>>`, rather than the process-wide mutable globals the
//! original gets away with — each graph additionally gets its own lock so
//! same-graph ops serialise while cross-graph ops run fully in parallel
//! (SPEC_FULL.md §5).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use graph_engine::{GraphOptions, GraphState, StoragePath};
use graph_wire::Value as WireValue;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::ServerConfig;

pub type SharedGraph = Arc<RwLock<GraphState>>;

struct GlobalCells {
    app_state: WireValue,
    context: WireValue,
    thread_atoms: BTreeMap<String, WireValue>,
    rtc_ws_url: Option<String>,
}

impl GlobalCells {
    fn empty() -> Self {
        Self {
            app_state: WireValue::Map(vec![]),
            context: WireValue::Map(vec![]),
            thread_atoms: BTreeMap::new(),
            rtc_ws_url: None,
        }
    }
}

struct Inner {
    config: ServerConfig,
    graphs: RwLock<HashMap<String, SharedGraph>>,
    cells: parking_lot::Mutex<GlobalCells>,
}

#[derive(Clone)]
pub struct AppState(Arc<Inner>);

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self(Arc::new(Inner {
            config,
            graphs: RwLock::new(HashMap::new()),
            cells: parking_lot::Mutex::new(GlobalCells::empty()),
        }))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.0.config
    }

    /// `create-or-open-db`: idempotent (SPEC_FULL.md §4.7).
    pub async fn create_or_open(&self, name: &str) -> Result<SharedGraph, graph_engine::GraphError> {
        if let Some(existing) = self.0.graphs.read().await.get(name) {
            return Ok(existing.clone());
        }
        let mut graphs = self.0.graphs.write().await;
        if let Some(existing) = graphs.get(name) {
            return Ok(existing.clone());
        }
        let storage_path = match &self.0.config.storage_dir {
            Some(dir) => Some(StoragePath::File(std::path::PathBuf::from(format!("{dir}/{name}.sqlite3")))),
            None => None,
        };
        let graph = GraphState::open(GraphOptions {
            storage_path,
            schema: graph_engine::Schema::outliner_default(),
            ..Default::default()
        })?;
        let shared = Arc::new(RwLock::new(graph));
        graphs.insert(name.to_string(), shared.clone());
        info!(graph = name, "graph opened");
        Ok(shared)
    }

    pub async fn db_exists(&self, name: &str) -> bool {
        self.0.graphs.read().await.contains_key(name)
    }

    pub async fn list_db(&self) -> Vec<String> {
        self.0.graphs.read().await.keys().cloned().collect()
    }

    pub async fn graph(&self, name: &str) -> Option<SharedGraph> {
        self.0.graphs.read().await.get(name).cloned()
    }

    /// Closes the graph's storage exactly once and drops it from the
    /// registry (SPEC_FULL.md §5).
    pub async fn remove_graph(&self, name: &str) -> bool {
        let removed = self.0.graphs.write().await.remove(name);
        match removed {
            Some(graph) => {
                graph.write().await.close();
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let names: Vec<String> = self.0.graphs.read().await.keys().cloned().collect();
        for name in names {
            self.remove_graph(&name).await;
        }
    }

    pub fn app_state_cell(&self) -> WireValue {
        self.0.cells.lock().app_state.clone()
    }

    pub fn merge_app_state(&self, patch: &WireValue) {
        merge_cell(&mut self.0.cells.lock().app_state, patch);
    }

    pub fn context_cell(&self) -> WireValue {
        self.0.cells.lock().context.clone()
    }

    pub fn merge_context(&self, patch: &WireValue) {
        merge_cell(&mut self.0.cells.lock().context, patch);
    }

    /// Rejects keys whose namespace isn't `thread-atom` (SPEC_FULL.md §4.7).
    pub fn update_thread_atom(&self, key: &str, value: WireValue) -> Result<(), graph_engine::GraphError> {
        if !key.starts_with("thread-atom/") {
            return Err(graph_engine::GraphError::Malformed(format!(
                "update-thread-atom: key {key} is not in the thread-atom namespace"
            )));
        }
        self.0.cells.lock().thread_atoms.insert(key.to_string(), value);
        Ok(())
    }

    pub fn thread_atoms_snapshot(&self) -> WireValue {
        let atoms = &self.0.cells.lock().thread_atoms;
        WireValue::Map(
            atoms
                .iter()
                .map(|(k, v)| (WireValue::keyword(k.clone()), v.clone()))
                .collect(),
        )
    }

    pub fn set_rtc_ws_url(&self, url: Option<String>) {
        self.0.cells.lock().rtc_ws_url = url;
    }
}

/// Map-merge semantics for the global state cells (SPEC_FULL.md §5): a
/// patch's keys overwrite the cell's, everything else is preserved.
fn merge_cell(cell: &mut WireValue, patch: &WireValue) {
    let (WireValue::Map(existing), Some(patch_entries)) = (cell.clone(), patch.as_map()) else {
        *cell = patch.clone();
        return;
    };
    let mut merged = existing;
    for (k, v) in patch_entries {
        if let Some(slot) = merged.iter_mut().find(|(ek, _)| ek == k) {
            slot.1 = v.clone();
        } else {
            merged.push((k.clone(), v.clone()));
        }
    }
    *cell = WireValue::Map(merged);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_or_open_is_idempotent() {
        let state = AppState::new(ServerConfig::default());
        let a = state.create_or_open("demo").await.unwrap();
        let b = state.create_or_open("demo").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn merge_cell_overwrites_only_patched_keys() {
        let mut cell = WireValue::Map(vec![
            (WireValue::keyword("a"), WireValue::Int(1)),
            (WireValue::keyword("b"), WireValue::Int(2)),
        ]);
        let patch = WireValue::Map(vec![(WireValue::keyword("b"), WireValue::Int(20))]);
        merge_cell(&mut cell, &patch);
        assert_eq!(cell.get("a"), Some(&WireValue::Int(1)));
        assert_eq!(cell.get("b"), Some(&WireValue::Int(20)));
    }

    #[tokio::test]
    async fn update_thread_atom_rejects_foreign_namespace() {
        let state = AppState::new(ServerConfig::default());
        let err = state.update_thread_atom("other/key", WireValue::Bool(true)).unwrap_err();
        assert!(matches!(err, graph_engine::GraphError::Malformed(_)));
    }
}
