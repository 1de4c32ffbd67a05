//! Ties schema, indices, id allocators, and the soft-reference cache
//! together into one graph (SPEC_FULL.md §4.3). The per-graph
//! single-writer/concurrent-reader lock lives one layer up, in
//! `graph-server`'s `ServerState`, the same way `moire_web::app::AppState`
//! wraps the pieces this module owns rather than locking them itself.

use std::path::PathBuf;
use std::sync::Arc;

use graph_storage::{Address, BlockStorage, SqliteStorage};
use tracing::{debug, info};

use crate::cache::{NodeCache, RefType};
use crate::datom::Value;
use crate::error::GraphError;
use crate::ids::{EntityId, EntityIdAllocator, TxId, TxIdAllocator};
use crate::index::Indices;
use crate::schema::Schema;

/// The fixed address the whole-graph snapshot is written to. The real
/// source paginates index nodes across many addresses; this port has no
/// paging layer, so the entire live datom set is the one "node".
const SNAPSHOT_ADDRESS: Address = 0;

#[derive(Clone)]
pub enum StoragePath {
    Memory,
    File(PathBuf),
}

impl Default for StoragePath {
    fn default() -> Self {
        StoragePath::Memory
    }
}

#[derive(Default, Clone)]
pub struct GraphOptions {
    pub storage_path: Option<StoragePath>,
    pub ref_type: RefType,
    pub schema: Schema,
    pub cache_capacity: usize,
}

pub struct GraphState {
    pub schema: Schema,
    pub indices: Indices,
    pub(crate) entity_ids: EntityIdAllocator,
    pub(crate) tx_ids: TxIdAllocator,
    storage: Option<Arc<dyn BlockStorage>>,
    cache: NodeCache,
}

impl GraphState {
    pub fn open(opts: GraphOptions) -> Result<Self, GraphError> {
        let storage: Option<Arc<dyn BlockStorage>> = match &opts.storage_path {
            None => None,
            Some(StoragePath::Memory) => Some(Arc::new(SqliteStorage::open_memory()?)),
            Some(StoragePath::File(path)) => Some(Arc::new(SqliteStorage::open_file(path)?)),
        };

        let mut state = Self {
            schema: opts.schema,
            indices: Indices::default(),
            entity_ids: EntityIdAllocator::starting_at(1),
            tx_ids: TxIdAllocator::starting_at(1),
            storage,
            cache: NodeCache::new(
                opts.ref_type,
                if opts.cache_capacity == 0 {
                    256
                } else {
                    opts.cache_capacity
                },
            ),
        };
        state.load_snapshot()?;
        Ok(state)
    }

    pub fn entity_id_ceiling(&self) -> u64 {
        self.entity_ids.peek()
    }

    /// Bumps the entity id allocator past `used` without allocating,
    /// supporting full-sync's verbatim id preservation (SPEC_FULL.md §4.6).
    pub fn observe_entity_id(&mut self, used: u64) {
        self.entity_ids.observe(used);
    }

    pub fn next_tx(&mut self) -> TxId {
        self.tx_ids.allocate()
    }

    fn load_snapshot(&mut self) -> Result<(), GraphError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        if let Some(blob) = storage.restore(SNAPSHOT_ADDRESS)? {
            self.cache.insert(SNAPSHOT_ADDRESS, blob.clone());
            decode_snapshot(&blob, &mut self.indices, &self.schema);
            debug!(datoms = self.indices.len(), "restored graph snapshot");
        }
        Ok(())
    }

    /// Serialises the live datom set and persists it as the single node
    /// this port's storage layer knows about. Pins the node until the
    /// write succeeds, per §4.3.2's dirty-node pinning rule.
    pub fn flush(&mut self) -> Result<(), GraphError> {
        let Some(storage) = self.storage.clone() else {
            return Ok(());
        };
        self.cache.pin(SNAPSHOT_ADDRESS);
        let blob = encode_snapshot(&self.indices);
        let result = storage.store(&[(SNAPSHOT_ADDRESS, blob.clone())]);
        self.cache.unpin(SNAPSHOT_ADDRESS);
        result?;
        self.cache.insert(SNAPSHOT_ADDRESS, blob);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(storage) = &self.storage {
            storage.close();
        }
        info!(datoms = self.indices.len(), "graph closed");
    }
}

fn encode_snapshot(indices: &Indices) -> String {
    let mut out = String::new();
    for (e, a, v, t) in indices.all() {
        out.push_str(&e.get().to_string());
        out.push('\t');
        out.push_str(a);
        out.push('\t');
        out.push_str(&encode_value(v));
        out.push('\t');
        out.push_str(&t.get().to_string());
        out.push('\n');
    }
    out
}

fn decode_snapshot(blob: &str, indices: &mut Indices, schema: &Schema) {
    for line in blob.lines() {
        let mut parts = line.splitn(4, '\t');
        let (Some(e), Some(a), Some(v), Some(t)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let (Ok(e), Some(v), Ok(t)) = (e.parse::<u64>(), decode_value(v), t.parse::<u64>()) else {
            continue;
        };
        let Some(e) = EntityId::new(e) else { continue };
        indices.insert(schema, e, a, &v, TxId::new(t));
    }
}

fn encode_value(v: &Value) -> String {
    match v {
        Value::Str(s) => format!("s:{}", s.replace('\\', "\\\\").replace('\t', "\\t").replace('\n', "\\n")),
        Value::Int(i) => format!("i:{i}"),
        Value::Float(f) => format!("f:{f}"),
        Value::Bool(b) => format!("b:{b}"),
        Value::Ref(e) => format!("r:{}", e.get()),
        Value::Uuid(u) => format!("u:{u:032x}"),
    }
}

fn decode_value(s: &str) -> Option<Value> {
    let (tag, rest) = s.split_once(':')?;
    match tag {
        "s" => Some(Value::Str(
            rest.replace("\\n", "\n").replace("\\t", "\t").replace("\\\\", "\\"),
        )),
        "i" => rest.parse().ok().map(Value::Int),
        "f" => rest.parse().ok().map(Value::Float),
        "b" => rest.parse().ok().map(Value::Bool),
        "r" => rest.parse::<u64>().ok().and_then(EntityId::new).map(Value::Ref),
        "u" => u128::from_str_radix(rest, 16).ok().map(Value::Uuid),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{AttrValue, TxItem};

    #[test]
    fn flush_and_reopen_round_trips_datoms() {
        let dir = std::env::temp_dir().join(format!("graphd-graph-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("graph.sqlite3");
        let _ = std::fs::remove_file(&path);

        {
            let mut g = GraphState::open(GraphOptions {
                storage_path: Some(StoragePath::File(path.clone())),
                schema: Schema::outliner_default(),
                ..Default::default()
            })
            .unwrap();
            g.transact(vec![TxItem::Map(vec![(
                "page/name".into(),
                AttrValue::Value(Value::Str("journal".into())),
            )])])
            .unwrap();
            g.flush().unwrap();
        }

        let g2 = GraphState::open(GraphOptions {
            storage_path: Some(StoragePath::File(path.clone())),
            schema: Schema::outliner_default(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(g2.indices.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn memory_graph_needs_no_storage() {
        let g = GraphState::open(GraphOptions::default()).unwrap();
        assert_eq!(g.indices.len(), 0);
    }
}
