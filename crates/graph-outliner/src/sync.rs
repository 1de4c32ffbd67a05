//! The sync engine (SPEC_FULL.md §4.6): converting incoming raw datom
//! vectors into a transaction, and converting a `TxReport` back into raw
//! datom vectors for the writer to persist. Re-delivery of an already-live
//! `:db/add` or a retraction of an already-absent datom is a no-op — the
//! underlying `transact`/`Indices` machinery is idempotent by construction
//! (an assert re-adds the same `(e, a, v)` set entry; a retract of a
//! missing entry is a harmless `remove` miss), so this module does not
//! need its own dedup pass.

use std::time::Instant;

use graph_engine::datom::Value;
use graph_engine::error::GraphError;
use graph_engine::ids::EntityId;
use graph_engine::schema::ValueType;
use graph_engine::tx::{AttrValue, EntityRef, TxItem};
use graph_engine::GraphState;
use graph_wire::{Value as WireValue, WireDatom};

pub struct SyncResult {
    pub count: usize,
    pub elapsed_ms: u64,
}

/// Applies a batch of wire datoms as one transaction. `full_sync` preserves
/// entity ids verbatim rather than remapping them (the resolved Open
/// Question in SPEC_FULL.md §9: revisit only if a writer can collide ids
/// across sessions, which this port's single-writer-per-graph model rules
/// out).
pub fn sync_datoms(g: &mut GraphState, datoms: &[WireDatom], full_sync: bool) -> Result<SyncResult, GraphError> {
    let started = Instant::now();
    let mut items = Vec::with_capacity(datoms.len());
    for d in datoms {
        let attr = graph_engine::coerce::coerce_attribute(&d.a);
        let e = EntityId::new(d.e as u64)
            .ok_or_else(|| GraphError::InvalidTxData(format!("invalid entity id {}", d.e)))?;
        if full_sync {
            g.observe_entity_id(e.get());
        }
        let value = if g.schema.resolve(&attr).value_type == ValueType::Ref {
            let target = EntityId::new(wire_datom_value_as_i64(&d.v)? as u64)
                .ok_or_else(|| GraphError::InvalidTxData("ref-typed sync datom needs an integer value".into()))?;
            if full_sync {
                g.observe_entity_id(target.get());
            }
            AttrValue::Ref(EntityRef::Id(target))
        } else {
            AttrValue::Value(graph_engine::convert::wire_to_value(&d.v))
        };

        if d.added {
            items.push(TxItem::Add(EntityRef::Id(e), attr, value));
        } else {
            items.push(TxItem::Retract(EntityRef::Id(e), attr, value));
        }
    }
    let count = items.len();
    g.transact(items)?;
    Ok(SyncResult {
        count,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn wire_datom_value_as_i64(v: &WireValue) -> Result<i64, GraphError> {
    v.as_i64()
        .ok_or_else(|| GraphError::InvalidTxData("expected an integer entity reference".into()))
}

/// The reverse direction: every datom a transaction produced, as a raw
/// 5-tuple, for the writer to persist (SPEC_FULL.md §4.6).
pub fn sync_tx_report(report: &graph_engine::TxReport) -> Vec<WireDatom> {
    report
        .tx_data
        .iter()
        .map(|d| WireDatom {
            e: d.e.get() as i64,
            a: d.a.clone(),
            v: Box::new(value_as_wire(&d.v)),
            t: d.t.get() as i64,
            added: d.added,
        })
        .collect()
}

fn value_as_wire(v: &Value) -> WireValue {
    graph_engine::convert::value_to_wire(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_engine::{GraphOptions, Schema};

    fn graph() -> GraphState {
        GraphState::open(GraphOptions {
            schema: Schema::outliner_default(),
            ..Default::default()
        })
        .unwrap()
    }

    fn datom(e: i64, a: &str, v: WireValue, added: bool) -> WireDatom {
        WireDatom { e, a: a.to_string(), v: Box::new(v), t: 0, added }
    }

    #[test]
    fn sync_is_idempotent_under_duplicate_delivery() {
        let mut g = graph();
        let datoms = vec![datom(1, "page/name", WireValue::str("journal"), true)];
        sync_datoms(&mut g, &datoms, false).unwrap();
        sync_datoms(&mut g, &datoms, false).unwrap();
        let e = EntityId::new(1).unwrap();
        assert_eq!(g.indices.values_of(e, "page/name").len(), 1);
    }

    #[test]
    fn retracting_a_missing_datom_is_a_no_op() {
        let mut g = graph();
        let datoms = vec![datom(1, "page/name", WireValue::str("journal"), false)];
        assert!(sync_datoms(&mut g, &datoms, false).is_ok());
        let e = EntityId::new(1).unwrap();
        assert!(g.indices.values_of(e, "page/name").is_empty());
    }

    #[test]
    fn full_sync_preserves_entity_ids_without_remapping() {
        let mut g = graph();
        let datoms = vec![datom(42, "page/name", WireValue::str("old"), true)];
        sync_datoms(&mut g, &datoms, true).unwrap();
        let e = EntityId::new(42).unwrap();
        assert_eq!(g.indices.values_of(e, "page/name").len(), 1);
        assert!(g.entity_id_ceiling() > 42);
    }

    #[test]
    fn tx_report_round_trips_through_wire_datoms() {
        let mut g = graph();
        let report = g
            .transact(vec![TxItem::Map(vec![(
                "page/name".into(),
                AttrValue::Value(Value::Str("journal".into())),
            )])])
            .unwrap();
        let wire = sync_tx_report(&report);
        assert_eq!(wire.len(), 1);
        assert!(wire[0].added);
        assert_eq!(wire[0].a, "page/name");
    }
}
