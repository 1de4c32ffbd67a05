//! Transaction semantics (SPEC_FULL.md §4.3.3): entity maps, lookup refs,
//! `:db/add` / `:db/retract` / `:db/retractEntity`, tempid resolution,
//! unique-identity rejection, cardinality-aware supersede logic.

use std::collections::BTreeMap;

use graph_wire::Value as WireValue;
use tracing::debug;

use crate::datom::{Datom, Value};
use crate::error::GraphError;
use crate::ids::EntityId;
use crate::schema::{Cardinality, Schema, ValueType};
use crate::GraphState;

/// Something that resolves to an entity id once a transaction starts
/// processing it.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRef {
    Id(EntityId),
    /// A caller-chosen placeholder (e.g. `"-1"`), resolved once per
    /// transaction and shared by every item that names the same string.
    TempId(String),
    /// `[A, V]` — resolves through a unique-identity attribute; if no
    /// entity currently asserts `(A, V)`, a new one is allocated and the
    /// fact itself is asserted as part of this transaction.
    Lookup(String, Value),
}

/// An attribute's value in tx-data: either a literal or a reference to
/// another entity (itself possibly a tempid or lookup ref).
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Value(Value),
    Ref(EntityRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxItem {
    /// An entity map. `"db/id"` may appear as a `Ref` entry naming the
    /// upsert target explicitly; otherwise the first unique-identity
    /// attribute present resolves (or allocates) the entity.
    Map(Vec<(String, AttrValue)>),
    Add(EntityRef, String, AttrValue),
    Retract(EntityRef, String, AttrValue),
    RetractEntity(EntityRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxReport {
    pub tx: crate::ids::TxId,
    pub tempids: BTreeMap<String, EntityId>,
    pub tx_data: Vec<Datom>,
}

impl GraphState {
    pub fn transact(&mut self, items: Vec<TxItem>) -> Result<TxReport, GraphError> {
        let t = self.tx_ids.allocate();
        let mut tempids: BTreeMap<String, EntityId> = BTreeMap::new();
        let mut tx_data = Vec::new();

        for item in items {
            match item {
                TxItem::Map(entries) => self.apply_map(entries, t, &mut tempids, &mut tx_data)?,
                TxItem::Add(e, a, v) => {
                    let e = self.resolve_entity_ref(e, t, &mut tempids, &mut tx_data)?;
                    let v = self.resolve_value(v, t, &mut tempids, &mut tx_data)?;
                    self.assert_one(e, &a, v, t, &mut tx_data)?;
                }
                TxItem::Retract(e, a, v) => {
                    let e = self.resolve_entity_ref(e, t, &mut tempids, &mut tx_data)?;
                    let v = self.resolve_value(v, t, &mut tempids, &mut tx_data)?;
                    if self.indices.remove(&self.schema, e, &a, &v) {
                        tx_data.push(Datom::new(e, a, v, t, false));
                    }
                }
                TxItem::RetractEntity(e) => {
                    let e = self.resolve_entity_ref(e, t, &mut tempids, &mut tx_data)?;
                    let attrs: Vec<(String, Value)> = self
                        .indices
                        .entity_attrs(e)
                        .into_iter()
                        .map(|(a, v, _)| (a.to_string(), v.clone()))
                        .collect();
                    for (a, v) in attrs {
                        self.indices.remove(&self.schema, e, &a, &v);
                        tx_data.push(Datom::new(e, a, v, t, false));
                    }
                }
            }
        }

        debug!(tx = t.get(), datoms = tx_data.len(), "transact committed");
        Ok(TxReport {
            tx: t,
            tempids,
            tx_data,
        })
    }

    fn apply_map(
        &mut self,
        entries: Vec<(String, AttrValue)>,
        t: crate::ids::TxId,
        tempids: &mut BTreeMap<String, EntityId>,
        tx_data: &mut Vec<Datom>,
    ) -> Result<(), GraphError> {
        let explicit_id = entries.iter().find_map(|(k, v)| {
            if k == "db/id" {
                match v {
                    AttrValue::Ref(r) => Some(r.clone()),
                    AttrValue::Value(Value::Ref(id)) => Some(EntityRef::Id(*id)),
                    _ => None,
                }
            } else {
                None
            }
        });

        let e = if let Some(r) = explicit_id {
            self.resolve_entity_ref(r, t, tempids, tx_data)?
        } else {
            let upsert_attr = entries.iter().find_map(|(k, v)| match v {
                AttrValue::Value(value) if self.schema.resolve(k).unique_identity => {
                    Some((k.clone(), value.clone()))
                }
                _ => None,
            });
            match upsert_attr {
                Some((attr, value)) => self
                    .indices
                    .resolve_unique(&attr, &value)
                    .unwrap_or_else(|| self.entity_ids.allocate()),
                None => self.entity_ids.allocate(),
            }
        };

        for (attr, value) in entries {
            if attr == "db/id" {
                continue;
            }
            let v = match value {
                AttrValue::Value(v) => v,
                AttrValue::Ref(r) => Value::Ref(self.resolve_entity_ref(r, t, tempids, tx_data)?),
            };
            self.assert_one(e, &attr, v, t, tx_data)?;
        }
        Ok(())
    }

    fn resolve_entity_ref(
        &mut self,
        e: EntityRef,
        t: crate::ids::TxId,
        tempids: &mut BTreeMap<String, EntityId>,
        tx_data: &mut Vec<Datom>,
    ) -> Result<EntityId, GraphError> {
        match e {
            EntityRef::Id(id) => Ok(id),
            EntityRef::TempId(name) => {
                if let Some(id) = tempids.get(&name) {
                    return Ok(*id);
                }
                let id = self.entity_ids.allocate();
                tempids.insert(name, id);
                Ok(id)
            }
            EntityRef::Lookup(attr, value) => {
                if !self.schema.resolve(&attr).unique_identity {
                    return Err(GraphError::InvalidTxData(format!(
                        "lookup ref attribute {attr} is not unique-identity"
                    )));
                }
                if let Some(id) = self.indices.resolve_unique(&attr, &value) {
                    return Ok(id);
                }
                let id = self.entity_ids.allocate();
                self.assert_one(id, &attr, value, t, tx_data)?;
                Ok(id)
            }
        }
    }

    fn resolve_value(
        &mut self,
        v: AttrValue,
        t: crate::ids::TxId,
        tempids: &mut BTreeMap<String, EntityId>,
        tx_data: &mut Vec<Datom>,
    ) -> Result<Value, GraphError> {
        match v {
            AttrValue::Value(v) => Ok(v),
            AttrValue::Ref(r) => Ok(Value::Ref(self.resolve_entity_ref(r, t, tempids, tx_data)?)),
        }
    }

    /// Asserts `(e, a, v)`, applying cardinality-one supersede and the
    /// unique-identity constraint check.
    fn assert_one(
        &mut self,
        e: EntityId,
        a: &str,
        v: Value,
        t: crate::ids::TxId,
        tx_data: &mut Vec<Datom>,
    ) -> Result<(), GraphError> {
        let spec = self.schema.resolve(a);

        if spec.unique_identity {
            if let Some(owner) = self.indices.resolve_unique(a, &v) {
                if owner != e {
                    return Err(GraphError::UniqueConflict {
                        attribute: a.to_string(),
                        value: format!("{v:?}"),
                    });
                }
            }
        }

        match spec.cardinality {
            Cardinality::One => {
                let current: Vec<Value> = self
                    .indices
                    .values_of(e, a)
                    .into_iter()
                    .cloned()
                    .collect();
                if current.iter().any(|existing| existing == &v) {
                    return Ok(());
                }
                for existing in current {
                    self.indices.remove(&self.schema, e, a, &existing);
                    tx_data.push(Datom::new(e, a, existing, t, false));
                }
                self.indices.insert(&self.schema, e, a, &v, t);
                tx_data.push(Datom::new(e, a, v, t, true));
            }
            Cardinality::Many => {
                if self.indices.values_of(e, a).into_iter().any(|x| x == &v) {
                    return Ok(());
                }
                self.indices.insert(&self.schema, e, a, &v, t);
                tx_data.push(Datom::new(e, a, v, t, true));
            }
        }
        Ok(())
    }
}

/// Parses a `tx-data` wire value (SPEC_FULL.md §4.3.3) into typed
/// `TxItem`s: entity maps, `[A V]` lookup refs, and `:db/add` /
/// `:db/retract` / `:db/retractEntity` tuples. `v` is expected to already
/// be coercion-boundary output, so attribute names and op heads are
/// keywords rather than plain strings.
pub fn parse_tx_data(schema: &Schema, v: &WireValue) -> Result<Vec<TxItem>, GraphError> {
    let items = v
        .as_vector()
        .ok_or_else(|| GraphError::InvalidTxData("tx-data must be a vector".into()))?;
    items.iter().map(|item| parse_tx_item(schema, item)).collect()
}

fn parse_tx_item(schema: &Schema, v: &WireValue) -> Result<TxItem, GraphError> {
    match v {
        WireValue::Map(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, val) in entries {
                let attr = keyword_text(k)?;
                let parsed = parse_attr_value(schema, &attr, val)?;
                out.push((attr, parsed));
            }
            Ok(TxItem::Map(out))
        }
        WireValue::Vector(items) if !items.is_empty() => {
            let head = keyword_text(&items[0])?;
            match (head.as_str(), items.len()) {
                ("db/add", 4) => {
                    let e = parse_entity_ref(&items[1])?;
                    let a = keyword_text(&items[2])?;
                    let val = parse_attr_value(schema, &a, &items[3])?;
                    Ok(TxItem::Add(e, a, val))
                }
                ("db/retract", 4) => {
                    let e = parse_entity_ref(&items[1])?;
                    let a = keyword_text(&items[2])?;
                    let val = parse_attr_value(schema, &a, &items[3])?;
                    Ok(TxItem::Retract(e, a, val))
                }
                ("db/retractEntity", 2) => Ok(TxItem::RetractEntity(parse_entity_ref(&items[1])?)),
                (other, _) => Err(GraphError::InvalidTxData(format!(
                    "unrecognised tx-data tuple: ({other} ...)"
                ))),
            }
        }
        other => Err(GraphError::InvalidTxData(format!(
            "unrecognised tx-data item: {other:?}"
        ))),
    }
}

fn parse_attr_value(schema: &Schema, attr: &str, v: &WireValue) -> Result<AttrValue, GraphError> {
    if schema.resolve(attr).value_type == ValueType::Ref {
        Ok(AttrValue::Ref(parse_entity_ref(v)?))
    } else {
        Ok(AttrValue::Value(crate::convert::wire_to_value(v)))
    }
}

fn parse_entity_ref(v: &WireValue) -> Result<EntityRef, GraphError> {
    match v {
        WireValue::Int(i) => EntityId::new(*i as u64)
            .map(EntityRef::Id)
            .ok_or_else(|| GraphError::InvalidTxData(format!("invalid entity id {i}"))),
        // A bare string names a caller-chosen tempid placeholder (e.g.
        // "-1"); lookup refs are always the two-element vector form.
        WireValue::Str(s) => Ok(EntityRef::TempId(s.clone())),
        WireValue::Vector(items) if items.len() == 2 => {
            let attr = keyword_text(&items[0])?;
            Ok(EntityRef::Lookup(attr, crate::convert::wire_to_value(&items[1])))
        }
        other => Err(GraphError::InvalidTxData(format!(
            "unrecognised entity ref: {other:?}"
        ))),
    }
}

fn keyword_text(v: &WireValue) -> Result<String, GraphError> {
    match v {
        WireValue::Keyword(k) => Ok(k.0.clone()),
        WireValue::Str(s) => Ok(s.clone()),
        WireValue::Symbol(s) => Ok(s.0.clone()),
        other => Err(GraphError::InvalidTxData(format!(
            "expected an attribute keyword, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphOptions;

    fn graph_with_schema() -> GraphState {
        GraphState::open(GraphOptions {
            schema: crate::schema::Schema::outliner_default(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn entity_map_allocates_new_entity() {
        let mut g = graph_with_schema();
        let report = g
            .transact(vec![TxItem::Map(vec![(
                "block/content".into(),
                AttrValue::Value(Value::Str("hello".into())),
            )])])
            .unwrap();
        assert_eq!(report.tx_data.len(), 1);
        assert!(report.tx_data[0].added);
    }

    #[test]
    fn upsert_by_unique_identity_reuses_entity() {
        let mut g = graph_with_schema();
        let r1 = g
            .transact(vec![TxItem::Map(vec![
                ("page/name".into(), AttrValue::Value(Value::Str("my page".into()))),
                ("page/title".into(), AttrValue::Value(Value::Str("My Page".into()))),
            ])])
            .unwrap();
        let e1 = *r1.tempids.values().next().unwrap_or(&{
            g.indices
                .resolve_unique("page/name", &Value::Str("my page".into()))
                .unwrap()
        });

        let r2 = g
            .transact(vec![TxItem::Map(vec![
                ("page/name".into(), AttrValue::Value(Value::Str("my page".into()))),
                ("page/title".into(), AttrValue::Value(Value::Str("Renamed".into()))),
            ])])
            .unwrap();
        assert!(r2.tx_data.iter().all(|d| d.e == e1));
        assert_eq!(
            g.indices
                .values_of(e1, "page/title")
                .into_iter()
                .cloned()
                .collect::<Vec<_>>(),
            vec![Value::Str("Renamed".into())]
        );
    }

    #[test]
    fn unique_conflict_is_rejected() {
        let mut g = graph_with_schema();
        g.transact(vec![TxItem::Add(
            EntityRef::TempId("a".into()),
            "page/name".into(),
            AttrValue::Value(Value::Str("dup".into())),
        )])
        .unwrap();
        let err = g
            .transact(vec![TxItem::Add(
                EntityRef::TempId("b".into()),
                "page/name".into(),
                AttrValue::Value(Value::Str("dup".into())),
            )])
            .unwrap_err();
        assert!(matches!(err, GraphError::UniqueConflict { .. }));
    }

    #[test]
    fn retract_entity_removes_every_attribute() {
        let mut g = graph_with_schema();
        let report = g
            .transact(vec![TxItem::Map(vec![(
                "block/uuid".into(),
                AttrValue::Value(Value::Str("u1".into())),
            )])])
            .unwrap();
        let e = report.tx_data[0].e;
        g.transact(vec![TxItem::RetractEntity(EntityRef::Id(e))]).unwrap();
        assert!(g.indices.entity_attrs(e).is_empty());
    }

    #[test]
    fn lookup_ref_creates_entity_when_absent() {
        let mut g = graph_with_schema();
        let report = g
            .transact(vec![TxItem::Add(
                EntityRef::Lookup("block/uuid".into(), Value::Str("fresh".into())),
                "block/content".into(),
                AttrValue::Value(Value::Str("x".into())),
            )])
            .unwrap();
        assert_eq!(report.tx_data.len(), 2);
    }

    #[test]
    fn parse_tx_data_decodes_an_entity_map_with_a_ref() {
        let schema = crate::schema::Schema::outliner_default();
        let wire = WireValue::Vector(vec![WireValue::Map(vec![
            (WireValue::keyword("block/uuid"), WireValue::str("b1")),
            (WireValue::keyword("block/page"), WireValue::Int(1)),
        ])]);
        let items = parse_tx_data(&schema, &wire).unwrap();
        assert_eq!(items.len(), 1);
        match &items[0] {
            TxItem::Map(entries) => {
                assert!(entries
                    .iter()
                    .any(|(a, v)| a == "block/page" && matches!(v, AttrValue::Ref(EntityRef::Id(_)))));
            }
            other => panic!("expected a map item, got {other:?}"),
        }
    }

    #[test]
    fn parse_tx_data_decodes_db_add_and_retract_entity() {
        let schema = crate::schema::Schema::outliner_default();
        let wire = WireValue::Vector(vec![
            WireValue::Vector(vec![
                WireValue::keyword("db/add"),
                WireValue::Int(1),
                WireValue::keyword("block/content"),
                WireValue::str("hi"),
            ]),
            WireValue::Vector(vec![WireValue::keyword("db/retractEntity"), WireValue::Int(2)]),
        ]);
        let items = parse_tx_data(&schema, &wire).unwrap();
        assert!(matches!(items[0], TxItem::Add(EntityRef::Id(_), _, _)));
        assert!(matches!(items[1], TxItem::RetractEntity(EntityRef::Id(_))));
    }
}
