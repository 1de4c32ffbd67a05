//! `datoms(index, components…)` — direct index scan to plain 5-tuples
//! (SPEC_FULL.md §4.3.6). `components` prefix-match the chosen index's own
//! tuple order; trailing components are left unbound.

use crate::datom::Value;
use crate::error::GraphError;
use crate::ids::{EntityId, TxId};
use crate::GraphState;

/// One bound component of a `datoms` call. The caller supplies these in
/// the order the chosen index stores them natively (e.g. `(a, v, e)` for
/// `:avet`), mirroring how the wire dispatcher will decode its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Entity(EntityId),
    Attr(String),
    Value(Value),
}

fn want_entity(c: Option<&Component>) -> Result<Option<EntityId>, GraphError> {
    match c {
        None => Ok(None),
        Some(Component::Entity(e)) => Ok(Some(*e)),
        Some(other) => Err(GraphError::QueryError(format!(
            "expected an entity component, got {other:?}"
        ))),
    }
}

fn want_attr(c: Option<&Component>) -> Result<Option<String>, GraphError> {
    match c {
        None => Ok(None),
        Some(Component::Attr(a)) => Ok(Some(a.clone())),
        Some(other) => Err(GraphError::QueryError(format!(
            "expected an attribute component, got {other:?}"
        ))),
    }
}

fn want_value(c: Option<&Component>) -> Result<Option<Value>, GraphError> {
    match c {
        None => Ok(None),
        Some(Component::Value(v)) => Ok(Some(v.clone())),
        Some(other) => Err(GraphError::QueryError(format!(
            "expected a value component, got {other:?}"
        ))),
    }
}

type DatomTuple = (u64, String, Value, u64, bool);

impl GraphState {
    pub fn datoms(&self, index: &str, components: &[Component]) -> Result<Vec<DatomTuple>, GraphError> {
        match index.trim_start_matches(':') {
            "eavt" => self.scan_eavt(components),
            "aevt" => self.scan_aevt(components),
            "avet" => self.scan_avet(components),
            "vaet" => self.scan_vaet(components),
            other => Err(GraphError::QueryError(format!("unknown index: {other}"))),
        }
    }

    fn scan_eavt(&self, c: &[Component]) -> Result<Vec<DatomTuple>, GraphError> {
        let e = want_entity(c.first())?;
        let a = want_attr(c.get(1))?;
        let v = want_value(c.get(2))?;

        let out = match e {
            Some(e) => self
                .indices
                .entity_attrs(e)
                .into_iter()
                .filter(|(attr, ..)| a.as_deref().is_none_or(|a| *attr == a))
                .filter(|(_, val, _)| v.as_ref().is_none_or(|v| *val == v))
                .map(|(attr, val, t)| (e.get(), attr.to_string(), val.clone(), t.get(), true))
                .collect(),
            None => self
                .indices
                .all()
                .filter(|(_, attr, ..)| a.as_deref().is_none_or(|a| *attr == a))
                .filter(|(_, _, val, _)| v.as_ref().is_none_or(|v| *val == v))
                .map(|(e, attr, val, t)| (e.get(), attr.to_string(), val.clone(), t.get(), true))
                .collect(),
        };
        Ok(out)
    }

    fn scan_aevt(&self, c: &[Component]) -> Result<Vec<DatomTuple>, GraphError> {
        let a = want_attr(c.first())?
            .ok_or_else(|| GraphError::QueryError(":aevt requires at least an attribute".into()))?;
        let e = want_entity(c.get(1))?;
        let v = want_value(c.get(2))?;

        let out = self
            .indices
            .all_for_attr(&a)
            .into_iter()
            .filter(|(ee, ..)| e.is_none_or(|e| *ee == e))
            .filter(|(_, val, _)| v.as_ref().is_none_or(|v| *val == v))
            .map(|(ee, val, t)| (ee.get(), a.clone(), val.clone(), t.get(), true))
            .collect();
        Ok(out)
    }

    fn scan_avet(&self, c: &[Component]) -> Result<Vec<DatomTuple>, GraphError> {
        let a = want_attr(c.first())?
            .ok_or_else(|| GraphError::QueryError(":avet requires at least an attribute".into()))?;
        let v = want_value(c.get(1))?;
        let e = want_entity(c.get(2))?;

        let out = self
            .indices
            .avet_for_attr(&a)
            .into_iter()
            .filter(|(val, ..)| v.as_ref().is_none_or(|v| *val == v))
            .filter(|(_, ee, _)| e.is_none_or(|e| *ee == e))
            .map(|(val, ee, t)| (ee.get(), a.clone(), val.clone(), t.get(), true))
            .collect();
        Ok(out)
    }

    fn scan_vaet(&self, c: &[Component]) -> Result<Vec<DatomTuple>, GraphError> {
        let target = want_entity(c.first())?
            .ok_or_else(|| GraphError::QueryError(":vaet requires at least a target entity".into()))?;
        let a = want_attr(c.get(1))?;
        let e = want_entity(c.get(2))?;

        let out: Vec<DatomTuple> = match &a {
            Some(a) => self
                .indices
                .referrers(target, a)
                .into_iter()
                .filter(|(src, _)| e.is_none_or(|e| *src == e))
                .map(|(src, t): (EntityId, TxId)| {
                    (src.get(), a.clone(), Value::Ref(target), t.get(), true)
                })
                .collect(),
            None => self
                .indices
                .all_referrers(target)
                .into_iter()
                .filter(|(_, src, _)| e.is_none_or(|e| *src == e))
                .map(|(a, src, t)| (src.get(), a, Value::Ref(target), t.get(), true))
                .collect(),
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{AttrValue, EntityRef, TxItem};
    use crate::{GraphOptions, Schema};

    fn sample_graph() -> (GraphState, EntityId, EntityId) {
        let mut g = GraphState::open(GraphOptions {
            schema: Schema::outliner_default(),
            ..Default::default()
        })
        .unwrap();
        let page = g
            .transact(vec![TxItem::Map(vec![(
                "page/name".into(),
                AttrValue::Value(Value::Str("journal".into())),
            )])])
            .unwrap();
        let page_id = page.tx_data[0].e;
        let block = g
            .transact(vec![TxItem::Map(vec![
                ("block/uuid".into(), AttrValue::Value(Value::Str("b1".into()))),
                ("block/page".into(), AttrValue::Ref(EntityRef::Id(page_id))),
            ])])
            .unwrap();
        let block_id = block.tx_data.iter().find(|d| d.a == "block/uuid").unwrap().e;
        (g, page_id, block_id)
    }

    #[test]
    fn eavt_scan_with_entity_bound_returns_its_datoms() {
        let (g, page_id, _block) = sample_graph();
        let rows = g.datoms(":eavt", &[Component::Entity(page_id)]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, "page/name");
    }

    #[test]
    fn avet_scan_finds_entity_by_unique_value() {
        let (g, page_id, _block) = sample_graph();
        let rows = g
            .datoms(
                ":avet",
                &[
                    Component::Attr("page/name".into()),
                    Component::Value(Value::Str("journal".into())),
                ],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, page_id.get());
    }

    #[test]
    fn vaet_scan_finds_referrers_of_a_page() {
        let (g, page_id, block_id) = sample_graph();
        let rows = g
            .datoms(":vaet", &[Component::Entity(page_id), Component::Attr("block/page".into())])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, block_id.get());
    }

    #[test]
    fn entity_with_id_one_is_not_dropped_by_aevt_scan() {
        let mut g = GraphState::open(GraphOptions {
            schema: Schema::outliner_default(),
            ..Default::default()
        })
        .unwrap();
        g.transact(vec![TxItem::Map(vec![(
            "block/content".into(),
            AttrValue::Value(Value::Str("first entity, string value".into())),
        )])])
        .unwrap();
        let rows = g.datoms(":aevt", &[Component::Attr("block/content".into())]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 1);
    }
}
