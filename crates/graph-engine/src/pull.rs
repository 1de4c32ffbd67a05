//! Pull API (SPEC_FULL.md §4.3.5): `*`, a bare attribute keyword, a nested
//! map for ref recursion, and the `:as`/`:default`/`:limit` options carried
//! as `[attr {opts}]` pairs.

use std::collections::BTreeSet;

use graph_wire::Value as WireValue;

use crate::datom::Value;
use crate::error::GraphError;
use crate::ids::EntityId;
use crate::schema::Cardinality;
use crate::GraphState;

const MAX_PULL_DEPTH: usize = 64;

#[derive(Debug, Clone)]
enum SelectorItem {
    Wildcard,
    Attr {
        attr: String,
        as_name: Option<String>,
        default: Option<WireValue>,
        limit: Option<usize>,
    },
    Nested {
        attr: String,
        sub: Vec<SelectorItem>,
        as_name: Option<String>,
        limit: Option<usize>,
    },
}

fn keyword_text(v: &WireValue) -> Result<String, GraphError> {
    match v {
        WireValue::Keyword(k) => Ok(k.0.clone()),
        WireValue::Str(s) => Ok(s.clone()),
        WireValue::Symbol(s) => Ok(s.0.clone()),
        other => Err(GraphError::QueryError(format!(
            "expected an attribute keyword in pull selector, got {other:?}"
        ))),
    }
}

fn as_vec(v: &WireValue) -> Result<&[WireValue], GraphError> {
    v.as_vector()
        .ok_or_else(|| GraphError::QueryError(format!("expected a pull selector vector, got {v:?}")))
}

fn apply_option(item: SelectorItem, key: &str, value: &WireValue) -> SelectorItem {
    match (item, key) {
        (SelectorItem::Attr { attr, default, limit, .. }, "as") => SelectorItem::Attr {
            attr,
            as_name: value.as_str().map(|s| s.to_string()),
            default,
            limit,
        },
        (SelectorItem::Attr { attr, as_name, limit, .. }, "default") => SelectorItem::Attr {
            attr,
            as_name,
            default: Some(value.clone()),
            limit,
        },
        (SelectorItem::Attr { attr, as_name, default, .. }, "limit") => SelectorItem::Attr {
            attr,
            as_name,
            default,
            limit: value.as_i64().map(|n| n.max(0) as usize),
        },
        (SelectorItem::Nested { attr, sub, limit, .. }, "as") => SelectorItem::Nested {
            attr,
            sub,
            as_name: value.as_str().map(|s| s.to_string()),
            limit,
        },
        (SelectorItem::Nested { attr, sub, as_name, .. }, "limit") => SelectorItem::Nested {
            attr,
            sub,
            as_name,
            limit: value.as_i64().map(|n| n.max(0) as usize),
        },
        (other, _) => other,
    }
}

fn parse_item(v: &WireValue) -> Result<SelectorItem, GraphError> {
    match v {
        WireValue::Symbol(s) if s.0 == "*" => Ok(SelectorItem::Wildcard),
        WireValue::Keyword(_) | WireValue::Str(_) => Ok(SelectorItem::Attr {
            attr: keyword_text(v)?,
            as_name: None,
            default: None,
            limit: None,
        }),
        WireValue::Map(entries) if entries.len() == 1 => {
            let (attr_key, sub_selector) = &entries[0];
            Ok(SelectorItem::Nested {
                attr: keyword_text(attr_key)?,
                sub: parse_selector(sub_selector)?,
                as_name: None,
                limit: None,
            })
        }
        WireValue::Vector(items) if items.len() == 2 => {
            let base = parse_item(&items[0])?;
            let opts = items[1]
                .as_map()
                .ok_or_else(|| GraphError::QueryError("pull option must be a map".into()))?;
            let mut item = base;
            for (k, val) in opts {
                let key = keyword_text(k)?;
                item = apply_option(item, &key, val);
            }
            Ok(item)
        }
        other => Err(GraphError::QueryError(format!(
            "unrecognised pull selector element: {other:?}"
        ))),
    }
}

fn parse_selector(v: &WireValue) -> Result<Vec<SelectorItem>, GraphError> {
    as_vec(v)?.iter().map(parse_item).collect()
}

fn value_to_wire(v: &Value) -> WireValue {
    match v {
        Value::Str(s) => WireValue::Str(s.clone()),
        Value::Int(i) => WireValue::Int(*i),
        Value::Float(f) => WireValue::Float(*f),
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Uuid(u) => WireValue::Uuid(graph_wire::Uuid(*u)),
        Value::Ref(e) => WireValue::Map(vec![(
            WireValue::keyword("db/id"),
            WireValue::Int(e.get() as i64),
        )]),
    }
}

fn has_db_id(entries: &[(WireValue, WireValue)]) -> bool {
    entries
        .iter()
        .any(|(k, _)| matches!(k, WireValue::Keyword(kw) if kw.0 == "db/id"))
}

impl GraphState {
    pub fn pull(&self, eid: EntityId, selector: &WireValue) -> Result<WireValue, GraphError> {
        let items = parse_selector(selector)?;
        Ok(self.pull_entity(eid, &items, 0))
    }

    pub fn pull_many(&self, eids: &[EntityId], selector: &WireValue) -> Result<WireValue, GraphError> {
        let items = parse_selector(selector)?;
        Ok(WireValue::Vector(
            eids.iter().map(|e| self.pull_entity(*e, &items, 0)).collect(),
        ))
    }

    fn render_values(&self, attr: &str, mut vals: Vec<&Value>, limit: Option<usize>) -> WireValue {
        let spec = self.schema.resolve(attr);
        vals.sort();
        if let Some(n) = limit {
            vals.truncate(n);
        }
        match spec.cardinality {
            Cardinality::One => vals.first().map(|v| value_to_wire(v)).unwrap_or(WireValue::Null),
            Cardinality::Many => WireValue::Vector(vals.into_iter().map(value_to_wire).collect()),
        }
    }

    fn pull_entity(&self, e: EntityId, items: &[SelectorItem], depth: usize) -> WireValue {
        if depth >= MAX_PULL_DEPTH {
            return WireValue::Map(vec![(
                WireValue::keyword("db/id"),
                WireValue::Int(e.get() as i64),
            )]);
        }

        let mut out: Vec<(WireValue, WireValue)> = Vec::new();

        for item in items {
            match item {
                SelectorItem::Wildcard => {
                    let mut seen: BTreeSet<String> = BTreeSet::new();
                    for (attr, _, _) in self.indices.entity_attrs(e) {
                        if seen.insert(attr.to_string()) {
                            let vals = self.indices.values_of(e, attr);
                            out.push((WireValue::keyword(attr), self.render_values(attr, vals, None)));
                        }
                    }
                }
                SelectorItem::Attr {
                    attr,
                    as_name,
                    default,
                    limit,
                } => {
                    let vals = self.indices.values_of(e, attr);
                    let key = WireValue::keyword(as_name.clone().unwrap_or_else(|| attr.clone()));
                    if vals.is_empty() {
                        if let Some(d) = default {
                            out.push((key, d.clone()));
                        }
                    } else {
                        out.push((key, self.render_values(attr, vals, *limit)));
                    }
                }
                SelectorItem::Nested {
                    attr,
                    sub,
                    as_name,
                    limit,
                } => {
                    let mut vals = self.indices.values_of(e, attr);
                    vals.sort();
                    if let Some(n) = limit {
                        vals.truncate(*n);
                    }
                    if vals.is_empty() {
                        continue;
                    }
                    let pulled: Vec<WireValue> = vals
                        .iter()
                        .filter_map(|v| v.as_ref_entity())
                        .map(|target| self.pull_entity(target, sub, depth + 1))
                        .collect();
                    let spec = self.schema.resolve(attr);
                    let key = WireValue::keyword(as_name.clone().unwrap_or_else(|| attr.clone()));
                    let value = match spec.cardinality {
                        Cardinality::Many => WireValue::Vector(pulled),
                        Cardinality::One => pulled.into_iter().next().unwrap_or(WireValue::Null),
                    };
                    out.push((key, value));
                }
            }
        }

        if !has_db_id(&out) {
            out.insert(0, (WireValue::keyword("db/id"), WireValue::Int(e.get() as i64)));
        }
        WireValue::Map(out)
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
                ("block/content".into(), AttrValue::Value(Value::Str("hi".into()))),
                ("block/page".into(), AttrValue::Ref(EntityRef::Id(page_id))),
            ])])
            .unwrap();
        let block_id = block
            .tx_data
            .iter()
            .find(|d| d.a == "block/uuid")
            .unwrap()
            .e;
        (g, page_id, block_id)
    }

    #[test]
    fn pulls_a_plain_attribute() {
        let (g, _page, block) = sample_graph();
        let selector = WireValue::Vector(vec![WireValue::keyword("block/content")]);
        let pulled = g.pull(block, &selector).unwrap();
        assert_eq!(
            pulled.get("block/content"),
            Some(&WireValue::Str("hi".into()))
        );
    }

    #[test]
    fn wildcard_includes_every_attribute_and_db_id() {
        let (g, _page, block) = sample_graph();
        let selector = WireValue::Vector(vec![WireValue::symbol("*")]);
        let pulled = g.pull(block, &selector).unwrap();
        assert!(pulled.get("block/content").is_some());
        assert!(pulled.get("db/id").is_some());
    }

    #[test]
    fn nested_selector_recurses_into_ref() {
        let (g, _page, block) = sample_graph();
        let selector = WireValue::Vector(vec![WireValue::Map(vec![(
            WireValue::keyword("block/page"),
            WireValue::Vector(vec![WireValue::keyword("page/name")]),
        )])]);
        let pulled = g.pull(block, &selector).unwrap();
        let page_map = pulled.get("block/page").unwrap();
        assert_eq!(
            page_map.get("page/name"),
            Some(&WireValue::Str("journal".into()))
        );
    }

    #[test]
    fn default_fills_in_when_attribute_absent() {
        let (g, _page, block) = sample_graph();
        let selector = WireValue::Vector(vec![WireValue::Vector(vec![
            WireValue::keyword("block/priority"),
            WireValue::Map(vec![(WireValue::keyword("default"), WireValue::Str("none".into()))]),
        ])]);
        let pulled = g.pull(block, &selector).unwrap();
        assert_eq!(
            pulled.get("block/priority"),
            Some(&WireValue::Str("none".into()))
        );
    }
}
