//! Shared `graph_wire::Value` <-> engine `Value` scalar conversions, used
//! by the transaction parser, the sync engine, and the query/pull layers.

use graph_wire::Value as WireValue;

use crate::datom::Value;

/// A decoded wire scalar becomes the matching engine `Value`. Keywords and
/// symbols carry their bare text, since the engine's `Value` has no
/// separate keyword/symbol variant — only the coercion boundary and the
/// query/pull layers need that distinction, and they work against
/// `graph_wire::Value` directly.
pub fn wire_to_value(v: &WireValue) -> Value {
    match v {
        WireValue::Str(s) => Value::Str(s.clone()),
        WireValue::Keyword(k) => Value::Str(k.0.clone()),
        WireValue::Symbol(s) => Value::Str(s.0.clone()),
        WireValue::Int(i) => Value::Int(*i),
        WireValue::Float(f) => Value::Float(*f),
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::Uuid(u) => Value::Uuid(u.0),
        _ => Value::Bool(false),
    }
}

/// The inverse conversion. A ref becomes its raw entity id, matching how a
/// ref-typed attribute's value crosses the wire in a raw datom vector
/// (SPEC_FULL.md §4.6); entity-map rendering with `{:db/id e}` is `pull`'s
/// concern, not this one's.
pub fn value_to_wire(v: &Value) -> WireValue {
    match v {
        Value::Str(s) => WireValue::Str(s.clone()),
        Value::Int(i) => WireValue::Int(*i),
        Value::Float(f) => WireValue::Float(*f),
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Uuid(u) => WireValue::Uuid(graph_wire::Uuid(*u)),
        Value::Ref(e) => WireValue::Int(e.get() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_and_symbol_carry_bare_text() {
        assert_eq!(wire_to_value(&WireValue::keyword("block/name")), Value::Str("block/name".into()));
        assert_eq!(wire_to_value(&WireValue::symbol("?e")), Value::Str("?e".into()));
    }

    #[test]
    fn ref_round_trips_through_raw_int() {
        let e = crate::ids::EntityId::new(7).unwrap();
        let wire = value_to_wire(&Value::Ref(e));
        assert_eq!(wire, WireValue::Int(7));
    }
}
