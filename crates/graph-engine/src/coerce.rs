//! Type coercion boundary (SPEC_FULL.md §4.4): recovers keyword/symbol/
//! lookup-ref semantics that some serialisation paths on the external
//! writer's side flatten down to plain strings, before any of that data
//! reaches engine calls. Deterministic, total, and idempotent (testable
//! property 6).

use graph_wire::Value;

const QUERY_CLAUSE_WORDS: &[&str] = &["find", "where", "in", "with", "keys", "strs", "syms"];

const KNOWN_FUNCTION_NAMES: &[&str] = &[
    ">", "<", ">=", "<=", "=", "!=", "not=", "contains?", "get", "get-in", "count", "str",
    "re-find", "re-matches", "and", "or", "identity", "ground", "missing?", "tuple",
];

fn coerce_string(s: &str) -> Value {
    if s.contains('/') {
        if KNOWN_FUNCTION_NAMES.contains(&s) {
            Value::symbol(s)
        } else {
            Value::keyword(s)
        }
    } else if QUERY_CLAUSE_WORDS.contains(&s) {
        Value::keyword(s)
    } else if s.starts_with('?')
        || s.starts_with('$')
        || matches!(s, "_" | "..." | "pull" | "*" | "%")
    {
        Value::symbol(s)
    } else {
        Value::Str(s.to_string())
    }
}

/// Recursively restores keyword/symbol/lookup-ref semantics across
/// vectors, maps (keys and values), and bare top-level strings. Already
/// typed values (keywords, symbols, uuids, datoms, numbers, ...) pass
/// through unchanged, which is what makes a second application a no-op.
pub fn coerce(value: Value) -> Value {
    match value {
        Value::Str(s) => coerce_string(&s),
        Value::Vector(items) => {
            if items.len() == 2 {
                if let Value::Str(first) = &items[0] {
                    let coerced_first = coerce_string(first);
                    if matches!(coerced_first, Value::Keyword(_)) {
                        // Lookup ref: only the first element is
                        // keyword-coerced; the second stays exactly as
                        // decoded (SPEC_FULL.md §4.4 rule 4).
                        return Value::Vector(vec![coerced_first, items[1].clone()]);
                    }
                }
            }
            Value::Vector(items.into_iter().map(coerce).collect())
        }
        Value::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (coerce(k), coerce(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Coerces the attribute half of a raw wire datom into a keyword-shaped
/// attribute name, per the sync engine's requirement (SPEC_FULL.md §4.6)
/// that attribute names arriving as plain strings get the same treatment.
pub fn coerce_attribute(attribute: &str) -> String {
    match coerce_string(attribute) {
        Value::Keyword(kw) => kw.0,
        _ => attribute.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_wire::{Keyword, Symbol};

    #[test]
    fn namespaced_string_becomes_keyword() {
        assert_eq!(coerce(Value::str("block/name")), Value::keyword("block/name"));
    }

    #[test]
    fn known_function_name_is_a_symbol_even_with_slash() {
        // None of the fixed function names actually contain '/', but the
        // exemption must still be checked before the slash rule fires.
        assert_eq!(coerce(Value::str("re-find")), Value::symbol("re-find"));
    }

    #[test]
    fn query_clause_word_becomes_keyword() {
        assert_eq!(coerce(Value::str("find")), Value::keyword("find"));
        assert_eq!(coerce(Value::str("where")), Value::keyword("where"));
    }

    #[test]
    fn query_variable_becomes_symbol() {
        assert_eq!(coerce(Value::str("?e")), Value::symbol("?e"));
        assert_eq!(coerce(Value::str("$")), Value::symbol("$"));
        assert_eq!(coerce(Value::str("_")), Value::symbol("_"));
        assert_eq!(coerce(Value::str("pull")), Value::symbol("pull"));
    }

    #[test]
    fn plain_literal_is_left_untouched() {
        assert_eq!(coerce(Value::str("hello world")), Value::str("hello world"));
    }

    #[test]
    fn two_element_vector_with_attribute_head_becomes_lookup_ref() {
        let input = Value::Vector(vec![Value::str("block/uuid"), Value::str("abc-123")]);
        let expected = Value::Vector(vec![Value::keyword("block/uuid"), Value::str("abc-123")]);
        assert_eq!(coerce(input), expected);
    }

    #[test]
    fn coercion_is_idempotent() {
        let input = Value::Vector(vec![
            Value::str("block/name"),
            Value::str("?e"),
            Value::Map(vec![(Value::str("find"), Value::Vector(vec![Value::str("?e")]))]),
        ]);
        let once = coerce(input.clone());
        let twice = coerce(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn already_typed_values_pass_through() {
        let kw = Value::Keyword(Keyword::new("already/keyword"));
        assert_eq!(coerce(kw.clone()), kw);
        let sym = Value::Symbol(Symbol("?already".into()));
        assert_eq!(coerce(sym.clone()), sym);
    }
}
