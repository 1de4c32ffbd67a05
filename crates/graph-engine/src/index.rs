//! The four sorted-map indices from SPEC_FULL.md §4.3.1. Each index holds
//! only the *currently live* facts (assertions not since retracted) — a
//! retraction simply removes the index entries for that `(E,A,V)`, rather
//! than appending a tombstone datom. `transact`'s tx-report is the place a
//! retraction's `added = false` datom is observed (§4.3.3); the indices
//! themselves model "what is true now", matching the entity definition in
//! SPEC_FULL.md §3.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::datom::Value;
use crate::ids::{EntityId, TxId};
use crate::schema::Schema;

#[derive(Debug, Clone, Default)]
pub struct Indices {
    eavt: BTreeSet<(EntityId, String, Value, TxId)>,
    aevt: BTreeSet<(String, EntityId, Value, TxId)>,
    /// Only populated for attributes where `AttrSpec::needs_secondary_index`.
    avet: BTreeSet<(String, Value, EntityId, TxId)>,
    /// Only populated for ref-typed attributes: (target, attr, source, tx).
    vaet: BTreeSet<(EntityId, String, EntityId, TxId)>,
}

impl Indices {
    pub fn insert(&mut self, schema: &Schema, e: EntityId, a: &str, v: &Value, t: TxId) {
        self.eavt.insert((e, a.to_string(), v.clone(), t));
        self.aevt.insert((a.to_string(), e, v.clone(), t));
        let spec = schema.resolve(a);
        if spec.needs_secondary_index() {
            self.avet.insert((a.to_string(), v.clone(), e, t));
        }
        if let Some(target) = v.as_ref_entity() {
            self.vaet.insert((target, a.to_string(), e, t));
        }
    }

    /// Removes the live entry for `(e, a, v)`, regardless of which `t` it
    /// was last asserted at. Returns whether an entry was actually present.
    pub fn remove(&mut self, schema: &Schema, e: EntityId, a: &str, v: &Value) -> bool {
        if let Some(entry) = self
            .eavt
            .iter()
            .find(|(ee, aa, vv, _)| *ee == e && aa == a && vv == v)
            .cloned()
        {
            self.eavt.remove(&entry);
            self.aevt
                .remove(&(entry.1.clone(), entry.0, entry.2.clone(), entry.3));
            let spec = schema.resolve(a);
            if spec.needs_secondary_index() {
                self.avet
                    .remove(&(entry.1.clone(), entry.2.clone(), entry.0, entry.3));
            }
            if let Some(target) = entry.2.as_ref_entity() {
                self.vaet.remove(&(target, entry.1, entry.0, entry.3));
            }
            true
        } else {
            false
        }
    }

    /// All `(a, v, t)` currently live for entity `e`.
    pub fn entity_attrs(&self, e: EntityId) -> Vec<(&str, &Value, TxId)> {
        self.eavt
            .range((
                Bound::Included((e, String::new(), Value::Bool(false), TxId::new(0))),
                Bound::Excluded((
                    EntityId::new(e.get() + 1).unwrap_or(e),
                    String::new(),
                    Value::Bool(false),
                    TxId::new(0),
                )),
            ))
            .filter(|(ee, ..)| *ee == e)
            .map(|(_, a, v, t)| (a.as_str(), v, *t))
            .collect()
    }

    /// Current value(s) of `(e, a)`.
    pub fn values_of(&self, e: EntityId, a: &str) -> Vec<&Value> {
        self.entity_attrs(e)
            .into_iter()
            .filter(|(attr, ..)| *attr == a)
            .map(|(_, v, _)| v)
            .collect()
    }

    /// All entities currently asserting `(a, v)` for unique/index
    /// attributes; used both for lookup-ref resolution and the coercion
    /// boundary's `[A V]` normalisation.
    pub fn entities_for(&self, a: &str, v: &Value) -> Vec<EntityId> {
        self.avet
            .range((
                Bound::Included((a.to_string(), v.clone(), EntityId::new(1).unwrap(), TxId::new(0))),
                Bound::Unbounded,
            ))
            .take_while(|(aa, vv, ..)| aa == a && vv == v)
            .map(|(_, _, e, _)| *e)
            .collect()
    }

    pub fn resolve_unique(&self, a: &str, v: &Value) -> Option<EntityId> {
        self.entities_for(a, v).into_iter().next()
    }

    /// Entities with a ref attribute `a` pointing at `target`.
    pub fn referrers(&self, target: EntityId, a: &str) -> Vec<(EntityId, TxId)> {
        self.vaet
            .range((
                Bound::Included((target, a.to_string(), EntityId::new(1).unwrap(), TxId::new(0))),
                Bound::Unbounded,
            ))
            .take_while(|(t, aa, ..)| *t == target && aa == a)
            .map(|(_, _, src, t)| (*src, *t))
            .collect()
    }

    /// All entities with *any* ref attribute pointing at `target`.
    pub fn all_referrers(&self, target: EntityId) -> Vec<(String, EntityId, TxId)> {
        self.vaet
            .range((
                Bound::Included((target, String::new(), EntityId::new(1).unwrap(), TxId::new(0))),
                Bound::Unbounded,
            ))
            .take_while(|(t, ..)| *t == target)
            .map(|(_, a, src, t)| (a.clone(), *src, *t))
            .collect()
    }

    pub fn all_for_attr(&self, a: &str) -> Vec<(EntityId, &Value, TxId)> {
        // The lower bound's V field must be `Value`'s true minimum (`Str("")`,
        // rank 0), not an arbitrary sentinel: when E ties the bound's E=1
        // sentinel, a weaker placeholder would wrongly exclude real
        // Str-valued tuples for entity id 1.
        self.aevt
            .range((
                Bound::Included((
                    a.to_string(),
                    EntityId::new(1).unwrap(),
                    Value::Str(String::new()),
                    TxId::new(0),
                )),
                Bound::Unbounded,
            ))
            .take_while(|(aa, ..)| aa == a)
            .map(|(_, e, v, t)| (*e, v, *t))
            .collect()
    }

    /// Every `(v, e, t)` currently live for an indexed attribute `a`, in
    /// AVET order — backs `datoms(:avet, a)` with only the attribute bound.
    pub fn avet_for_attr(&self, a: &str) -> Vec<(&Value, EntityId, TxId)> {
        self.avet
            .range((
                Bound::Included((a.to_string(), Value::Str(String::new()), EntityId::new(1).unwrap(), TxId::new(0))),
                Bound::Unbounded,
            ))
            .take_while(|(aa, ..)| aa == a)
            .map(|(_, v, e, t)| (v, *e, *t))
            .collect()
    }

    /// Every live datom, in EAVT order — backs `datoms(:eavt)` with no
    /// components bound.
    pub fn all(&self) -> impl Iterator<Item = (EntityId, &str, &Value, TxId)> {
        self.eavt.iter().map(|(e, a, v, t)| (*e, a.as_str(), v, *t))
    }

    pub fn len(&self) -> usize {
        self.eavt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eavt.is_empty()
    }
}
