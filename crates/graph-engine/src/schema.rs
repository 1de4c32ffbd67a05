use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Ref,
    Scalar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrSpec {
    pub unique_identity: bool,
    pub value_type: ValueType,
    pub cardinality: Cardinality,
    pub index: bool,
}

impl Default for AttrSpec {
    fn default() -> Self {
        Self {
            unique_identity: false,
            value_type: ValueType::Scalar,
            cardinality: Cardinality::One,
            index: false,
        }
    }
}

impl AttrSpec {
    /// Whether this attribute needs a secondary (AVET/VAET) index entry:
    /// true for anything `index`, `unique`, or ref-typed (SPEC_FULL.md
    /// §4.3.1).
    pub fn needs_secondary_index(&self) -> bool {
        self.index || self.unique_identity || self.value_type == ValueType::Ref
    }
}

/// Attribute name -> spec. Attribute names are plain `ns/name` strings
/// (already coerced from wire keywords by the time they reach the engine).
#[derive(Debug, Clone, Default)]
pub struct Schema {
    attrs: BTreeMap<String, AttrSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attr(mut self, name: impl Into<String>, spec: AttrSpec) -> Self {
        self.attrs.insert(name.into(), spec);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, spec: AttrSpec) {
        self.attrs.insert(name.into(), spec);
    }

    pub fn get(&self, attr: &str) -> Option<&AttrSpec> {
        self.attrs.get(attr)
    }

    /// Attributes are schemaless-by-default: an attribute with no explicit
    /// spec behaves as cardinality-one, non-unique, non-indexed, scalar.
    pub fn resolve(&self, attr: &str) -> AttrSpec {
        self.attrs.get(attr).cloned().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrSpec)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The outliner/page schema that `graph-server` installs on every newly
    /// created graph (SPEC_FULL.md §3: page/block attributes).
    pub fn outliner_default() -> Self {
        let mut schema = Self::new();
        schema.register(
            "page/name",
            AttrSpec {
                unique_identity: true,
                value_type: ValueType::Scalar,
                cardinality: Cardinality::One,
                index: true,
            },
        );
        schema.register(
            "page/title",
            AttrSpec {
                index: true,
                ..Default::default()
            },
        );
        schema.register("page/type", AttrSpec::default());
        schema.register("page/format", AttrSpec::default());
        schema.register("page/journal-day", AttrSpec { index: true, ..Default::default() });
        schema.register("page/created-at", AttrSpec::default());
        schema.register("page/updated-at", AttrSpec::default());
        schema.register(
            "block/uuid",
            AttrSpec {
                unique_identity: true,
                ..Default::default()
            },
        );
        schema.register(
            "block/parent",
            AttrSpec {
                value_type: ValueType::Ref,
                index: true,
                ..Default::default()
            },
        );
        schema.register(
            "block/page",
            AttrSpec {
                value_type: ValueType::Ref,
                index: true,
                ..Default::default()
            },
        );
        schema.register("block/order", AttrSpec { index: true, ..Default::default() });
        schema.register("block/content", AttrSpec::default());
        schema.register("block/title", AttrSpec::default());
        schema.register("block/collapsed", AttrSpec::default());
        schema.register("block/marker", AttrSpec::default());
        schema.register("block/priority", AttrSpec::default());
        schema.register("block/scheduled", AttrSpec::default());
        schema.register("block/deadline", AttrSpec::default());
        schema.register("block/created-at", AttrSpec::default());
        schema.register("block/updated-at", AttrSpec::default());
        schema
    }
}
