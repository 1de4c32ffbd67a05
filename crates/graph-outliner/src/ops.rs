//! Outliner applier (SPEC_FULL.md §4.5): the ten structural ops over a
//! graph, each committed as its own `transact` call, with affected-page
//! tracking for downstream file writeback (§4.8).
//!
//! Scope notes (see DESIGN.md): `insert-blocks`' `sibling? = false` case
//! and `batch-import-edn`'s recursive import both append new order keys
//! after a parent's existing children rather than truly prepending —
//! the order scheme (`order.rs`) only supports append-after-existing and
//! swap, per SPEC_FULL.md §9's design note. Page identifiers passed to
//! `rename-page`/`delete-page` are resolved as either a raw entity id or a
//! `page/name` lookup (lower-cased); the engine's page schema has no
//! separate `uuid` attribute (SPEC_FULL.md §3), unlike blocks.

use std::collections::BTreeSet;

use graph_engine::datom::Value;
use graph_engine::error::GraphError;
use graph_engine::ids::EntityId;
use graph_engine::schema::ValueType;
use graph_engine::tx::{AttrValue, EntityRef, TxItem};
use graph_engine::GraphState;
use graph_wire::Value as WireValue;

#[derive(Debug, Clone)]
pub enum Op {
    SaveBlock { block: WireValue, opts: WireValue },
    InsertBlocks { blocks: WireValue, target: WireValue, opts: WireValue },
    DeleteBlocks { block_ids: WireValue, opts: WireValue },
    MoveBlocks { block_ids: WireValue, target: WireValue, opts: WireValue },
    MoveBlocksUpDown { block_ids: WireValue, up: bool },
    IndentOutdentBlocks { block_ids: WireValue, indent: bool, opts: WireValue },
    CreatePage { title: WireValue, opts: WireValue },
    RenamePage { page_ref: WireValue, new_title: WireValue },
    DeletePage { page_ref: WireValue },
    BatchImportEdn { data: WireValue, opts: WireValue },
    Transact { tx_data: WireValue, tx_meta: WireValue },
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::SaveBlock { .. } => "save-block",
            Op::InsertBlocks { .. } => "insert-blocks",
            Op::DeleteBlocks { .. } => "delete-blocks",
            Op::MoveBlocks { .. } => "move-blocks",
            Op::MoveBlocksUpDown { .. } => "move-blocks-up-down",
            Op::IndentOutdentBlocks { .. } => "indent-outdent-blocks",
            Op::CreatePage { .. } => "create-page",
            Op::RenamePage { .. } => "rename-page",
            Op::DeletePage { .. } => "delete-page",
            Op::BatchImportEdn { .. } => "batch-import-edn",
            Op::Transact { .. } => "transact",
        }
    }
}

#[derive(Debug)]
pub struct ApplyOpsResult {
    pub results: Vec<WireValue>,
    pub affected_pages: Vec<u64>,
}

/// Parses the wire form of `apply_ops`' `ops` argument: an ordered list of
/// `[op-keyword, args]` pairs.
pub fn parse_ops(ops: &WireValue) -> Result<Vec<Op>, GraphError> {
    as_vec(ops)?.iter().map(parse_op_entry).collect()
}

fn parse_op_entry(v: &WireValue) -> Result<Op, GraphError> {
    let pair = as_vec(v)?;
    let name = pair
        .first()
        .ok_or_else(|| GraphError::InvalidTxData("empty outliner op entry".into()))?;
    let name = keyword_text(name)?;
    let empty = WireValue::Vector(vec![]);
    let args = pair.get(1).unwrap_or(&empty);
    parse_op(&name, args)
}

fn parse_op(name: &str, args: &WireValue) -> Result<Op, GraphError> {
    let bare = name.rsplit('/').next().unwrap_or(name);
    let items = as_vec(args).map(|v| v.to_vec()).unwrap_or_default();
    let at = |i: usize| items.get(i).cloned().unwrap_or(WireValue::Null);
    let map_at = |i: usize| items.get(i).cloned().unwrap_or_else(|| WireValue::Map(vec![]));
    match bare {
        "save-block" => Ok(Op::SaveBlock { block: at(0), opts: map_at(1) }),
        "insert-blocks" => Ok(Op::InsertBlocks { blocks: at(0), target: at(1), opts: map_at(2) }),
        "delete-blocks" => Ok(Op::DeleteBlocks { block_ids: at(0), opts: map_at(1) }),
        "move-blocks" => Ok(Op::MoveBlocks { block_ids: at(0), target: at(1), opts: map_at(2) }),
        "move-blocks-up-down" => Ok(Op::MoveBlocksUpDown {
            block_ids: at(0),
            up: bool_opt(items.get(1), false),
        }),
        "indent-outdent-blocks" => Ok(Op::IndentOutdentBlocks {
            block_ids: at(0),
            indent: bool_opt(items.get(1), false),
            opts: map_at(2),
        }),
        "create-page" => Ok(Op::CreatePage { title: at(0), opts: map_at(1) }),
        "rename-page" => Ok(Op::RenamePage { page_ref: at(0), new_title: at(1) }),
        "delete-page" => Ok(Op::DeletePage { page_ref: at(0) }),
        "batch-import-edn" => Ok(Op::BatchImportEdn { data: at(0), opts: map_at(1) }),
        "transact" => Ok(Op::Transact { tx_data: at(0), tx_meta: map_at(1) }),
        other => Err(GraphError::UnknownOp(other.to_string())),
    }
}

/// Runs each op in order against `g`, committing as it goes. On the first
/// failure, returns the failing op's index alongside its error; ops
/// already committed stay committed (SPEC_FULL.md §4.5: "each op ...
/// commits before the next one starts").
pub fn apply_ops(g: &mut GraphState, ops: &[Op]) -> Result<ApplyOpsResult, (usize, GraphError)> {
    let mut results = Vec::with_capacity(ops.len());
    let mut affected: BTreeSet<u64> = BTreeSet::new();
    for (index, op) in ops.iter().enumerate() {
        match apply_one(g, op, &mut affected) {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::warn!(index, op = op.name(), %e, "outliner op failed, batch aborted");
                return Err((index, e));
            }
        }
    }
    tracing::debug!(count = ops.len(), pages = affected.len(), "outliner ops applied");
    Ok(ApplyOpsResult {
        results,
        affected_pages: affected.into_iter().collect(),
    })
}

fn apply_one(g: &mut GraphState, op: &Op, affected: &mut BTreeSet<u64>) -> Result<WireValue, GraphError> {
    match op {
        Op::SaveBlock { block, opts } => apply_save_block(g, block, opts, affected),
        Op::InsertBlocks { blocks, target, opts } => apply_insert_blocks(g, blocks, target, opts, affected),
        Op::DeleteBlocks { block_ids, opts } => apply_delete_blocks(g, block_ids, opts, affected),
        Op::MoveBlocks { block_ids, target, opts } => apply_move_blocks(g, block_ids, target, opts, affected),
        Op::MoveBlocksUpDown { block_ids, up } => apply_move_up_down(g, block_ids, *up, affected),
        Op::IndentOutdentBlocks { block_ids, indent, opts } => {
            apply_indent_outdent(g, block_ids, *indent, opts, affected)
        }
        Op::CreatePage { title, opts } => apply_create_page(g, title, opts, affected),
        Op::RenamePage { page_ref, new_title } => apply_rename_page(g, page_ref, new_title, affected),
        Op::DeletePage { page_ref } => apply_delete_page(g, page_ref, affected),
        Op::BatchImportEdn { data, opts } => apply_batch_import(g, data, opts, affected),
        Op::Transact { tx_data, tx_meta } => apply_transact(g, tx_data, tx_meta),
    }
}

// ---- shared helpers -------------------------------------------------

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn as_vec(v: &WireValue) -> Result<&[WireValue], GraphError> {
    v.as_vector()
        .ok_or_else(|| GraphError::InvalidTxData(format!("expected a vector, got {v:?}")))
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

fn bool_opt(v: Option<&WireValue>, default: bool) -> bool {
    match v {
        Some(WireValue::Bool(b)) => *b,
        _ => default,
    }
}

/// Resolves a block or page reference from any of: a raw entity id, a
/// block uuid string, a page name string (lower-cased), a uuid value, or
/// a `[attr value]` lookup ref.
fn resolve_entity(g: &GraphState, v: &WireValue) -> Result<EntityId, GraphError> {
    match v {
        WireValue::Int(i) => EntityId::new(*i as u64)
            .ok_or_else(|| GraphError::InvalidTxData(format!("invalid entity id {i}"))),
        WireValue::Str(s) => g
            .indices
            .resolve_unique("block/uuid", &Value::Str(s.clone()))
            .or_else(|| g.indices.resolve_unique("page/name", &Value::Str(s.to_lowercase())))
            .ok_or_else(|| GraphError::NotFound(format!("no entity for {s}"))),
        WireValue::Uuid(u) => g
            .indices
            .resolve_unique("block/uuid", &Value::Uuid(u.0))
            .ok_or_else(|| GraphError::NotFound(format!("no entity for uuid {u}"))),
        WireValue::Vector(items) if items.len() == 2 => {
            let attr = keyword_text(&items[0])?;
            let val = graph_engine::convert::wire_to_value(&items[1]);
            g.indices
                .resolve_unique(&attr, &val)
                .ok_or_else(|| GraphError::NotFound(format!("no entity for [{attr} ...]")))
        }
        WireValue::Map(_) => v
            .get("db/id")
            .and_then(|x| x.as_i64())
            .and_then(|i| EntityId::new(i as u64))
            .ok_or_else(|| GraphError::InvalidTxData("expected a db/id entry".into())),
        other => Err(GraphError::InvalidTxData(format!(
            "cannot resolve an entity from {other:?}"
        ))),
    }
}

fn parse_ref_value(g: &GraphState, v: &WireValue) -> Result<EntityRef, GraphError> {
    Ok(EntityRef::Id(resolve_entity(g, v)?))
}

fn attr_value_for(g: &GraphState, attr: &str, v: &WireValue) -> Result<AttrValue, GraphError> {
    if g.schema.resolve(attr).value_type == ValueType::Ref {
        Ok(AttrValue::Ref(parse_ref_value(g, v)?))
    } else {
        Ok(AttrValue::Value(graph_engine::convert::wire_to_value(v)))
    }
}

fn block_ref(g: &GraphState, e: EntityId, attr: &str) -> Option<EntityId> {
    g.indices.values_of(e, attr).into_iter().next().and_then(|v| v.as_ref_entity())
}

fn block_str(g: &GraphState, e: EntityId, attr: &str) -> Option<String> {
    g.indices
        .values_of(e, attr)
        .into_iter()
        .next()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
}

fn page_of(g: &GraphState, e: EntityId) -> Option<EntityId> {
    block_ref(g, e, "block/page")
}

fn parent_of(g: &GraphState, e: EntityId) -> Option<EntityId> {
    block_ref(g, e, "block/parent")
}

fn order_of(g: &GraphState, e: EntityId) -> Option<String> {
    block_str(g, e, "block/order")
}

fn children_sorted(g: &GraphState, parent: EntityId) -> Vec<EntityId> {
    let mut kids: Vec<(EntityId, String)> = g
        .indices
        .referrers(parent, "block/parent")
        .into_iter()
        .map(|(e, _)| (e, order_of(g, e).unwrap_or_default()))
        .collect();
    kids.sort_by(|a, b| a.1.cmp(&b.1));
    kids.into_iter().map(|(e, _)| e).collect()
}

fn descendants(g: &GraphState, root: EntityId) -> Vec<EntityId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(e) = stack.pop() {
        for child in children_sorted(g, e) {
            out.push(child);
            stack.push(child);
        }
    }
    out
}

fn touch_pages(g: &GraphState, ids: &[EntityId], affected: &mut BTreeSet<u64>) {
    for &id in ids {
        if let Some(page) = page_of(g, id) {
            affected.insert(page.get());
        }
    }
}

fn resolve_ids(g: &GraphState, v: &WireValue) -> Result<Vec<EntityId>, GraphError> {
    as_vec(v)?.iter().map(|item| resolve_entity(g, item)).collect()
}

// ---- individual ops ---------------------------------------------------

fn apply_save_block(
    g: &mut GraphState,
    block: &WireValue,
    _opts: &WireValue,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let entries = block
        .as_map()
        .ok_or_else(|| GraphError::InvalidTxData("save-block expects a block map".into()))?;
    let identity = entries
        .iter()
        .find_map(|(k, v)| match keyword_text(k).ok()?.as_str() {
            "db/id" | "id" | "block/uuid" | "uuid" => Some(v.clone()),
            _ => None,
        })
        .ok_or_else(|| GraphError::InvalidTxData("save-block requires uuid or id".into()))?;
    let target = resolve_entity(g, &identity)?;
    touch_pages(g, &[target], affected);

    let mut items: Vec<(String, AttrValue)> = vec![("db/id".into(), AttrValue::Ref(EntityRef::Id(target)))];
    for (k, v) in entries {
        let key = keyword_text(k)?;
        if matches!(key.as_str(), "db/id" | "id" | "uuid") {
            continue;
        }
        items.push((key.clone(), attr_value_for(g, &key, v)?));
    }
    items.push(("block/updated-at".into(), AttrValue::Value(Value::Int(now_ms()))));
    g.transact(vec![TxItem::Map(items)])?;
    touch_pages(g, &[target], affected);
    Ok(WireValue::Map(vec![(
        WireValue::keyword("db/id"),
        WireValue::Int(target.get() as i64),
    )]))
}

fn apply_insert_blocks(
    g: &mut GraphState,
    blocks: &WireValue,
    target: &WireValue,
    opts: &WireValue,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let sibling = bool_opt(opts.get("sibling?").or_else(|| opts.get("sibling")), true);
    let target_id = resolve_entity(g, target)?;
    let (parent, page) = if sibling {
        let parent = parent_of(g, target_id)
            .ok_or_else(|| GraphError::InvalidTxData("insert-blocks: target has no parent".into()))?;
        let page = page_of(g, target_id)
            .ok_or_else(|| GraphError::InvalidTxData("insert-blocks: target has no page".into()))?;
        (parent, page)
    } else {
        let page = page_of(g, target_id).unwrap_or(target_id);
        (target_id, page)
    };

    let items = as_vec(blocks)?;
    let existing_count = children_sorted(g, parent).len();
    let keys = crate::order::next_keys(existing_count, items.len());
    let mut new_ids = Vec::with_capacity(items.len());
    let now = now_ms();

    for (i, block) in items.iter().enumerate() {
        let uuid = block
            .get("block/uuid")
            .or_else(|| block.get("uuid"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut entries: Vec<(String, AttrValue)> = vec![
            ("block/uuid".into(), AttrValue::Value(Value::Str(uuid))),
            ("block/parent".into(), AttrValue::Ref(EntityRef::Id(parent))),
            ("block/page".into(), AttrValue::Ref(EntityRef::Id(page))),
            ("block/order".into(), AttrValue::Value(Value::Str(keys[i].clone()))),
            ("block/created-at".into(), AttrValue::Value(Value::Int(now))),
            ("block/updated-at".into(), AttrValue::Value(Value::Int(now))),
        ];
        if let Some(map) = block.as_map() {
            for (k, v) in map {
                let key = keyword_text(k)?;
                if matches!(
                    key.as_str(),
                    "block/uuid" | "uuid" | "block/parent" | "block/page" | "block/order"
                ) {
                    continue;
                }
                entries.push((key.clone(), attr_value_for(g, &key, v)?));
            }
        }
        let report = g.transact(vec![TxItem::Map(entries)])?;
        let id = report
            .tx_data
            .iter()
            .find(|d| d.a == "block/uuid")
            .map(|d| d.e)
            .ok_or_else(|| GraphError::Internal("insert-blocks: no uuid datom produced".into()))?;
        new_ids.push(id);
    }
    affected.insert(page.get());
    Ok(WireValue::Vector(
        new_ids.iter().map(|e| WireValue::Int(e.get() as i64)).collect(),
    ))
}

fn apply_delete_blocks(
    g: &mut GraphState,
    block_ids: &WireValue,
    opts: &WireValue,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let with_children = bool_opt(opts.get("children?").or_else(|| opts.get("children")), true);
    let ids = resolve_ids(g, block_ids)?;
    touch_pages(g, &ids, affected);

    let mut to_delete: BTreeSet<u64> = ids.iter().map(|e| e.get()).collect();
    if with_children {
        for &id in &ids {
            for d in descendants(g, id) {
                to_delete.insert(d.get());
            }
        }
    }
    let items: Vec<TxItem> = to_delete
        .iter()
        .filter_map(|raw| EntityId::new(*raw))
        .map(|e| TxItem::RetractEntity(EntityRef::Id(e)))
        .collect();
    g.transact(items)?;
    Ok(WireValue::Int(to_delete.len() as i64))
}

fn apply_move_blocks(
    g: &mut GraphState,
    block_ids: &WireValue,
    target: &WireValue,
    opts: &WireValue,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let sibling = bool_opt(opts.get("sibling?").or_else(|| opts.get("sibling")), true);
    let target_id = resolve_entity(g, target)?;
    let ids = resolve_ids(g, block_ids)?;
    touch_pages(g, &ids, affected);

    let (new_parent, new_page) = if sibling {
        let parent = parent_of(g, target_id)
            .ok_or_else(|| GraphError::InvalidTxData("move-blocks: target has no parent".into()))?;
        let page = page_of(g, target_id)
            .ok_or_else(|| GraphError::InvalidTxData("move-blocks: target has no page".into()))?;
        (parent, page)
    } else {
        (target_id, page_of(g, target_id).unwrap_or(target_id))
    };

    let existing_count = children_sorted(g, new_parent).len();
    let keys = crate::order::next_keys(existing_count, ids.len());
    let mut adds = Vec::with_capacity(ids.len() * 3);
    for (i, &id) in ids.iter().enumerate() {
        adds.push(TxItem::Add(
            EntityRef::Id(id),
            "block/parent".into(),
            AttrValue::Ref(EntityRef::Id(new_parent)),
        ));
        adds.push(TxItem::Add(
            EntityRef::Id(id),
            "block/page".into(),
            AttrValue::Ref(EntityRef::Id(new_page)),
        ));
        adds.push(TxItem::Add(
            EntityRef::Id(id),
            "block/order".into(),
            AttrValue::Value(Value::Str(keys[i].clone())),
        ));
    }
    g.transact(adds)?;
    touch_pages(g, &ids, affected);
    affected.insert(new_page.get());
    Ok(WireValue::Int(ids.len() as i64))
}

fn apply_move_up_down(
    g: &mut GraphState,
    block_ids: &WireValue,
    up: bool,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let ids = resolve_ids(g, block_ids)?;
    touch_pages(g, &ids, affected);

    let mut adds = Vec::new();
    let mut swapped = 0i64;
    for &id in &ids {
        let Some(parent) = parent_of(g, id) else { continue };
        let siblings = children_sorted(g, parent);
        let Some(pos) = siblings.iter().position(|&s| s == id) else { continue };
        let other_pos = if up {
            pos.checked_sub(1)
        } else {
            pos.checked_add(1).filter(|&p| p < siblings.len())
        };
        let Some(other_pos) = other_pos else { continue };
        let other = siblings[other_pos];
        let (Some(order_a), Some(order_b)) = (order_of(g, id), order_of(g, other)) else {
            continue;
        };
        adds.push(TxItem::Add(
            EntityRef::Id(id),
            "block/order".into(),
            AttrValue::Value(Value::Str(order_b)),
        ));
        adds.push(TxItem::Add(
            EntityRef::Id(other),
            "block/order".into(),
            AttrValue::Value(Value::Str(order_a)),
        ));
        swapped += 1;
    }
    if !adds.is_empty() {
        g.transact(adds)?;
    }
    Ok(WireValue::Int(swapped))
}

fn apply_indent_outdent(
    g: &mut GraphState,
    block_ids: &WireValue,
    indent: bool,
    _opts: &WireValue,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let ids = resolve_ids(g, block_ids)?;
    touch_pages(g, &ids, affected);

    let mut moved = 0i64;
    for &id in &ids {
        let Some(parent) = parent_of(g, id) else { continue };
        let new_parent = if indent {
            let siblings = children_sorted(g, parent);
            let Some(pos) = siblings.iter().position(|&s| s == id) else { continue };
            let Some(prev_pos) = pos.checked_sub(1) else { continue };
            siblings[prev_pos]
        } else {
            let Some(grandparent) = parent_of(g, parent) else { continue };
            grandparent
        };
        let existing = children_sorted(g, new_parent).len();
        let key = crate::order::nth_key(existing);
        g.transact(vec![
            TxItem::Add(EntityRef::Id(id), "block/parent".into(), AttrValue::Ref(EntityRef::Id(new_parent))),
            TxItem::Add(EntityRef::Id(id), "block/order".into(), AttrValue::Value(Value::Str(key))),
        ])?;
        moved += 1;
    }
    touch_pages(g, &ids, affected);
    Ok(WireValue::Int(moved))
}

fn apply_create_page(
    g: &mut GraphState,
    title: &WireValue,
    opts: &WireValue,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let title = title
        .as_str()
        .ok_or_else(|| GraphError::InvalidTxData("create-page requires a string title".into()))?
        .to_string();
    let format = opts.get("format").and_then(|v| v.as_str()).unwrap_or("markdown").to_string();
    let page_type = opts.get("type").and_then(|v| v.as_str()).unwrap_or("page").to_string();
    let now = now_ms();
    let report = g.transact(vec![TxItem::Map(vec![
        ("page/name".into(), AttrValue::Value(Value::Str(title.to_lowercase()))),
        ("page/title".into(), AttrValue::Value(Value::Str(title.clone()))),
        ("page/type".into(), AttrValue::Value(Value::Str(page_type))),
        ("page/format".into(), AttrValue::Value(Value::Str(format))),
        ("page/created-at".into(), AttrValue::Value(Value::Int(now))),
        ("page/updated-at".into(), AttrValue::Value(Value::Int(now))),
    ])])?;
    let id = report
        .tx_data
        .iter()
        .find(|d| d.a == "page/name")
        .map(|d| d.e)
        .ok_or_else(|| GraphError::Internal("create-page: no page/name datom produced".into()))?;
    affected.insert(id.get());
    Ok(WireValue::Map(vec![
        (WireValue::keyword("db/id"), WireValue::Int(id.get() as i64)),
        (WireValue::keyword("page/name"), WireValue::Str(title.to_lowercase())),
        (WireValue::keyword("page/title"), WireValue::Str(title)),
    ]))
}

fn apply_rename_page(
    g: &mut GraphState,
    page_ref: &WireValue,
    new_title: &WireValue,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let page = resolve_entity(g, page_ref)?;
    let title = new_title
        .as_str()
        .ok_or_else(|| GraphError::InvalidTxData("rename-page requires a string title".into()))?
        .to_string();
    g.transact(vec![TxItem::Map(vec![
        ("db/id".into(), AttrValue::Ref(EntityRef::Id(page))),
        ("page/name".into(), AttrValue::Value(Value::Str(title.to_lowercase()))),
        ("page/title".into(), AttrValue::Value(Value::Str(title))),
        ("page/updated-at".into(), AttrValue::Value(Value::Int(now_ms()))),
    ])])?;
    affected.insert(page.get());
    Ok(WireValue::Bool(true))
}

fn apply_delete_page(
    g: &mut GraphState,
    page_ref: &WireValue,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let page = resolve_entity(g, page_ref)?;
    affected.insert(page.get());
    let blocks: Vec<EntityId> = g.indices.referrers(page, "block/page").into_iter().map(|(e, _)| e).collect();
    let mut items: Vec<TxItem> = blocks.into_iter().map(|e| TxItem::RetractEntity(EntityRef::Id(e))).collect();
    items.push(TxItem::RetractEntity(EntityRef::Id(page)));
    g.transact(items)?;
    Ok(WireValue::Bool(true))
}

fn apply_batch_import(
    g: &mut GraphState,
    data: &WireValue,
    _opts: &WireValue,
    affected: &mut BTreeSet<u64>,
) -> Result<WireValue, GraphError> {
    let pages = data
        .get("blocks")
        .and_then(|v| v.as_vector())
        .ok_or_else(|| GraphError::InvalidTxData("batch-import-edn expects {blocks: [...]}".into()))?
        .to_vec();

    let mut page_count = 0i64;
    let mut block_count = 0i64;
    for page_tree in &pages {
        let title = page_tree
            .get("title")
            .or_else(|| page_tree.get("page/title"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| GraphError::InvalidTxData("batch-import-edn: page tree missing title".into()))?
            .to_string();
        let now = now_ms();
        let report = g.transact(vec![TxItem::Map(vec![
            ("page/name".into(), AttrValue::Value(Value::Str(title.to_lowercase()))),
            ("page/title".into(), AttrValue::Value(Value::Str(title))),
            ("page/type".into(), AttrValue::Value(Value::Str("page".into()))),
            ("page/created-at".into(), AttrValue::Value(Value::Int(now))),
            ("page/updated-at".into(), AttrValue::Value(Value::Int(now))),
        ])])?;
        let page_id = report
            .tx_data
            .iter()
            .find(|d| d.a == "page/name")
            .map(|d| d.e)
            .ok_or_else(|| GraphError::Internal("batch-import-edn: no page/name datom produced".into()))?;
        affected.insert(page_id.get());
        page_count += 1;

        if let Some(children) = page_tree.get("children").and_then(|v| v.as_vector()) {
            block_count += import_children(g, page_id, page_id, "", children)?;
        }
    }
    Ok(WireValue::Map(vec![
        (WireValue::keyword("page-count"), WireValue::Int(page_count)),
        (WireValue::keyword("block-count"), WireValue::Int(block_count)),
    ]))
}

fn import_children(
    g: &mut GraphState,
    page: EntityId,
    parent: EntityId,
    parent_order: &str,
    children: &[WireValue],
) -> Result<i64, GraphError> {
    let mut count = 0i64;
    for (i, child) in children.iter().enumerate() {
        let order = crate::order::child_key(parent_order, i);
        let content = child.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let uuid = child
            .get("uuid")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = now_ms();
        let report = g.transact(vec![TxItem::Map(vec![
            ("block/uuid".into(), AttrValue::Value(Value::Str(uuid))),
            ("block/parent".into(), AttrValue::Ref(EntityRef::Id(parent))),
            ("block/page".into(), AttrValue::Ref(EntityRef::Id(page))),
            ("block/order".into(), AttrValue::Value(Value::Str(order.clone()))),
            ("block/content".into(), AttrValue::Value(Value::Str(content))),
            ("block/created-at".into(), AttrValue::Value(Value::Int(now))),
            ("block/updated-at".into(), AttrValue::Value(Value::Int(now))),
        ])])?;
        count += 1;
        let block_id = report
            .tx_data
            .iter()
            .find(|d| d.a == "block/uuid")
            .map(|d| d.e)
            .ok_or_else(|| GraphError::Internal("batch-import-edn: no uuid datom produced".into()))?;
        if let Some(grandchildren) = child.get("children").and_then(|v| v.as_vector()) {
            count += import_children(g, page, block_id, &order, grandchildren)?;
        }
    }
    Ok(count)
}

fn apply_transact(g: &mut GraphState, tx_data: &WireValue, _tx_meta: &WireValue) -> Result<WireValue, GraphError> {
    let items = graph_engine::tx::parse_tx_data(&g.schema, tx_data)?;
    let report = g.transact(items)?;
    let tempids: Vec<(WireValue, WireValue)> = report
        .tempids
        .iter()
        .map(|(k, v)| (WireValue::Str(k.clone()), WireValue::Int(v.get() as i64)))
        .collect();
    Ok(WireValue::Map(vec![(WireValue::keyword("tempids"), WireValue::Map(tempids))]))
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

    #[test]
    fn create_page_lower_cases_name_and_pulls_back() {
        let mut g = graph();
        let ops = vec![Op::CreatePage {
            title: WireValue::str("My Page"),
            opts: WireValue::Map(vec![]),
        }];
        let result = apply_ops(&mut g, &ops).unwrap();
        assert_eq!(result.affected_pages.len(), 1);
        let id = EntityId::new(result.affected_pages[0]).unwrap();
        let selector = WireValue::Vector(vec![WireValue::keyword("page/name"), WireValue::keyword("page/title")]);
        let pulled = g.pull(id, &selector).unwrap();
        assert_eq!(pulled.get("page/name"), Some(&WireValue::Str("my page".into())));
        assert_eq!(pulled.get("page/title"), Some(&WireValue::Str("My Page".into())));
    }

    #[test]
    fn insert_then_move_up_swaps_order_strings() {
        let mut g = graph();
        let page_report = g
            .transact(vec![TxItem::Map(vec![(
                "page/name".into(),
                AttrValue::Value(Value::Str("journal".into())),
            )])])
            .unwrap();
        let page = page_report.tx_data[0].e;
        let parent_report = g
            .transact(vec![TxItem::Map(vec![
                ("block/uuid".into(), AttrValue::Value(Value::Str("parent".into()))),
                ("block/page".into(), AttrValue::Ref(EntityRef::Id(page))),
                ("block/order".into(), AttrValue::Value(Value::Str("a".into()))),
            ])])
            .unwrap();
        let parent = parent_report
            .tx_data
            .iter()
            .find(|d| d.a == "block/uuid")
            .unwrap()
            .e;

        let ops = vec![Op::InsertBlocks {
            blocks: WireValue::Vector(vec![
                WireValue::Map(vec![(WireValue::keyword("block/content"), WireValue::str("A"))]),
                WireValue::Map(vec![(WireValue::keyword("block/content"), WireValue::str("B"))]),
            ]),
            target: WireValue::Int(parent.get() as i64),
            opts: WireValue::Map(vec![(WireValue::keyword("sibling?"), WireValue::Bool(false))]),
        }];
        apply_ops(&mut g, &ops).unwrap();

        let mut kids = children_sorted(&g, parent);
        assert_eq!(kids.len(), 2);
        let (a, b) = (kids[0], kids[1]);
        assert_eq!(order_of(&g, a), Some("a".to_string()));
        assert_eq!(order_of(&g, b), Some("b".to_string()));

        let up_ops = vec![Op::MoveBlocksUpDown {
            block_ids: WireValue::Vector(vec![WireValue::Int(b.get() as i64)]),
            up: true,
        }];
        apply_ops(&mut g, &up_ops).unwrap();
        assert_eq!(order_of(&g, a), Some("b".to_string()));
        assert_eq!(order_of(&g, b), Some("a".to_string()));

        kids = children_sorted(&g, parent);
        assert_eq!(kids, vec![b, a]);
    }

    #[test]
    fn delete_page_removes_its_blocks() {
        let mut g = graph();
        let create = apply_ops(
            &mut g,
            &[Op::CreatePage {
                title: WireValue::str("Scratch"),
                opts: WireValue::Map(vec![]),
            }],
        )
        .unwrap();
        let page = create.affected_pages[0];
        let page_id = EntityId::new(page).unwrap();
        g.transact(vec![TxItem::Map(vec![
            ("block/uuid".into(), AttrValue::Value(Value::Str("b1".into()))),
            ("block/page".into(), AttrValue::Ref(EntityRef::Id(page_id))),
        ])])
        .unwrap();

        apply_ops(
            &mut g,
            &[Op::DeletePage {
                page_ref: WireValue::Int(page as i64),
            }],
        )
        .unwrap();

        assert!(g.indices.entity_attrs(page_id).is_empty());
        assert!(g.indices.referrers(page_id, "block/page").is_empty());
    }

    #[test]
    fn batch_import_walks_nested_children_in_order() {
        let mut g = graph();
        let data = WireValue::Map(vec![(
            WireValue::keyword("blocks"),
            WireValue::Vector(vec![WireValue::Map(vec![
                (WireValue::keyword("title"), WireValue::str("Imported")),
                (
                    WireValue::keyword("children"),
                    WireValue::Vector(vec![WireValue::Map(vec![
                        (WireValue::keyword("content"), WireValue::str("top")),
                        (
                            WireValue::keyword("children"),
                            WireValue::Vector(vec![WireValue::Map(vec![(
                                WireValue::keyword("content"),
                                WireValue::str("nested"),
                            )])]),
                        ),
                    ])]),
                ),
            ])]),
        )]);
        let result = apply_ops(&mut g, &[Op::BatchImportEdn { data, opts: WireValue::Map(vec![]) }]).unwrap();
        assert_eq!(result.affected_pages.len(), 1);
        match &result.results[0] {
            WireValue::Map(entries) => {
                let block_count = entries
                    .iter()
                    .find(|(k, _)| matches!(k, WireValue::Keyword(kw) if kw.0 == "block-count"))
                    .map(|(_, v)| v.as_i64().unwrap());
                assert_eq!(block_count, Some(2));
            }
            other => panic!("expected a result map, got {other:?}"),
        }
    }

    #[test]
    fn failing_op_aborts_batch_with_its_index() {
        let mut g = graph();
        let ops = vec![
            Op::CreatePage { title: WireValue::str("Ok"), opts: WireValue::Map(vec![]) },
            Op::DeletePage { page_ref: WireValue::Int(9999) },
        ];
        let err = apply_ops(&mut g, &ops).unwrap_err();
        assert_eq!(err.0, 1);
    }
}
