//! The RPC dispatcher (SPEC_FULL.md §4.7): request envelope in, response
//! envelope out, never panicking the transport loop. Grounded on
//! `moire_web::app`'s open-coded match over message kinds, generalised here
//! into a `HandlerMap` built once at startup (SPEC_FULL.md §9's redesign
//! note), since the op catalogue is large enough that a hand-written match
//! arm per op would bury the envelope/error-mapping logic this module
//! actually owns.
//!
//! Wire shape assumption (undocumented by the source spec, recorded here
//! and in DESIGN.md): a request's `payload` is a map; ops that act on a
//! graph carry a `graph` string key naming it, plus whatever positional or
//! named arguments the op needs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use graph_engine::error::GraphError;
use graph_engine::ids::EntityId;
use graph_engine::scan::Component;
use graph_wire::{Value as WireValue, WireDatom};
use tracing::{debug, warn};

use crate::state::AppState;

/// The server's minimum-compatible protocol version.
const MIN_VERSION: (u64, u64, u64) = (0, 1, 0);

pub type HandlerFut = Pin<Box<dyn Future<Output = Result<WireValue, DispatchError>> + Send>>;
pub type Handler = Arc<dyn Fn(AppState, WireValue) -> HandlerFut + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DispatchError {
    pub kind: &'static str,
    pub message: String,
}

impl DispatchError {
    fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl From<GraphError> for DispatchError {
    fn from(e: GraphError) -> Self {
        let kind = match &e {
            GraphError::GraphNotFound(_) | GraphError::NotFound(_) => "graph-not-found",
            GraphError::Storage(_) => "storage-error",
            GraphError::Malformed(_) | GraphError::InvalidTxData(_) | GraphError::QueryError(_) => "malformed",
            GraphError::UnknownOp(_) => "unknown-op",
            GraphError::UnknownAttribute(_) | GraphError::UniqueConflict { .. } | GraphError::Internal(_) => {
                "internal-error"
            }
        };
        DispatchError::new(kind, e.to_string())
    }
}

pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

/// Builds the op catalogue once at startup (SPEC_FULL.md §4.7's table).
pub fn build_dispatcher() -> Dispatcher {
    let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
    macro_rules! register {
        ($name:literal, $f:expr) => {
            handlers.insert($name, Arc::new(|state: AppState, payload: WireValue| {
                Box::pin($f(state, payload)) as HandlerFut
            }));
        };
    }
    register!("q", handle_q);
    register!("pull", handle_pull);
    register!("pull-many", handle_pull_many);
    register!("datoms", handle_datoms);
    register!("transact", handle_transact);
    register!("apply-outliner-ops", handle_apply_outliner_ops);
    register!("sync-datoms", handle_sync_datoms);
    register!("create-or-open-db", handle_create_or_open_db);
    register!("db-exists", handle_db_exists);
    register!("list-db", handle_list_db);
    register!("get-initial-data", handle_get_initial_data);
    register!("get-view-data", handle_get_view_data);
    register!("delete-page", handle_delete_page);
    register!("get-page-trees", handle_get_page_trees);
    register!("get-file-writes", handle_get_file_writes);
    register!("sync-app-state", handle_sync_app_state);
    register!("set-context", handle_set_context);
    register!("update-thread-atom", handle_update_thread_atom);
    register!("init", handle_init);
    register!("write-log", handle_write_log);
    register!("extract-and-transact", handle_extract_and_transact);
    for stub in ["rtc-send", "rtc-connect", "rtc-disconnect", "vec-search", "vec-index", "mobile-sync", "import-db"] {
        handlers.insert(Box::leak(stub.to_string().into_boxed_str()), Arc::new(|_state, _payload| {
            Box::pin(async { Ok(WireValue::Null) }) as HandlerFut
        }));
    }
    Dispatcher { handlers }
}

/// Dispatches one decoded request envelope and returns the response
/// envelope. Never returns an `Err` — every failure becomes an error
/// response (SPEC_FULL.md §4.7, §7: "the dispatcher must never crash the
/// transport").
pub async fn dispatch(dispatcher: &Dispatcher, state: &AppState, request: &WireValue) -> WireValue {
    let id = request.get("id").cloned().unwrap_or(WireValue::Null);
    let timestamp = WireValue::Int(now_ms());
    let kind = request.get("type").and_then(|v| v.as_str()).unwrap_or("request").to_string();

    if kind == "handshake" {
        return handle_handshake(request, id, timestamp);
    }

    let Some(op_raw) = request.get("op") else {
        return error_response(id, None, "malformed", "missing op", timestamp);
    };
    let op = coerce_op_name(op_raw);
    let payload = request.get("payload").cloned().unwrap_or_else(|| WireValue::Map(vec![]));

    let Some(handler) = dispatcher.handlers.get(op.as_str()) else {
        warn!(op = %op, "unknown op");
        return error_response(id, Some(&op), "unknown-op", format!("unknown op: {op}"), timestamp);
    };

    debug!(op = %op, "dispatching");
    match handler(state.clone(), payload).await {
        Ok(result) => WireValue::Map(vec![
            (WireValue::keyword("type"), WireValue::str("response")),
            (WireValue::keyword("request-id"), id),
            (WireValue::keyword("ok?"), WireValue::Bool(true)),
            (WireValue::keyword("op"), WireValue::str(op)),
            (WireValue::keyword("payload"), result),
            (WireValue::keyword("timestamp"), timestamp),
        ]),
        Err(e) => {
            warn!(op = %op, kind = e.kind, message = %e.message, "op failed");
            error_response(id, Some(&op), e.kind, e.message, timestamp)
        }
    }
}

fn error_response(id: WireValue, op: Option<&str>, kind: &str, message: impl Into<String>, timestamp: WireValue) -> WireValue {
    let mut entries = vec![
        (WireValue::keyword("type"), WireValue::str("response")),
        (WireValue::keyword("request-id"), id),
        (WireValue::keyword("ok?"), WireValue::Bool(false)),
        (WireValue::keyword("error-type"), WireValue::keyword(kind)),
        (WireValue::keyword("message"), WireValue::Str(message.into())),
        (WireValue::keyword("timestamp"), timestamp),
    ];
    if let Some(op) = op {
        entries.push((WireValue::keyword("op"), WireValue::str(op)));
    }
    WireValue::Map(entries)
}

fn min_version_wire() -> WireValue {
    WireValue::Vector(vec![
        WireValue::Int(MIN_VERSION.0 as i64),
        WireValue::Int(MIN_VERSION.1 as i64),
        WireValue::Int(MIN_VERSION.2 as i64),
    ])
}

/// Handshakes answer with `handshake-response`, never `response` (SPEC_FULL.md
/// §7, testable property 6) — and every answer, success or rejection, carries
/// the server's minimum version so the client learns the floor either way.
fn handle_handshake(request: &WireValue, id: WireValue, timestamp: WireValue) -> WireValue {
    let version = request
        .get("version")
        .and_then(|v| v.as_vector())
        .map(parse_version)
        .unwrap_or((0, 0, 0));
    if version < MIN_VERSION {
        return WireValue::Map(vec![
            (WireValue::keyword("type"), WireValue::str("handshake-response")),
            (WireValue::keyword("request-id"), id),
            (WireValue::keyword("ok?"), WireValue::Bool(false)),
            (WireValue::keyword("error-type"), WireValue::keyword("version-mismatch")),
            (
                WireValue::keyword("message"),
                WireValue::Str(format!("client version {version:?} below minimum {MIN_VERSION:?}")),
            ),
            (WireValue::keyword("version"), min_version_wire()),
            (WireValue::keyword("timestamp"), timestamp),
        ]);
    }
    WireValue::Map(vec![
        (WireValue::keyword("type"), WireValue::str("handshake-response")),
        (WireValue::keyword("request-id"), id),
        (WireValue::keyword("ok?"), WireValue::Bool(true)),
        (WireValue::keyword("version"), min_version_wire()),
        (
            WireValue::keyword("capabilities"),
            WireValue::Map(vec![
                (WireValue::keyword("query"), WireValue::Bool(true)),
                (WireValue::keyword("transact"), WireValue::Bool(true)),
                (WireValue::keyword("pull"), WireValue::Bool(true)),
                (WireValue::keyword("push"), WireValue::Bool(true)),
            ]),
        ),
        (WireValue::keyword("timestamp"), timestamp),
    ])
}

fn parse_version(v: &[WireValue]) -> (u64, u64, u64) {
    let at = |i: usize| v.get(i).and_then(|x| x.as_i64()).unwrap_or(0) as u64;
    (at(0), at(1), at(2))
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Op names may arrive as `thread-api/q` or bare `q`; either way, and
/// whether the wire form is a keyword or a plain string, this strips any
/// namespace prefix before case-matching (SPEC_FULL.md §4.4, §4.7).
fn coerce_op_name(v: &WireValue) -> String {
    let text = match v {
        WireValue::Keyword(k) => k.0.clone(),
        WireValue::Symbol(s) => s.0.clone(),
        WireValue::Str(s) => s.clone(),
        other => format!("{other:?}"),
    };
    text.rsplit('/').next().unwrap_or(&text).to_string()
}

fn payload_graph_name(payload: &WireValue) -> Result<String, DispatchError> {
    payload
        .get("graph")
        .or_else(|| payload.get("name"))
        .or_else(|| payload.get("db"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| DispatchError::new("malformed", "payload is missing a graph name"))
}

async fn require_graph(state: &AppState, payload: &WireValue) -> Result<crate::state::SharedGraph, DispatchError> {
    let name = payload_graph_name(payload)?;
    state
        .graph(&name)
        .await
        .ok_or_else(|| DispatchError::new("graph-not-found", format!("no graph named {name}")))
}

fn wire_bool(v: Option<&WireValue>) -> Option<bool> {
    match v {
        Some(WireValue::Bool(b)) => Some(*b),
        _ => None,
    }
}

fn result_map(entries: Vec<(&str, WireValue)>) -> WireValue {
    WireValue::Map(entries.into_iter().map(|(k, v)| (WireValue::keyword(k), v)).collect())
}

// ---- read ops -----------------------------------------------------------

async fn handle_q(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let query = payload
        .get("query")
        .ok_or_else(|| DispatchError::new("malformed", "q requires a query"))?
        .clone();
    let inputs = payload.get("inputs").and_then(|v| v.as_vector()).map(|v| v.to_vec()).unwrap_or_default();
    let result = graph.read().await.query(&query, &inputs)?;
    let rows = WireValue::Vector(
        result
            .rows
            .iter()
            .map(|row| WireValue::Vector(row.iter().map(graph_engine::convert::value_to_wire).collect()))
            .collect(),
    );
    let mut entries = vec![("rows", rows)];
    if let Some(keys) = result.keys {
        entries.push(("keys", WireValue::Vector(keys.into_iter().map(WireValue::Str).collect())));
    }
    Ok(result_map(entries))
}

fn entity_arg(v: Option<&WireValue>, field: &str) -> Result<EntityId, DispatchError> {
    v.and_then(|x| x.as_i64())
        .and_then(|i| EntityId::new(i as u64))
        .ok_or_else(|| DispatchError::new("malformed", format!("{field} must be a positive integer entity id")))
}

async fn handle_pull(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let selector = payload
        .get("selector")
        .ok_or_else(|| DispatchError::new("malformed", "pull requires a selector"))?
        .clone();
    let eid = entity_arg(payload.get("eid"), "eid")?;
    let pulled = graph.read().await.pull(eid, &selector)?;
    Ok(result_map(vec![("result", pulled)]))
}

async fn handle_pull_many(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let selector = payload
        .get("selector")
        .ok_or_else(|| DispatchError::new("malformed", "pull-many requires a selector"))?
        .clone();
    let eids: Vec<EntityId> = payload
        .get("eids")
        .and_then(|v| v.as_vector())
        .ok_or_else(|| DispatchError::new("malformed", "pull-many requires eids"))?
        .iter()
        .map(|v| entity_arg(Some(v), "eids"))
        .collect::<Result<_, _>>()?;
    let pulled = graph.read().await.pull_many(&eids, &selector)?;
    Ok(result_map(vec![("result", pulled)]))
}

async fn handle_datoms(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let index = payload
        .get("index")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DispatchError::new("malformed", "datoms requires an index name"))?
        .to_string();
    let components = payload
        .get("components")
        .and_then(|v| v.as_vector())
        .map(|v| v.to_vec())
        .unwrap_or_default()
        .iter()
        .map(wire_to_component)
        .collect::<Result<Vec<_>, _>>()?;
    let g = graph.read().await;
    let rows = g.datoms(&index, &components)?;
    let wire_rows = WireValue::Vector(
        rows.into_iter()
            .map(|(e, a, v, t, added)| {
                WireValue::Vector(vec![
                    WireValue::Int(e as i64),
                    WireValue::Str(a),
                    graph_engine::convert::value_to_wire(&v),
                    WireValue::Int(t as i64),
                    WireValue::Bool(added),
                ])
            })
            .collect(),
    );
    Ok(result_map(vec![("rows", wire_rows)]))
}

fn wire_to_component(v: &WireValue) -> Result<Component, DispatchError> {
    let pair = v
        .as_vector()
        .ok_or_else(|| DispatchError::new("malformed", "each datoms component is [kind, value]"))?;
    let kind = pair.first().and_then(|k| k.as_str()).unwrap_or("");
    let value = pair.get(1).cloned().unwrap_or(WireValue::Null);
    match kind {
        "entity" => Ok(Component::Entity(entity_arg(Some(&value), "entity component")?)),
        "attr" => Ok(Component::Attr(
            value.as_str().map(|s| s.to_string()).ok_or_else(|| DispatchError::new("malformed", "attr component must be a string"))?,
        )),
        "value" => Ok(Component::Value(graph_engine::convert::wire_to_value(&value))),
        other => Err(DispatchError::new("malformed", format!("unknown datoms component kind {other}"))),
    }
}

// ---- write ops ------------------------------------------------------------

async fn handle_transact(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let tx_data = payload
        .get("tx-data")
        .ok_or_else(|| DispatchError::new("malformed", "transact requires tx-data"))?
        .clone();
    let mut g = graph.write().await;
    let items = graph_engine::tx::parse_tx_data(&g.schema, &tx_data)?;
    let report = g.transact(items)?;
    let tempids = WireValue::Map(
        report
            .tempids
            .iter()
            .map(|(k, v)| (WireValue::Str(k.clone()), WireValue::Int(v.get() as i64)))
            .collect(),
    );
    Ok(result_map(vec![("tempids", tempids)]))
}

async fn handle_apply_outliner_ops(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let ops_wire = payload
        .get("ops")
        .ok_or_else(|| DispatchError::new("malformed", "apply-outliner-ops requires ops"))?;
    let ops = graph_outliner::parse_ops(ops_wire)?;
    let mut g = graph.write().await;
    let outcome = graph_outliner::apply_ops(&mut g, &ops).map_err(|(index, e)| {
        let mut dispatch_err: DispatchError = e.into();
        dispatch_err.message = format!("op {index}: {}", dispatch_err.message);
        dispatch_err
    })?;
    Ok(result_map(vec![
        ("result", WireValue::Vector(outcome.results)),
        (
            "affected-pages",
            WireValue::Vector(outcome.affected_pages.into_iter().map(|p| WireValue::Int(p as i64)).collect()),
        ),
    ]))
}

async fn handle_sync_datoms(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let datoms_wire = payload
        .get("datoms")
        .and_then(|v| v.as_vector())
        .ok_or_else(|| DispatchError::new("malformed", "sync-datoms requires a datoms vector"))?;
    let datoms: Vec<WireDatom> = datoms_wire.iter().map(wire_value_to_datom).collect::<Result<_, _>>()?;
    let full_sync = wire_bool(payload.get("full-sync?")).unwrap_or(false);
    let mut g = graph.write().await;
    let result = graph_outliner::sync_datoms(&mut g, &datoms, full_sync)?;
    Ok(result_map(vec![
        ("count", WireValue::Int(result.count as i64)),
        ("elapsed-ms", WireValue::Int(result.elapsed_ms as i64)),
    ]))
}

fn wire_value_to_datom(v: &WireValue) -> Result<WireDatom, DispatchError> {
    let tuple = v.as_vector().ok_or_else(|| DispatchError::new("malformed", "each sync datom is a 5-tuple"))?;
    let get = |i: usize| tuple.get(i).cloned().unwrap_or(WireValue::Null);
    Ok(WireDatom {
        e: get(0).as_i64().ok_or_else(|| DispatchError::new("malformed", "datom entity must be an integer"))?,
        a: get(1).as_str().map(|s| s.to_string()).ok_or_else(|| DispatchError::new("malformed", "datom attr must be a string"))?,
        v: Box::new(get(2)),
        t: get(3).as_i64().unwrap_or(0),
        added: matches!(get(4), WireValue::Bool(true)),
    })
}

// ---- graph registry -------------------------------------------------------

async fn handle_create_or_open_db(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let name = payload_graph_name(&payload)?;
    state.create_or_open(&name).await?;
    Ok(result_map(vec![("name", WireValue::Str(name))]))
}

async fn handle_db_exists(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let name = payload_graph_name(&payload)?;
    Ok(result_map(vec![("exists", WireValue::Bool(state.db_exists(&name).await))]))
}

async fn handle_list_db(state: AppState, _payload: WireValue) -> Result<WireValue, DispatchError> {
    let names = state.list_db().await;
    let list = WireValue::Vector(
        names
            .into_iter()
            .map(|name| {
                WireValue::Map(vec![
                    (WireValue::keyword("name"), WireValue::Str(name)),
                    (WireValue::keyword("metadata"), WireValue::Map(vec![])),
                ])
            })
            .collect(),
    );
    Ok(result_map(vec![("dbs", list)]))
}

async fn handle_get_initial_data(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let file_graph_import = wire_bool(payload.get("file-graph-import?")).unwrap_or(false);
    let g = graph.read().await;
    let index = if file_graph_import { "eavt" } else { "avet" };
    let components: Vec<Component> = if file_graph_import {
        vec![]
    } else {
        vec![Component::Attr("page/name".to_string())]
    };
    let rows = g.datoms(index, &components)?;
    let wire_rows = WireValue::Vector(
        rows.into_iter()
            .map(|(e, a, v, t, added)| {
                WireValue::Vector(vec![
                    WireValue::Int(e as i64),
                    WireValue::Str(a),
                    graph_engine::convert::value_to_wire(&v),
                    WireValue::Int(t as i64),
                    WireValue::Bool(added),
                ])
            })
            .collect(),
    );
    Ok(result_map(vec![("datoms", wire_rows)]))
}

async fn handle_get_view_data(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let journals = wire_bool(payload.get("journals?")).unwrap_or(false);
    if !journals {
        return Ok(result_map(vec![("ids", WireValue::Null)]));
    }
    let today = payload.get("today").and_then(|v| v.as_i64()).unwrap_or_else(|| now_ms() / 86_400_000);
    let g = graph.read().await;
    let rows = g.datoms("avet", &[Component::Attr("page/journal-day".to_string())])?;
    let mut ids: Vec<(i64, i64)> = rows
        .into_iter()
        .filter_map(|(e, _, v, _, _)| match v {
            graph_engine::datom::Value::Int(day) if day <= today => Some((e as i64, day)),
            _ => None,
        })
        .collect();
    ids.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(result_map(vec![(
        "ids",
        WireValue::Vector(ids.into_iter().map(|(e, _)| WireValue::Int(e)).collect()),
    )]))
}

async fn handle_delete_page(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let page_name = payload
        .get("name")
        .or_else(|| payload.get("page"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| DispatchError::new("malformed", "delete-page requires a page name"))?
        .to_lowercase();
    let mut g = graph.write().await;
    let page = g.indices.resolve_unique("page/name", &graph_engine::datom::Value::Str(page_name));
    let Some(page) = page else {
        return Ok(result_map(vec![("deleted", WireValue::Bool(false))]));
    };
    let ops = vec![graph_outliner::Op::DeletePage {
        page_ref: WireValue::Int(page.get() as i64),
    }];
    graph_outliner::apply_ops(&mut g, &ops).map_err(|(_, e)| e)?;
    Ok(result_map(vec![("deleted", WireValue::Bool(true))]))
}

async fn handle_get_page_trees(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let page_ids: Vec<EntityId> = payload
        .get("page-ids")
        .and_then(|v| v.as_vector())
        .ok_or_else(|| DispatchError::new("malformed", "get-page-trees requires page-ids"))?
        .iter()
        .map(|v| entity_arg(Some(v), "page-ids"))
        .collect::<Result<_, _>>()?;
    let g = graph.read().await;
    let trees = graph_outliner::get_page_trees(&g, &page_ids);
    Ok(result_map(vec![(
        "page-trees",
        WireValue::Vector(trees.iter().map(|t| t.to_wire()).collect()),
    )]))
}

fn render_plain_text(tree: &graph_outliner::PageTree, _format: &str) -> String {
    fn walk(nodes: &[graph_outliner::BlockNode], depth: usize, out: &mut String) {
        for node in nodes {
            out.push_str(&"  ".repeat(depth));
            out.push_str("- ");
            out.push_str(node.content.as_deref().unwrap_or(""));
            out.push('\n');
            walk(&node.children, depth + 1, out);
        }
    }
    let mut out = String::new();
    walk(&tree.children, 0, &mut out);
    out
}

async fn handle_get_file_writes(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let page_ids: Vec<EntityId> = payload
        .get("page-ids")
        .and_then(|v| v.as_vector())
        .ok_or_else(|| DispatchError::new("malformed", "get-file-writes requires page-ids"))?
        .iter()
        .map(|v| entity_arg(Some(v), "page-ids"))
        .collect::<Result<_, _>>()?;
    let graph_dir = payload.get("graph-dir").and_then(|v| v.as_str()).unwrap_or(".");
    let format = payload.get("format").and_then(|v| v.as_str()).unwrap_or("md");
    let g = graph.read().await;
    let writes = graph_outliner::get_file_writes(&g, &page_ids, graph_dir, format, render_plain_text);
    Ok(result_map(vec![(
        "writes",
        WireValue::Vector(
            writes
                .into_iter()
                .map(|(path, content)| WireValue::Vector(vec![WireValue::Str(path), WireValue::Str(content)]))
                .collect(),
        ),
    )]))
}

// ---- process-wide state cells --------------------------------------------

async fn handle_sync_app_state(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    state.merge_app_state(payload.get("patch").unwrap_or(&payload));
    Ok(result_map(vec![("state", state.app_state_cell())]))
}

async fn handle_set_context(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    state.merge_context(payload.get("patch").unwrap_or(&payload));
    Ok(result_map(vec![("context", state.context_cell())]))
}

async fn handle_update_thread_atom(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let key = payload
        .get("key")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DispatchError::new("malformed", "update-thread-atom requires a key"))?;
    let value = payload.get("value").cloned().unwrap_or(WireValue::Null);
    state.update_thread_atom(key, value)?;
    Ok(result_map(vec![("atoms", state.thread_atoms_snapshot())]))
}

async fn handle_init(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    state.merge_app_state(&payload);
    Ok(result_map(vec![("ok", WireValue::Bool(true))]))
}

async fn handle_write_log(_state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let message = payload.get("message").and_then(|v| v.as_str()).unwrap_or("");
    debug!(target: "client-log", "{message}");
    Ok(result_map(vec![("ok", WireValue::Bool(true))]))
}

async fn handle_extract_and_transact(state: AppState, payload: WireValue) -> Result<WireValue, DispatchError> {
    let graph = require_graph(&state, &payload).await?;
    let data = payload
        .get("blocks")
        .map(|blocks| WireValue::Map(vec![(WireValue::keyword("blocks"), blocks.clone())]))
        .ok_or_else(|| DispatchError::new("malformed", "extract-and-transact requires blocks"))?;
    let mut g = graph.write().await;
    let outcome = graph_outliner::apply_ops(
        &mut g,
        &[graph_outliner::Op::BatchImportEdn { data, opts: WireValue::Map(vec![]) }],
    )
    .map_err(|(_, e)| e)?;
    let (mut page_count, mut block_count) = (0i64, 0i64);
    if let Some(WireValue::Map(entries)) = outcome.results.first() {
        for (k, v) in entries {
            match k {
                WireValue::Keyword(kw) if kw.0 == "page-count" => page_count = v.as_i64().unwrap_or(0),
                WireValue::Keyword(kw) if kw.0 == "block-count" => block_count = v.as_i64().unwrap_or(0),
                _ => {}
            }
        }
    }
    Ok(result_map(vec![
        ("success", WireValue::Bool(true)),
        ("page-count", WireValue::Int(page_count)),
        ("block-count", WireValue::Int(block_count)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn envelope(op: &str, payload: WireValue) -> WireValue {
        WireValue::Map(vec![
            (WireValue::keyword("id"), WireValue::Int(1)),
            (WireValue::keyword("type"), WireValue::str("request")),
            (WireValue::keyword("op"), WireValue::keyword(op)),
            (WireValue::keyword("payload"), payload),
        ])
    }

    #[tokio::test]
    async fn unknown_op_maps_to_unknown_op_error() {
        let state = AppState::new(ServerConfig::default());
        let dispatcher = build_dispatcher();
        let resp = dispatch(&dispatcher, &state, &envelope("not-a-real-op", WireValue::Map(vec![]))).await;
        assert_eq!(resp.get("error-type"), Some(&WireValue::keyword("unknown-op")));
    }

    #[tokio::test]
    async fn missing_graph_maps_to_graph_not_found() {
        let state = AppState::new(ServerConfig::default());
        let dispatcher = build_dispatcher();
        let payload = WireValue::Map(vec![(WireValue::keyword("graph"), WireValue::str("nope"))]);
        let resp = dispatch(&dispatcher, &state, &envelope("db-exists", payload.clone())).await;
        assert_eq!(resp.get("payload").and_then(|p| p.get("exists")), Some(&WireValue::Bool(false)));

        let resp = dispatch(&dispatcher, &state, &envelope("pull", payload)).await;
        assert_eq!(resp.get("error-type"), Some(&WireValue::keyword("graph-not-found")));
    }

    #[tokio::test]
    async fn create_then_transact_then_pull_round_trips() {
        let state = AppState::new(ServerConfig::default());
        let dispatcher = build_dispatcher();
        let graph_name = WireValue::str("demo");
        dispatch(
            &dispatcher,
            &state,
            &envelope("create-or-open-db", WireValue::Map(vec![(WireValue::keyword("graph"), graph_name.clone())])),
        )
        .await;

        let tx_data = WireValue::Vector(vec![WireValue::Map(vec![(
            WireValue::keyword("page/name"),
            WireValue::str("journal"),
        )])]);
        let resp = dispatch(
            &dispatcher,
            &state,
            &envelope(
                "transact",
                WireValue::Map(vec![
                    (WireValue::keyword("graph"), graph_name.clone()),
                    (WireValue::keyword("tx-data"), tx_data),
                ]),
            ),
        )
        .await;
        assert_eq!(resp.get("ok?"), Some(&WireValue::Bool(true)));
    }

    #[test]
    fn handshake_below_minimum_version_is_rejected() {
        let request = WireValue::Map(vec![
            (WireValue::keyword("id"), WireValue::Int(1)),
            (WireValue::keyword("type"), WireValue::str("handshake")),
            (WireValue::keyword("version"), WireValue::Vector(vec![WireValue::Int(0), WireValue::Int(0), WireValue::Int(1)])),
        ]);
        let resp = handle_handshake(&request, WireValue::Int(1), WireValue::Int(0));
        assert_eq!(resp.get("type"), Some(&WireValue::str("handshake-response")));
        assert_eq!(resp.get("error-type"), Some(&WireValue::keyword("version-mismatch")));
        assert!(resp.get("version").is_some());
    }
}
