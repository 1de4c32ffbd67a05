//! Client-side op router (SPEC_FULL.md §4.10): the piece the external
//! writer links against to decide, per op and per graph, whether to call
//! this core or fall back to its own local backend. No transport code and
//! no dependency on `graph-server` — this only knows the op vocabulary
//! (`graph-wire`) and two booleans per graph.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Where a router decided an op should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Sidecar,
    Writer,
}

/// How an op is classified (SPEC_FULL.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// Must go to the writer's own backend: file parsing, vector search,
    /// realtime collaboration, anything depending on the writer's runtime.
    WorkerOnly,
    /// Goes to the sidecar once it's ready and the graph's initial sync is
    /// complete; falls back to the writer's backend until then.
    SidecarPreferred,
    /// Always goes to the writer's backend.
    Unclassified,
}

/// As [`classify`], but reading the op straight off a decoded wire value
/// (a keyword, symbol, or string), the form it arrives in from the
/// writer's own parser.
pub fn classify_wire(op: &graph_wire::Value) -> OpClass {
    let text = match op {
        graph_wire::Value::Keyword(k) => k.0.as_str(),
        graph_wire::Value::Symbol(s) => s.0.as_str(),
        graph_wire::Value::Str(s) => s.as_str(),
        _ => return OpClass::Unclassified,
    };
    classify(text)
}

/// Classifies an op name (with or without its `thread-api/` namespace)
/// into one of the three routing buckets from SPEC_FULL.md §4.10.
pub fn classify(op: &str) -> OpClass {
    let bare = op.rsplit('/').next().unwrap_or(op);
    match bare {
        "q" | "pull" | "pull-many" | "datoms" | "transact" | "apply-outliner-ops" | "sync-datoms"
        | "create-or-open-db" | "db-exists" | "list-db" | "get-initial-data" | "get-view-data"
        | "delete-page" | "get-page-trees" | "get-file-writes" | "sync-app-state" | "set-context"
        | "update-thread-atom" | "init" | "write-log" | "extract-and-transact" => OpClass::SidecarPreferred,
        _ if bare.starts_with("rtc-") || bare.starts_with("vec-") || bare.starts_with("mobile-") => {
            OpClass::WorkerOnly
        }
        _ => OpClass::Unclassified,
    }
}

/// Tracks `sidecar-ready?` and per-graph `sync-complete?` and routes ops
/// accordingly. Cheap to clone-share: internally locked, no async runtime
/// dependency (the writer may be sync or async).
pub struct Router {
    sidecar_ready: Mutex<bool>,
    sync_complete: Mutex<HashMap<String, bool>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            sidecar_ready: Mutex::new(false),
            sync_complete: Mutex::new(HashMap::new()),
        }
    }

    /// Set once the transport connects and the handshake succeeds.
    pub fn set_sidecar_ready(&self, ready: bool) {
        *self.sidecar_ready.lock() = ready;
        if !ready {
            self.sync_complete.lock().clear();
        }
    }

    pub fn sidecar_ready(&self) -> bool {
        *self.sidecar_ready.lock()
    }

    /// Marks a graph's initial sync as complete (or, passing `false`,
    /// un-marks it — e.g. on a resync).
    pub fn set_sync_complete(&self, graph: &str, complete: bool) {
        self.sync_complete.lock().insert(graph.to_string(), complete);
    }

    pub fn sync_complete(&self, graph: &str) -> bool {
        self.sync_complete.lock().get(graph).copied().unwrap_or(false)
    }

    /// Decides where `op` (against `graph`) should go. Never sends a
    /// sidecar-preferred op to the sidecar before that graph's sync is
    /// marked complete — sending early would have the core answer queries
    /// against an empty or partial snapshot (SPEC_FULL.md §4.10).
    pub fn route(&self, op: &str, graph: &str) -> Destination {
        match classify(op) {
            OpClass::WorkerOnly | OpClass::Unclassified => Destination::Writer,
            OpClass::SidecarPreferred => {
                if self.sidecar_ready() && self.sync_complete(graph) {
                    Destination::Sidecar
                } else {
                    Destination::Writer
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_only_ops_never_reach_the_sidecar() {
        let router = Router::new();
        router.set_sidecar_ready(true);
        router.set_sync_complete("journal", true);
        assert_eq!(router.route("thread-api/rtc-send", "journal"), Destination::Writer);
        assert_eq!(router.route("vec-search", "journal"), Destination::Writer);
    }

    #[test]
    fn sidecar_preferred_ops_wait_for_ready_and_sync() {
        let router = Router::new();
        assert_eq!(router.route("thread-api/q", "journal"), Destination::Writer);
        router.set_sidecar_ready(true);
        assert_eq!(router.route("thread-api/q", "journal"), Destination::Writer);
        router.set_sync_complete("journal", true);
        assert_eq!(router.route("thread-api/q", "journal"), Destination::Sidecar);
    }

    #[test]
    fn sync_completeness_is_tracked_per_graph() {
        let router = Router::new();
        router.set_sidecar_ready(true);
        router.set_sync_complete("journal", true);
        assert_eq!(router.route("thread-api/pull", "journal"), Destination::Sidecar);
        assert_eq!(router.route("thread-api/pull", "scratch"), Destination::Writer);
    }

    #[test]
    fn going_not_ready_clears_sync_state() {
        let router = Router::new();
        router.set_sidecar_ready(true);
        router.set_sync_complete("journal", true);
        router.set_sidecar_ready(false);
        router.set_sidecar_ready(true);
        assert_eq!(router.route("thread-api/q", "journal"), Destination::Writer);
    }

    #[test]
    fn unclassified_ops_fall_back_to_the_writer() {
        assert_eq!(classify("something-unheard-of"), OpClass::Unclassified);
    }

    #[test]
    fn classify_wire_strips_the_namespace_from_a_keyword() {
        let op = graph_wire::Value::keyword("thread-api/q");
        assert_eq!(classify_wire(&op), OpClass::SidecarPreferred);
    }
}
