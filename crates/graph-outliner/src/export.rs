//! Page export (SPEC_FULL.md §4.8): walking a page's block tree in sibling
//! order, and handing the result to an external renderer to turn into
//! file content.

use graph_engine::ids::EntityId;
use graph_engine::GraphState;
use graph_wire::Value as WireValue;

/// One page's stable attributes plus its block tree, in the shape
/// `get-page-trees` returns on the wire.
pub struct PageTree {
    pub page_id: EntityId,
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub page_type: Option<String>,
    pub format: Option<String>,
    pub journal_day: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub children: Vec<BlockNode>,
}

pub struct BlockNode {
    pub block_id: EntityId,
    pub uuid: Option<String>,
    pub content: Option<String>,
    pub title: Option<String>,
    pub order: String,
    pub collapsed: Option<bool>,
    pub marker: Option<String>,
    pub priority: Option<String>,
    pub scheduled: Option<i64>,
    pub deadline: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub children: Vec<BlockNode>,
}

/// Collects each page's stable attrs and walks its tree of blocks,
/// ordered by `block/order`. Nonexistent page ids are skipped.
pub fn get_page_trees(g: &GraphState, page_ids: &[EntityId]) -> Vec<PageTree> {
    page_ids.iter().filter_map(|&id| build_page_tree(g, id)).collect()
}

fn build_page_tree(g: &GraphState, page_id: EntityId) -> Option<PageTree> {
    if g.indices.entity_attrs(page_id).is_empty() {
        return None;
    }
    Some(PageTree {
        page_id,
        uuid: str_attr(g, page_id, "page/uuid"),
        name: str_attr(g, page_id, "page/name"),
        title: str_attr(g, page_id, "page/title"),
        page_type: str_attr(g, page_id, "page/type"),
        format: str_attr(g, page_id, "page/format"),
        journal_day: int_attr(g, page_id, "page/journal-day"),
        created_at: int_attr(g, page_id, "page/created-at"),
        updated_at: int_attr(g, page_id, "page/updated-at"),
        children: build_children(g, page_id),
    })
}

fn build_children(g: &GraphState, parent: EntityId) -> Vec<BlockNode> {
    let mut kids: Vec<(EntityId, String)> = g
        .indices
        .referrers(parent, "block/parent")
        .into_iter()
        .map(|(e, _)| (e, str_attr(g, e, "block/order").unwrap_or_default()))
        .collect();
    kids.sort_by(|a, b| a.1.cmp(&b.1));

    kids.into_iter()
        .map(|(id, order)| BlockNode {
            block_id: id,
            uuid: str_attr(g, id, "block/uuid"),
            content: str_attr(g, id, "block/content"),
            title: str_attr(g, id, "block/title"),
            order,
            collapsed: bool_attr(g, id, "block/collapsed"),
            marker: str_attr(g, id, "block/marker"),
            priority: str_attr(g, id, "block/priority"),
            scheduled: int_attr(g, id, "block/scheduled"),
            deadline: int_attr(g, id, "block/deadline"),
            created_at: int_attr(g, id, "block/created-at"),
            updated_at: int_attr(g, id, "block/updated-at"),
            children: build_children(g, id),
        })
        .collect()
}

fn str_attr(g: &GraphState, e: EntityId, attr: &str) -> Option<String> {
    g.indices.values_of(e, attr).into_iter().next().and_then(|v| v.as_str().map(|s| s.to_string()))
}

fn int_attr(g: &GraphState, e: EntityId, attr: &str) -> Option<i64> {
    g.indices.values_of(e, attr).into_iter().next().and_then(|v| v.as_i64())
}

fn bool_attr(g: &GraphState, e: EntityId, attr: &str) -> Option<bool> {
    g.indices.values_of(e, attr).into_iter().next().and_then(|v| v.as_bool())
}

impl PageTree {
    pub fn to_wire(&self) -> WireValue {
        let mut entries = vec![(WireValue::keyword("db/id"), WireValue::Int(self.page_id.get() as i64))];
        push_opt_str(&mut entries, "page/uuid", &self.uuid);
        push_opt_str(&mut entries, "page/name", &self.name);
        push_opt_str(&mut entries, "page/title", &self.title);
        push_opt_str(&mut entries, "page/type", &self.page_type);
        push_opt_str(&mut entries, "page/format", &self.format);
        push_opt_int(&mut entries, "page/journal-day", self.journal_day);
        push_opt_int(&mut entries, "page/created-at", self.created_at);
        push_opt_int(&mut entries, "page/updated-at", self.updated_at);
        entries.push((
            WireValue::keyword("children"),
            WireValue::Vector(self.children.iter().map(BlockNode::to_wire).collect()),
        ));
        WireValue::Map(entries)
    }
}

impl BlockNode {
    pub fn to_wire(&self) -> WireValue {
        let mut entries = vec![
            (WireValue::keyword("db/id"), WireValue::Int(self.block_id.get() as i64)),
            (WireValue::keyword("order"), WireValue::Str(self.order.clone())),
        ];
        push_opt_str(&mut entries, "uuid", &self.uuid);
        push_opt_str(&mut entries, "content", &self.content);
        push_opt_str(&mut entries, "title", &self.title);
        push_opt_str(&mut entries, "marker", &self.marker);
        push_opt_str(&mut entries, "priority", &self.priority);
        push_opt_int(&mut entries, "scheduled", self.scheduled);
        push_opt_int(&mut entries, "deadline", self.deadline);
        push_opt_int(&mut entries, "created-at", self.created_at);
        push_opt_int(&mut entries, "updated-at", self.updated_at);
        if let Some(collapsed) = self.collapsed {
            entries.push((WireValue::keyword("collapsed"), WireValue::Bool(collapsed)));
        }
        entries.push((
            WireValue::keyword("children"),
            WireValue::Vector(self.children.iter().map(BlockNode::to_wire).collect()),
        ));
        WireValue::Map(entries)
    }
}

fn push_opt_str(entries: &mut Vec<(WireValue, WireValue)>, key: &str, v: &Option<String>) {
    if let Some(v) = v {
        entries.push((WireValue::keyword(key), WireValue::Str(v.clone())));
    }
}

fn push_opt_int(entries: &mut Vec<(WireValue, WireValue)>, key: &str, v: Option<i64>) {
    if let Some(v) = v {
        entries.push((WireValue::keyword(key), WireValue::Int(v)));
    }
}

/// Renders exported page trees to file content. Kept as a plain function
/// pointer rather than a concrete format, since the format (markdown,
/// org, ...) is an outer-surface concern this port doesn't own.
pub type FileRenderer = fn(&PageTree, &str) -> String;

/// `get-file-writes(page-ids, opts)`: re-runs `get_page_trees`, renders
/// each with `render`, and composes an output path from `graph_dir` plus
/// the page's canonical (lower-cased) name.
pub fn get_file_writes(
    g: &GraphState,
    page_ids: &[EntityId],
    graph_dir: &str,
    format: &str,
    render: FileRenderer,
) -> Vec<(String, String)> {
    get_page_trees(g, page_ids)
        .iter()
        .map(|tree| {
            let name = tree.name.clone().unwrap_or_else(|| tree.page_id.get().to_string());
            let path = format!("{graph_dir}/{name}.{format}");
            (path, render(tree, format))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_engine::tx::{AttrValue, EntityRef, TxItem};
    use graph_engine::{GraphOptions, Schema};

    fn graph_with_page() -> (GraphState, EntityId) {
        let mut g = GraphState::open(GraphOptions {
            schema: Schema::outliner_default(),
            ..Default::default()
        })
        .unwrap();
        let report = g
            .transact(vec![TxItem::Map(vec![
                ("page/name".into(), AttrValue::Value(graph_engine::datom::Value::Str("journal".into()))),
                ("page/title".into(), AttrValue::Value(graph_engine::datom::Value::Str("Journal".into()))),
            ])])
            .unwrap();
        let page = report.tx_data[0].e;
        g.transact(vec![TxItem::Map(vec![
            ("block/uuid".into(), AttrValue::Value(graph_engine::datom::Value::Str("b1".into()))),
            ("block/page".into(), AttrValue::Ref(EntityRef::Id(page))),
            ("block/content".into(), AttrValue::Value(graph_engine::datom::Value::Str("hello".into()))),
            ("block/order".into(), AttrValue::Value(graph_engine::datom::Value::Str("a".into()))),
        ])])
        .unwrap();
        (g, page)
    }

    #[test]
    fn exports_one_child_block_in_order() {
        let (g, page) = graph_with_page();
        let trees = get_page_trees(&g, &[page]);
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].name.as_deref(), Some("journal"));
        assert_eq!(trees[0].children.len(), 1);
        assert_eq!(trees[0].children[0].content.as_deref(), Some("hello"));
    }

    #[test]
    fn skips_nonexistent_page_ids() {
        let (g, _page) = graph_with_page();
        let bogus = EntityId::new(9999).unwrap();
        assert!(get_page_trees(&g, &[bogus]).is_empty());
    }

    #[test]
    fn file_writes_compose_path_from_graph_dir_and_page_name() {
        let (g, page) = graph_with_page();
        fn render(tree: &PageTree, _format: &str) -> String {
            tree.children.iter().filter_map(|c| c.content.clone()).collect::<Vec<_>>().join("\n")
        }
        let writes = get_file_writes(&g, &[page], "/graphs/demo", "md", render);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "/graphs/demo/journal.md");
        assert_eq!(writes[0].1, "hello");
    }
}
