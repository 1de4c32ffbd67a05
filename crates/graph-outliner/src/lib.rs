//! The outliner applier, sync engine, and page export (SPEC_FULL.md §4.5,
//! §4.6, §4.8), layered on top of `graph-engine`'s datom store.

pub mod export;
pub mod ops;
pub mod order;
pub mod sync;

pub use export::{get_file_writes, get_page_trees, BlockNode, FileRenderer, PageTree};
pub use ops::{apply_ops, parse_ops, ApplyOpsResult, Op};
pub use sync::{sync_datoms, sync_tx_report, SyncResult};
