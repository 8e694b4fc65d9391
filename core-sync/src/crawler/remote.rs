//! Full walk of the remote tree.

use super::register_name;
use crate::buffer::{InsertOutcome, RemoteBuffer};
use crate::context::{join_relative, SyncContext};
use crate::dependencies::ItemsDependencies;
use crate::error::Result;
use crate::items::RemoteStorageItem;
use crate::triplet::{parent_name, triplet_name};
use bridge_traits::OperationContext;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCrawlStats {
    pub items: usize,
    pub unsupported: usize,
    pub collisions: usize,
    pub skipped_subtrees: usize,
}

/// Walks the remote root depth-first into the shared [`RemoteBuffer`].
///
/// A folder whose children cannot be listed is skipped; only a failure to
/// list the root aborts the crawl.
pub struct RemoteCrawler {
    ctx: Arc<SyncContext>,
    deps: Arc<ItemsDependencies>,
    buffer: Arc<RemoteBuffer>,
}

impl RemoteCrawler {
    pub fn new(
        ctx: Arc<SyncContext>,
        deps: Arc<ItemsDependencies>,
        buffer: Arc<RemoteBuffer>,
    ) -> Self {
        Self { ctx, deps, buffer }
    }

    #[instrument(skip_all, fields(root = %self.ctx.remote_root))]
    pub async fn run(self) -> Result<RemoteCrawlStats> {
        let context = OperationContext {
            max_items_per_page: self.ctx.settings.children_page_size,
            include_path_segments: true,
        };
        let mut stats = RemoteCrawlStats::default();
        let mut stack: Vec<(String, String)> = vec![(self.ctx.remote_root_id.clone(), String::new())];

        while let Some((folder_id, prefix)) = stack.pop() {
            let children = match self.ctx.repository.get_children(&folder_id, &context).await {
                Ok(children) => children,
                Err(e) if prefix.is_empty() => {
                    warn!(error = %e, "Cannot list remote root");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(folder = %prefix, error = %e, "Cannot list remote folder; skipping subtree");
                    stats.skipped_subtrees += 1;
                    continue;
                }
            };

            let mut subfolders = Vec::new();
            for child in children {
                if !child.is_supported() {
                    debug!(name = child.name(), "Skipping unsupported remote object");
                    stats.unsupported += 1;
                    continue;
                }
                let name = child.name().to_string();
                if !self.ctx.filter.is_worth_syncing_name(&name) {
                    debug!(folder = %prefix, name = %name, "Not worth syncing");
                    continue;
                }

                let relative = join_relative(&prefix, &name);
                let is_folder = child.is_folder();
                let id = child.id().to_string();
                let key = triplet_name(&relative, is_folder);
                let item = RemoteStorageItem::present(self.ctx.remote_root.clone(), relative.clone(), child);

                match self.buffer.insert(&key, item).await {
                    InsertOutcome::Inserted => {
                        register_name(&self.deps, &key, parent_name(&relative).as_deref());
                        stats.items += 1;
                    }
                    InsertOutcome::Collision => {
                        warn!(
                            path = %relative,
                            "Remote name collides with another entry when case is ignored; skipping"
                        );
                        stats.collisions += 1;
                        continue;
                    }
                    InsertOutcome::AlreadyProcessed => {}
                }
                if is_folder {
                    subfolders.push((id, relative));
                }
            }
            stack.extend(subfolders.into_iter().rev());
        }

        info!(
            items = stats.items,
            collisions = stats.collisions,
            skipped_subtrees = stats.skipped_subtrees,
            "Remote crawl finished"
        );
        Ok(stats)
    }
}
