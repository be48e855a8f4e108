use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

use crate::durability::StateDelta;
use crate::storage::index::{IndexHook, IndexKey};
use crate::types::{Result, TxId};

use super::GraphAccessor;

impl GraphAccessor {
    /// Registers an index on `key` and fills it with every vertex that
    /// currently matches.
    ///
    /// Writers that start after registration feed `hook` themselves. Before
    /// scanning, the build waits for every transaction that was active at
    /// registration, except other index builders, so that the scan's
    /// snapshot contains all their writes. The scan runs in a fresh
    /// transaction that is committed once done.
    ///
    /// Fails with [`crate::MvccError::IndexExists`] if the key is already
    /// registered.
    pub fn build_index(&self, key: IndexKey, hook: Arc<dyn IndexHook>) -> Result<()> {
        self.check_active()?;
        let graph = Arc::clone(&self.graph);
        let _builder = graph.index_builders.mark(self.tx.id());
        graph.indexes.register(key, hook)?;
        info!(tx = self.tx.id().0, label = key.label.0, prop = key.prop.0, "mvcc.index.build_start");

        match self.populate_index(key) {
            Ok(scanned) => {
                info!(label = key.label.0, prop = key.prop.0, scanned, "mvcc.index.build_complete");
                Ok(())
            }
            Err(err) => {
                graph.indexes.unregister(key);
                debug!(label = key.label.0, prop = key.prop.0, error = %err, "mvcc.index.build_failed");
                Err(err)
            }
        }
    }

    fn populate_index(&self, key: IndexKey) -> Result<usize> {
        let graph = &self.graph;
        let engine = graph.engine();
        for id in engine.global_active_transactions().iter() {
            if id == self.tx.id() || graph.index_builders.contains(id) {
                continue;
            }
            self.wait_for(id);
        }

        let scan = graph.access();
        let _scan_builder = graph.index_builders.mark(scan.tx.id());
        let Some(hook) = graph.indexes.hook(key) else {
            return Ok(0);
        };
        let mut scanned = 0;
        for vertex in scan.vertices(false)? {
            let Some(record) = vertex.record() else {
                continue;
            };
            if key.matches(&record) {
                hook.insert(key, vertex.chain(), &record, scan.transaction());
                scanned += 1;
            }
        }
        graph.emit(StateDelta::BuildIndex {
            tx: scan.tx.id(),
            label: key.label,
            prop: key.prop,
        });
        scan.commit()?;
        Ok(scanned)
    }

    /// Sleeps until `id` finishes or becomes an index builder itself.
    fn wait_for(&self, id: TxId) {
        let graph = &self.graph;
        let mut attempt = 0;
        while graph.engine().global_is_active(id) {
            if graph.index_builders.contains(id) {
                return;
            }
            thread::sleep(graph.index_build_cfg.backoff(attempt));
            attempt = attempt.saturating_add(1);
        }
    }
}
