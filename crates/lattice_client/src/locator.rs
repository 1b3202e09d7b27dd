//! Client-side tablet cache in front of the cluster directory.
//!
//! Directory answers are advisory, so there is no point asking it on every
//! boundary crossing: located tablets are cached per table until a fetch
//! proves them stale, at which point `invalidate` drops the entry and the
//! next lookup goes back to the directory.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use lattice_rpc::{TableName, TabletDesc, TabletError, TabletLocator};

type TableCache = BTreeMap<Bytes, TabletDesc>;

pub struct CachingLocator {
    inner: Arc<dyn TabletLocator>,
    cache: RwLock<HashMap<TableName, TableCache>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachingLocator {
    pub fn new(inner: Arc<dyn TabletLocator>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// (cache hits, cache misses) since construction.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn cached(&self, table: &TableName, key: &[u8], reverse: bool) -> Option<TabletDesc> {
        let cache = self.cache.read().unwrap();
        let tablets = cache.get(table)?;
        if reverse {
            if key.is_empty() {
                // The table's last tablet, if we have seen it.
                return tablets.values().find(|t| t.is_last()).cloned();
            }
            // The tablet owning the greatest row strictly below `key`: its
            // range must start below the key and end at or past it.
            let candidate = tablets.range(..Bytes::copy_from_slice(key)).next_back();
            return candidate
                .filter(|(_, t)| t.is_last() || t.end_key.as_ref() >= key)
                .map(|(_, t)| t.clone());
        }
        let candidate = tablets.range(..=Bytes::copy_from_slice(key)).next_back();
        candidate
            .filter(|(_, t)| t.contains(key))
            .map(|(_, t)| t.clone())
    }

    fn insert(&self, tablet: &TabletDesc) {
        let mut cache = self.cache.write().unwrap();
        cache
            .entry(tablet.table.clone())
            .or_default()
            .insert(tablet.start_key.clone(), tablet.clone());
    }
}

#[async_trait]
impl TabletLocator for CachingLocator {
    async fn locate(
        &self,
        table: &TableName,
        key: &[u8],
        reverse: bool,
    ) -> Result<TabletDesc, TabletError> {
        if let Some(tablet) = self.cached(table, key, reverse) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(tablet);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let tablet = self.inner.locate(table, key, reverse).await?;
        self.insert(&tablet);
        Ok(tablet)
    }

    async fn invalidate(&self, tablet: &TabletDesc) {
        debug!(
            table = %tablet.table,
            tablet_id = tablet.tablet_id,
            epoch = tablet.epoch,
            "dropping cached tablet"
        );
        {
            let mut cache = self.cache.write().unwrap();
            if let Some(tablets) = cache.get_mut(&tablet.table) {
                tablets.remove(&tablet.start_key);
            }
        }
        self.inner.invalidate(tablet).await;
    }
}
