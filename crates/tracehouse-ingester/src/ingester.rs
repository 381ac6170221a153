//! Ingester: Tenant Instance Lifecycle
//!
//! The ingester owns one [`Instance`] per tenant, creating them on first
//! push and recovering them from the WAL on startup. It also runs the flush
//! loop that drives blocks through cut → complete → flush → clear.
//!
//! ## Startup
//!
//! Files still sitting in `<local>/wal/` belonged to head blocks at crash
//! time; they are sealed by moving them into `<local>/completing/`. Every
//! file there is then replayed into a completing block for its tenant.
//! Search entries are *not* recovered (the search index is rebuilt only on
//! completion), so a post-restart search finds nothing until blocks
//! complete, while `find_trace_by_id` serves replayed data immediately.
//! A WAL that cannot be read at all fails startup.
//!
//! ## Shutdown
//!
//! `stop` cuts every live trace and seals every head block so the WAL tail
//! is durable, then returns without waiting for complete or flush; the next
//! start replays whatever was left.

use crate::block::CompletingBlock;
use crate::config::IngesterConfig;
use crate::error::Result;
use crate::instance::{Instance, LocalDirs};
use crate::limiter::Limiter;
use crate::wal::{parse_wal_file_name, WalFile};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracehouse_backend::Store;
use tracing::{info, warn};

pub struct Ingester {
    cfg: IngesterConfig,
    limiter: Arc<Limiter>,
    store: Arc<dyn Store>,
    dirs: LocalDirs,
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    shutdown: watch::Sender<bool>,
}

impl Ingester {
    /// Create an ingester rooted at `local`, replaying any WAL files left by
    /// a previous process.
    pub async fn new(
        cfg: IngesterConfig,
        limiter: Arc<Limiter>,
        store: Arc<dyn Store>,
        local: &Path,
    ) -> Result<Self> {
        let dirs = LocalDirs::new(local);
        dirs.ensure().await?;

        let mut instances = HashMap::new();
        for (tenant, blocks) in replay(&dirs).await? {
            let instance =
                Instance::with_completing(&tenant, limiter.clone(), dirs.clone(), blocks).await?;
            instances.insert(tenant, Arc::new(instance));
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            cfg,
            limiter,
            store,
            dirs,
            instances: RwLock::new(instances),
            shutdown,
        })
    }

    pub async fn get_instance(&self, tenant_id: &str) -> Option<Arc<Instance>> {
        self.instances.read().await.get(tenant_id).cloned()
    }

    pub async fn get_or_create_instance(&self, tenant_id: &str) -> Result<Arc<Instance>> {
        // Fast path: read lock.
        {
            let instances = self.instances.read().await;
            if let Some(instance) = instances.get(tenant_id) {
                return Ok(instance.clone());
            }
        }

        // Slow path: write lock with a second check, since another task may
        // have created it in between.
        let mut instances = self.instances.write().await;
        if let Some(instance) = instances.get(tenant_id) {
            return Ok(instance.clone());
        }

        let instance = Arc::new(
            Instance::new(tenant_id, self.limiter.clone(), self.dirs.clone()).await?,
        );
        instances.insert(tenant_id.to_string(), instance.clone());
        Ok(instance)
    }

    /// Push one trace fragment for a tenant, creating its instance on first
    /// contact.
    pub async fn push_bytes(
        &self,
        tenant_id: &str,
        trace_id: &[u8],
        payload: Bytes,
        search: Option<Bytes>,
    ) -> Result<()> {
        let instance = self.get_or_create_instance(tenant_id).await?;
        instance.push_bytes(trace_id, payload, search).await
    }

    /// Drive the cut/complete/flush/clear machinery until `stop` is called.
    pub async fn run_flush_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.cfg.flush_check_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.changed() => {
                    info!("flush loop stopping");
                    return;
                }
            }
        }
    }

    async fn sweep(&self) {
        let instances: Vec<Arc<Instance>> =
            self.instances.read().await.values().cloned().collect();
        for instance in instances {
            if let Err(err) = self.sweep_instance(&instance).await {
                // Left where it was; the next tick retries.
                warn!(
                    tenant = instance.tenant_id(),
                    error = %err,
                    "flush sweep failed"
                );
            }
        }
    }

    async fn sweep_instance(&self, instance: &Instance) -> Result<()> {
        instance
            .cut_complete_traces(self.cfg.max_idle_time, false)
            .await?;
        instance
            .cut_block_if_ready(self.cfg.max_block_duration, self.cfg.max_block_bytes, false)
            .await?;

        for block_id in instance.completing_block_ids().await {
            instance.complete_block(block_id).await?;
            instance.clear_completing_block(block_id).await?;
        }

        for block_id in instance.unflushed_block_ids().await {
            if let Some(block) = instance.get_block_to_be_flushed(block_id).await {
                self.store.write_block(&block).await?;
                instance.mark_block_flushed(block_id).await;
            }
        }

        instance
            .clear_flushed_blocks(self.cfg.complete_block_timeout)
            .await?;
        Ok(())
    }

    /// Graceful stop: seal the WAL tail (cut all live traces, cut all head
    /// blocks) without waiting for complete or flush.
    pub async fn stop(&self) -> Result<()> {
        let _ = self.shutdown.send(true);

        let instances: Vec<Arc<Instance>> =
            self.instances.read().await.values().cloned().collect();
        for instance in instances {
            instance
                .cut_complete_traces(std::time::Duration::ZERO, true)
                .await?;
            instance
                .cut_block_if_ready(std::time::Duration::ZERO, 0, true)
                .await?;
        }

        info!("ingester stopped; wal tail sealed");
        Ok(())
    }
}

/// Recover completing blocks from disk, keyed by tenant. Unsealed WAL files
/// are sealed first; unrecognized files are skipped with a warning.
async fn replay(dirs: &LocalDirs) -> Result<HashMap<String, Vec<CompletingBlock>>> {
    // Head-block WALs from the previous process are sealed by the restart.
    let mut rd = tokio::fs::read_dir(&dirs.wal).await?;
    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if parse_wal_file_name(&name).is_none() {
            warn!(file = %name, "skipping unrecognized file in wal dir");
            continue;
        }
        tokio::fs::rename(entry.path(), dirs.completing.join(&name)).await?;
    }

    let mut recovered: HashMap<String, Vec<CompletingBlock>> = HashMap::new();
    let mut rd = tokio::fs::read_dir(&dirs.completing).await?;
    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((block_id, tenant)) = parse_wal_file_name(&name) else {
            warn!(file = %name, "skipping unrecognized file in completing dir");
            continue;
        };

        let mut records = WalFile::replay(&entry.path()).await?;
        // The search index is rebuilt only on completion; replayed entries
        // carry trace data only.
        for record in &mut records {
            record.search = None;
        }

        info!(
            tenant = %tenant,
            block = %block_id,
            records = records.len(),
            "recovered completing block"
        );
        recovered
            .entry(tenant)
            .or_default()
            .push(CompletingBlock::recovered(block_id, records, entry.path()));
    }

    Ok(recovered)
}
