use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::compactor;
use crate::engine::{Clock, Engine};
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-tenant engines. Each tenant gets its own Engine, WAL and
/// compactor. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    clock: Arc<dyn Clock>,
}

/// A tenant name must be `[A-Za-z0-9_-]+`, so it is always a plain file
/// name. Other names are rejected, never rewritten.
fn validate_name(tenant: &str) -> io::Result<&str> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
    }
    if tenant.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
    }
    if let Some(bad) = tenant
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid character {bad:?} in tenant name"),
        ));
    }
    Ok(tenant)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            clock,
        }
    }

    /// Get or lazily create the engine for a tenant, replaying its WAL.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        let name = validate_name(tenant)?.to_string();
        if let Some(engine) = self.engines.get(&name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // The entry lock makes concurrent first connections share one engine
        let engine = match self.engines.entry(name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{name}.wal"));
                let engine = Arc::new(Engine::new(
                    &name,
                    wal_path,
                    Arc::new(NotifyHub::new()),
                    self.clock.clone(),
                )?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("tenant {name} loaded");
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}
