use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::compactor;

/// Lazily loaded engines keyed by the connection's database name. Each tenant
/// owns a WAL file under `data_dir` and a compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Return the tenant's engine, replaying its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // the name becomes a file name under data_dir
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
        tracing::info!(tenant = %safe_name, "loaded tenant");

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("gridlane_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn tenants_do_not_share_calendars() {
        let tm = TenantManager::new(test_data_dir("isolation"), 1000);
        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        let cid = Ulid::new();
        eng_a.create_calendar(cid, Some("ops".into())).await.unwrap();
        eng_b.create_calendar(cid, None).await.unwrap();
        eng_a
            .schedule_appointment(Ulid::new(), cid, Some(0), Some(3_600_000), None)
            .await
            .unwrap();

        assert_eq!(eng_a.get_appointments(cid).await.len(), 1);
        assert!(eng_b.get_appointments(cid).await.is_empty());
    }

    #[tokio::test]
    async fn wal_appears_on_first_use() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        let _eng = tm.get_or_create("planning").unwrap();
        assert!(dir.join("planning.wal").exists());
    }

    #[tokio::test]
    async fn same_tenant_same_engine() {
        let tm = TenantManager::new(test_data_dir("same_eng"), 1000);
        let first = tm.get_or_create("foo").unwrap();
        let second = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn path_characters_are_stripped() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn overlong_name_rejected() {
        let tm = TenantManager::new(test_data_dir("name_too_long"), 1000);
        let err = tm
            .get_or_create(&"x".repeat(MAX_TENANT_NAME_LEN + 1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_capped() {
        let tm = TenantManager::new(test_data_dir("count_limit"), 1000);
        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
