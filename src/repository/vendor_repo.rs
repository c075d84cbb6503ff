// ==========================================
// 上门服务预约智能引擎 - 师傅注册中心
// ==========================================
// 职责: 读取候选师傅快照
// 红线: Repository 不含业务规则，排除与评分由 VendorAllocator 负责
// ==========================================

use crate::domain::vendor::VendorProfile;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// VendorRegistry Trait
// ==========================================
// 实现者: SqliteVendorRegistry / InMemoryVendorRegistry
#[async_trait]
pub trait VendorRegistry: Send + Sync {
    /// 列出可能承接该品类的师傅快照
    ///
    /// # 参数
    /// - `service_category`: 服务品类
    /// - `location`: 请求区域
    /// - `radius_km`: 服务半径（实现可用于预筛，最终以分派引擎判断为准）
    ///
    /// # 返回
    /// 师傅快照（可能包含不接单的师傅）
    async fn list_candidate_vendors(
        &self,
        service_category: &str,
        location: &str,
        radius_km: f64,
    ) -> RepositoryResult<Vec<VendorProfile>>;
}

// ==========================================
// SqliteVendorRegistry
// ==========================================
pub struct SqliteVendorRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVendorRegistry {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增或更新师傅档案（同时覆盖其品类）
    pub fn upsert_vendor(&self, vendor: &VendorProfile) -> RepositoryResult<()> {
        if vendor.vendor_id.trim().is_empty() {
            return Err(RepositoryError::ValidationError("vendor_id 不能为空".to_string()));
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT INTO vendor (vendor_id, location, average_rating, active_job_count, is_available)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(vendor_id) DO UPDATE SET
                   location = excluded.location,
                   average_rating = excluded.average_rating,
                   active_job_count = excluded.active_job_count,
                   is_available = excluded.is_available"#,
            params![
                &vendor.vendor_id,
                &vendor.location,
                vendor.average_rating,
                vendor.active_job_count,
                vendor.is_available,
            ],
        )?;

        tx.execute(
            "DELETE FROM vendor_category WHERE vendor_id = ?1",
            params![&vendor.vendor_id],
        )?;
        for category in &vendor.service_categories {
            tx.execute(
                "INSERT INTO vendor_category (vendor_id, category) VALUES (?1, ?2)",
                params![&vendor.vendor_id, category],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn load_categories(conn: &Connection, vendor_id: &str) -> RepositoryResult<BTreeSet<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT category FROM vendor_category WHERE vendor_id = ?1 ORDER BY category",
        )?;
        let rows = stmt.query_map(params![vendor_id], |row| row.get::<_, String>(0))?;
        let mut categories = BTreeSet::new();
        for row in rows {
            categories.insert(row?);
        }
        Ok(categories)
    }
}

#[async_trait]
impl VendorRegistry for SqliteVendorRegistry {
    async fn list_candidate_vendors(
        &self,
        service_category: &str,
        _location: &str,
        _radius_km: f64,
    ) -> RepositoryResult<Vec<VendorProfile>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT v.vendor_id, v.location, v.average_rating, v.active_job_count, v.is_available
               FROM vendor v
               JOIN vendor_category c ON c.vendor_id = v.vendor_id
               WHERE c.category = ?1
               ORDER BY v.vendor_id"#,
        )?;
        let rows = stmt.query_map(params![service_category], |row| {
            Ok(VendorProfile {
                vendor_id: row.get(0)?,
                location: row.get(1)?,
                service_categories: BTreeSet::new(),
                average_rating: row.get(2)?,
                active_job_count: row.get(3)?,
                is_available: row.get(4)?,
            })
        })?;

        let mut vendors = Vec::new();
        for row in rows {
            let mut vendor = row?;
            vendor.service_categories = Self::load_categories(&conn, &vendor.vendor_id)?;
            vendors.push(vendor);
        }
        Ok(vendors)
    }
}
