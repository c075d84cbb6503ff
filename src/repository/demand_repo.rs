// ==========================================
// 上门服务预约智能引擎 - 需求样本日志
// ==========================================
// 职责: 持久化已受理请求的需求样本，进程重启后回放给 DemandClassifier
// 红线: 只追加与按时间清理，不做分级计算
// ==========================================

use crate::domain::demand::DemandSample;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::job_repo::{format_timestamp, parse_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

// ==========================================
// DemandSampleLog Trait
// ==========================================
#[async_trait]
pub trait DemandSampleLog: Send + Sync {
    /// 追加一条样本
    async fn append(&self, sample: &DemandSample) -> RepositoryResult<()>;

    /// 读取 `since` 之后（不含）的全部样本，按时间升序
    async fn load_since(&self, since: DateTime<Utc>) -> RepositoryResult<Vec<DemandSample>>;

    /// 删除 `cutoff` 及更早的样本
    ///
    /// # 返回
    /// 删除的样本数
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> RepositoryResult<usize>;
}

// ==========================================
// SqliteDemandSampleLog
// ==========================================
pub struct SqliteDemandSampleLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDemandSampleLog {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

#[async_trait]
impl DemandSampleLog for SqliteDemandSampleLog {
    async fn append(&self, sample: &DemandSample) -> RepositoryResult<()> {
        if sample.location.trim().is_empty() {
            return Err(RepositoryError::ValidationError(
                "需求样本 location 不能为空".to_string(),
            ));
        }

        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO demand_sample (location, service_category, recorded_at)
               VALUES (?1, ?2, ?3)"#,
            params![
                &sample.location,
                &sample.service_category,
                format_timestamp(sample.timestamp),
            ],
        )?;
        Ok(())
    }

    async fn load_since(&self, since: DateTime<Utc>) -> RepositoryResult<Vec<DemandSample>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT location, service_category, recorded_at
               FROM demand_sample
               WHERE recorded_at > ?1
               ORDER BY recorded_at, sample_id"#,
        )?;
        let rows = stmt.query_map(params![format_timestamp(since)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (location, service_category, recorded_at) = row?;
            samples.push(DemandSample::new(
                location,
                service_category,
                parse_timestamp("recorded_at", &recorded_at)?,
            ));
        }
        Ok(samples)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let removed = conn.execute(
            "DELETE FROM demand_sample WHERE recorded_at <= ?1",
            params![format_timestamp(cutoff)],
        )?;
        debug!(removed, cutoff = %cutoff, "需求样本日志已清理");
        Ok(removed)
    }
}
