// ==========================================
// 上门服务预约智能引擎 - 工单存储
// ==========================================
// 职责: 工单快照读取 + 条件写入（乐观锁）+ 补偿释放
// 并发控制: 每个师傅一条 revision，提交/释放时 +1，工单记录提交时的 revision；
//           提交时若冲突检测范围内出现快照之后提交的工单，或与 slot 直接重叠的工单，
//           即失败（OptimisticLockFailure）；范围外的并发提交互不影响
// 红线: Repository 不含业务规则，缓冲可行性由 ScheduleBuffer 负责
// ==========================================

use crate::domain::booking::TimeSlot;
use crate::domain::job::{CommittedJob, JobSnapshot, NewJob};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

// ==========================================
// JobStore Trait
// ==========================================
// 实现者: SqliteJobStore / InMemoryJobStore
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 读取师傅在时间范围内的已提交工单快照
    ///
    /// # 参数
    /// - `vendor_id`: 师傅ID
    /// - `window`: 时间范围（与之重叠的工单均返回）
    ///
    /// # 返回
    /// JobSnapshot（含读取时的 revision）
    async fn list_committed_jobs(
        &self,
        vendor_id: &str,
        window: TimeSlot,
    ) -> RepositoryResult<JobSnapshot>;

    /// 条件写入工单
    ///
    /// # 参数
    /// - `job`: 待提交工单
    /// - `expected_revision`: 快照读取时的 revision
    ///
    /// # 返回
    /// - Ok(CommittedJob): 提交成功，附带存储分配的 job_id
    /// - Err(OptimisticLockFailure): 快照之后 `job.conflict_window` 内新增了工单，
    ///   或 slot 与未释放工单重叠
    /// - Err(ValidationError): slot 为空、conflict_window 未覆盖 slot 或时间超出可存储范围
    async fn commit_job(&self, job: NewJob, expected_revision: i64) -> RepositoryResult<CommittedJob>;

    /// 补偿释放已提交工单
    async fn release_job(&self, job_id: &str) -> RepositoryResult<()>;
}

// ==========================================
// SqliteJobStore
// ==========================================
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn read_revision(conn: &Connection, vendor_id: &str) -> RepositoryResult<i64> {
        let revision: Option<i64> = conn
            .query_row(
                "SELECT revision FROM vendor_job_revision WHERE vendor_id = ?1",
                params![vendor_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(revision.unwrap_or(0))
    }

    fn bump_revision(tx: &Transaction<'_>, vendor_id: &str) -> RepositoryResult<i64> {
        tx.execute(
            r#"INSERT INTO vendor_job_revision (vendor_id, revision) VALUES (?1, 1)
               ON CONFLICT(vendor_id) DO UPDATE SET revision = revision + 1"#,
            params![vendor_id],
        )?;
        Self::read_revision(tx, vendor_id)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn list_committed_jobs(
        &self,
        vendor_id: &str,
        window: TimeSlot,
    ) -> RepositoryResult<JobSnapshot> {
        ensure_storable("window", &window)?;

        let mut conn = self.get_conn()?;
        // 同一事务内读取工单与 revision，保证二者一致
        let tx = conn.transaction()?;

        let revision = Self::read_revision(&tx, vendor_id)?;

        let mut jobs = Vec::new();
        {
            let mut stmt = tx.prepare(
                r#"SELECT job_id, vendor_id, booking_id, start_at, end_at, location
                   FROM committed_job
                   WHERE vendor_id = ?1 AND released = 0 AND start_at < ?2 AND end_at > ?3
                   ORDER BY start_at"#,
            )?;
            let rows = stmt.query_map(
                params![vendor_id, format_timestamp(window.end), format_timestamp(window.start)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )?;

            for row in rows {
                let (job_id, vendor_id, booking_id, start_at, end_at, location) = row?;
                jobs.push(CommittedJob {
                    job_id,
                    vendor_id,
                    booking_id,
                    slot: TimeSlot::new(
                        parse_timestamp("start_at", &start_at)?,
                        parse_timestamp("end_at", &end_at)?,
                    ),
                    location,
                });
            }
        }
        tx.commit()?;

        Ok(JobSnapshot {
            vendor_id: vendor_id.to_string(),
            jobs,
            revision,
        })
    }

    async fn commit_job(&self, job: NewJob, expected_revision: i64) -> RepositoryResult<CommittedJob> {
        validate_new_job(&job)?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let actual = Self::read_revision(&tx, &job.vendor_id)?;
        let conflicting: i64 = tx.query_row(
            r#"SELECT COUNT(*) FROM committed_job
               WHERE vendor_id = ?1 AND released = 0 AND start_at < ?2 AND end_at > ?3
                 AND (committed_revision > ?4 OR (start_at < ?5 AND end_at > ?6))"#,
            params![
                &job.vendor_id,
                format_timestamp(job.conflict_window.end),
                format_timestamp(job.conflict_window.start),
                expected_revision,
                format_timestamp(job.slot.end),
                format_timestamp(job.slot.start),
            ],
            |row| row.get(0),
        )?;
        if expected_revision > actual || conflicting > 0 {
            return Err(RepositoryError::OptimisticLockFailure {
                vendor_id: job.vendor_id,
                expected: expected_revision,
                actual,
            });
        }

        let revision = Self::bump_revision(&tx, &job.vendor_id)?;
        let job_id = Uuid::new_v4().to_string();
        tx.execute(
            r#"INSERT INTO committed_job
                   (job_id, vendor_id, booking_id, start_at, end_at, location, released, committed_revision)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)"#,
            params![
                &job_id,
                &job.vendor_id,
                &job.booking_id,
                format_timestamp(job.slot.start),
                format_timestamp(job.slot.end),
                &job.location,
                revision,
            ],
        )?;
        tx.commit()?;

        debug!(job_id = %job_id, vendor_id = %job.vendor_id, revision, "工单已写入");

        Ok(CommittedJob {
            job_id,
            vendor_id: job.vendor_id,
            booking_id: job.booking_id,
            slot: job.slot,
            location: job.location,
        })
    }

    async fn release_job(&self, job_id: &str) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let vendor_id: Option<String> = tx
            .query_row(
                "SELECT vendor_id FROM committed_job WHERE job_id = ?1 AND released = 0",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        let vendor_id = vendor_id.ok_or_else(|| RepositoryError::NotFound {
            entity: "CommittedJob".to_string(),
            id: job_id.to_string(),
        })?;

        tx.execute(
            "UPDATE committed_job SET released = 1 WHERE job_id = ?1",
            params![job_id],
        )?;
        let revision = Self::bump_revision(&tx, &vendor_id)?;
        tx.commit()?;

        debug!(job_id, vendor_id = %vendor_id, revision, "工单已释放");
        Ok(())
    }
}

// ==========================================
// 提交前校验
// ==========================================

/// 两种存储实现共用的 NewJob 校验
pub(crate) fn validate_new_job(job: &NewJob) -> RepositoryResult<()> {
    if job.slot.end <= job.slot.start {
        return Err(RepositoryError::ValidationError(format!(
            "工单时间段非法: {} - {}",
            job.slot.start, job.slot.end
        )));
    }
    if !job.conflict_window.covers(&job.slot) {
        return Err(RepositoryError::ValidationError(format!(
            "冲突检测范围未覆盖工单时间段: {} - {}",
            job.conflict_window.start, job.conflict_window.end
        )));
    }
    ensure_storable("slot", &job.slot)?;
    ensure_storable("conflict_window", &job.conflict_window)
}

/// 时间段两端须落在 0000 - 9999 年（定长时间戳可表示的范围）
pub(crate) fn ensure_storable(field: &str, slot: &TimeSlot) -> RepositoryResult<()> {
    let in_range = |ts: DateTime<Utc>| (0..=9999).contains(&ts.year());
    if in_range(slot.start) && in_range(slot.end) {
        Ok(())
    } else {
        Err(RepositoryError::ValidationError(format!(
            "{} 超出可存储的时间范围: {} - {}",
            field, slot.start, slot.end
        )))
    }
}

// ==========================================
// 时间戳读写
// ==========================================
// 定长 RFC3339（毫秒，Z 结尾）；年份限定 0000 - 9999 时字符串比较即时间比较

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(field: &str, raw: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::FieldValueError {
            field: field.to_string(),
            message: format!("{}: {}", raw, e),
        })
}
