// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的固定时间、师傅/请求构造、距离表、临时数据库与并发闸门
// ==========================================
#![allow(dead_code)]

use async_trait::async_trait;
use booking_intelligence::db;
use booking_intelligence::domain::{
    BookingRequest, CommittedJob, JobSnapshot, NewJob, TimeSlot, VendorProfile,
};
use booking_intelligence::engine::DistanceModel;
use booking_intelligence::repository::{JobStore, RepositoryResult};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Barrier;

// ==========================================
// 时间
// ==========================================

/// 2026-03-02（周一）h:m UTC
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
}

/// 测试统一的"当前时间"：周一 08:00
pub fn test_now() -> DateTime<Utc> {
    at(8, 0)
}

// ==========================================
// 领域对象
// ==========================================

pub fn vendor(id: &str, location: &str, rating: f64, active_jobs: u32) -> VendorProfile {
    VendorProfile {
        vendor_id: id.to_string(),
        location: location.to_string(),
        service_categories: ["plumbing".to_string()].into_iter().collect(),
        average_rating: rating,
        active_job_count: active_jobs,
        is_available: true,
    }
}

pub fn request(booking_id: &str, location: &str, start: DateTime<Utc>) -> BookingRequest {
    BookingRequest {
        booking_id: booking_id.to_string(),
        location: location.to_string(),
        service_category: "plumbing".to_string(),
        requested_start: start,
        created_at: test_now(),
    }
}

pub fn committed_job(
    job_id: &str,
    vendor_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    location: &str,
) -> CommittedJob {
    CommittedJob {
        job_id: job_id.to_string(),
        vendor_id: vendor_id.to_string(),
        booking_id: format!("BK_{}", job_id),
        slot: TimeSlot::new(start, end),
        location: location.to_string(),
    }
}

pub fn whole_day() -> TimeSlot {
    TimeSlot::new(at(0, 0), at(0, 0) + Duration::days(1))
}

// ==========================================
// 距离表
// ==========================================

/// 固定距离表（无向；同一区域距离为 0）
pub struct TableDistance {
    table: HashMap<(String, String), f64>,
}

impl TableDistance {
    pub fn new(entries: &[(&str, &str, f64)]) -> Self {
        let mut table = HashMap::new();
        for (a, b, d) in entries {
            table.insert((a.to_string(), b.to_string()), *d);
            table.insert((b.to_string(), a.to_string()), *d);
        }
        Self { table }
    }
}

impl DistanceModel for TableDistance {
    fn distance_km(&self, from: &str, to: &str) -> Option<f64> {
        if from == to {
            return Some(0.0);
        }
        self.table.get(&(from.to_string(), to.to_string())).copied()
    }
}

/// 常用区域距离：560001 为请求区域，FAR 为远端工单地点
pub fn default_distance() -> Arc<TableDistance> {
    Arc::new(TableDistance::new(&[
        ("560001", "560002", 3.0),
        ("560001", "560003", 6.0),
        ("560001", "FAR", 20.0),
        ("560002", "FAR", 18.0),
        ("560003", "FAR", 22.0),
    ]))
}

// ==========================================
// 数据库
// ==========================================

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径非 UTF-8")?
        .to_string();

    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;

    Ok((temp_file, db_path))
}

pub fn insert_location_point(conn: &Connection, location: &str, lat: f64, lon: f64) {
    conn.execute(
        "INSERT OR REPLACE INTO location_point (location, lat, lon) VALUES (?1, ?2, ?3)",
        rusqlite::params![location, lat, lon],
    )
    .unwrap();
}

// ==========================================
// 并发闸门
// ==========================================

/// 让前 N 次快照读取在读完之后互相等待，保证它们看到同一份（旧）快照
pub struct GatedJobStore {
    inner: Arc<dyn JobStore>,
    gated_calls: usize,
    calls: AtomicUsize,
    barrier: Barrier,
}

impl GatedJobStore {
    pub fn new(inner: Arc<dyn JobStore>, gated_calls: usize) -> Self {
        Self {
            inner,
            gated_calls,
            calls: AtomicUsize::new(0),
            barrier: Barrier::new(gated_calls.max(1)),
        }
    }
}

#[async_trait]
impl JobStore for GatedJobStore {
    async fn list_committed_jobs(
        &self,
        vendor_id: &str,
        window: TimeSlot,
    ) -> RepositoryResult<JobSnapshot> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.inner.list_committed_jobs(vendor_id, window).await?;
        if n < self.gated_calls {
            self.barrier.wait().await;
        }
        Ok(snapshot)
    }

    async fn commit_job(&self, job: NewJob, expected_revision: i64) -> RepositoryResult<CommittedJob> {
        self.inner.commit_job(job, expected_revision).await
    }

    async fn release_job(&self, job_id: &str) -> RepositoryResult<()> {
        self.inner.release_job(job_id).await
    }
}
