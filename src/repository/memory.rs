// ==========================================
// 上门服务预约智能引擎 - 内存仓储
// ==========================================
// 用途: 嵌入式部署与测试；语义与 SQLite 实现一致
// ==========================================

use crate::domain::booking::TimeSlot;
use crate::domain::job::{CommittedJob, JobSnapshot, NewJob};
use crate::domain::vendor::VendorProfile;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::job_repo::{ensure_storable, validate_new_job, JobStore};
use crate::repository::vendor_repo::VendorRegistry;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

// ==========================================
// InMemoryVendorRegistry
// ==========================================
#[derive(Default)]
pub struct InMemoryVendorRegistry {
    vendors: RwLock<BTreeMap<String, VendorProfile>>,
}

impl InMemoryVendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vendors(vendors: impl IntoIterator<Item = VendorProfile>) -> Self {
        let registry = Self::new();
        for vendor in vendors {
            registry.upsert_vendor(vendor);
        }
        registry
    }

    pub fn upsert_vendor(&self, vendor: VendorProfile) {
        let mut vendors = self.vendors.write().unwrap_or_else(|e| e.into_inner());
        vendors.insert(vendor.vendor_id.clone(), vendor);
    }
}

#[async_trait]
impl VendorRegistry for InMemoryVendorRegistry {
    async fn list_candidate_vendors(
        &self,
        service_category: &str,
        _location: &str,
        _radius_km: f64,
    ) -> RepositoryResult<Vec<VendorProfile>> {
        let vendors = self
            .vendors
            .read()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(vendors
            .values()
            .filter(|v| v.offers(service_category))
            .cloned()
            .collect())
    }
}

// ==========================================
// InMemoryJobStore
// ==========================================
/// 工单 + 提交时的 revision
struct StoredJob {
    job: CommittedJob,
    committed_revision: i64,
}

#[derive(Default)]
struct VendorJobs {
    jobs: Vec<StoredJob>,
    revision: i64,
}

impl VendorJobs {
    fn push(&mut self, job: CommittedJob) {
        self.revision += 1;
        self.jobs.push(StoredJob {
            job,
            committed_revision: self.revision,
        });
    }
}

#[derive(Default)]
struct JobTables {
    by_vendor: HashMap<String, VendorJobs>,
    owner: HashMap<String, String>, // job_id → vendor_id
}

#[derive(Default)]
pub struct InMemoryJobStore {
    tables: Mutex<JobTables>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, JobTables>> {
        self.tables
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 直接写入工单（跳过乐观锁，用于初始化已有档期）
    pub fn seed_job(&self, job: CommittedJob) -> RepositoryResult<()> {
        let mut tables = self.lock()?;
        tables.owner.insert(job.job_id.clone(), job.vendor_id.clone());
        tables
            .by_vendor
            .entry(job.vendor_id.clone())
            .or_default()
            .push(job);
        Ok(())
    }

    /// 师傅全部未释放工单（按开始时间排序）
    pub fn jobs_for(&self, vendor_id: &str) -> RepositoryResult<Vec<CommittedJob>> {
        let tables = self.lock()?;
        let mut jobs: Vec<CommittedJob> = tables
            .by_vendor
            .get(vendor_id)
            .map(|v| v.jobs.iter().map(|s| s.job.clone()).collect())
            .unwrap_or_default();
        jobs.sort_by_key(|j| j.slot.start);
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn list_committed_jobs(
        &self,
        vendor_id: &str,
        window: TimeSlot,
    ) -> RepositoryResult<JobSnapshot> {
        ensure_storable("window", &window)?;

        let tables = self.lock()?;
        let Some(entry) = tables.by_vendor.get(vendor_id) else {
            return Ok(JobSnapshot::empty(vendor_id));
        };

        let mut jobs: Vec<CommittedJob> = entry
            .jobs
            .iter()
            .filter(|s| s.job.slot.overlaps(&window))
            .map(|s| s.job.clone())
            .collect();
        jobs.sort_by_key(|j| j.slot.start);

        Ok(JobSnapshot {
            vendor_id: vendor_id.to_string(),
            jobs,
            revision: entry.revision,
        })
    }

    async fn commit_job(&self, job: NewJob, expected_revision: i64) -> RepositoryResult<CommittedJob> {
        validate_new_job(&job)?;

        let mut tables = self.lock()?;
        let (actual, conflicting) = match tables.by_vendor.get(&job.vendor_id) {
            Some(entry) => (
                entry.revision,
                entry.jobs.iter().any(|s| {
                    s.job.slot.overlaps(&job.conflict_window)
                        && (s.committed_revision > expected_revision || s.job.slot.overlaps(&job.slot))
                }),
            ),
            None => (0, false),
        };
        if expected_revision > actual || conflicting {
            return Err(RepositoryError::OptimisticLockFailure {
                vendor_id: job.vendor_id,
                expected: expected_revision,
                actual,
            });
        }

        let committed = CommittedJob {
            job_id: Uuid::new_v4().to_string(),
            vendor_id: job.vendor_id,
            booking_id: job.booking_id,
            slot: job.slot,
            location: job.location,
        };
        tables
            .owner
            .insert(committed.job_id.clone(), committed.vendor_id.clone());
        tables
            .by_vendor
            .entry(committed.vendor_id.clone())
            .or_default()
            .push(committed.clone());

        Ok(committed)
    }

    async fn release_job(&self, job_id: &str) -> RepositoryResult<()> {
        let mut tables = self.lock()?;
        let vendor_id = tables.owner.remove(job_id).ok_or_else(|| RepositoryError::NotFound {
            entity: "CommittedJob".to_string(),
            id: job_id.to_string(),
        })?;

        let entry = tables.by_vendor.entry(vendor_id).or_default();
        entry.jobs.retain(|s| s.job.job_id != job_id);
        entry.revision += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn new_job(vendor_id: &str, hour: u32) -> NewJob {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap();
        let slot = TimeSlot::starting_at(start, Duration::hours(1));
        NewJob::new(vendor_id, format!("BK_{}", hour), slot, "560001")
            .with_conflict_window(slot.expand(Duration::minutes(60)))
    }

    fn whole_day() -> TimeSlot {
        TimeSlot::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts_only_near_new_jobs() {
        let store = InMemoryJobStore::new();
        let snapshot = store.list_committed_jobs("V1", whole_day()).await.unwrap();
        assert_eq!(snapshot.revision, 0);

        store.commit_job(new_job("V1", 9), snapshot.revision).await.unwrap();

        // 10:00 的冲突检测范围 [09:00, 12:00) 覆盖 09:00 新工单
        let err = store
            .commit_job(new_job("V1", 10), snapshot.revision)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::OptimisticLockFailure { expected: 0, actual: 1, .. }
        ));

        // 14:00 与新工单相距较远，旧快照仍可提交
        store.commit_job(new_job("V1", 14), snapshot.revision).await.unwrap();
        assert_eq!(store.jobs_for("V1").unwrap().len(), 2);

        // 其他师傅不受影响
        store.commit_job(new_job("V2", 9), 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_rejects_direct_overlap_and_future_revision() {
        let store = InMemoryJobStore::new();
        store.commit_job(new_job("V1", 9), 0).await.unwrap();

        // 快照已包含该工单，但时间段直接重叠
        let err = store.commit_job(new_job("V1", 9), 1).await.unwrap_err();
        assert!(err.is_conflict());

        let err = store.commit_job(new_job("V1", 15), 7).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_release_removes_job_and_bumps_revision() {
        let store = InMemoryJobStore::new();
        let job = store.commit_job(new_job("V1", 9), 0).await.unwrap();

        store.release_job(&job.job_id).await.unwrap();
        let snapshot = store.list_committed_jobs("V1", whole_day()).await.unwrap();
        assert!(snapshot.jobs.is_empty());
        assert_eq!(snapshot.revision, 2);

        let err = store.release_job(&job.job_id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_registry_filters_by_category() {
        let registry = InMemoryVendorRegistry::with_vendors([
            VendorProfile {
                vendor_id: "V1".to_string(),
                location: "560001".to_string(),
                service_categories: ["plumbing".to_string()].into_iter().collect(),
                average_rating: 4.0,
                active_job_count: 0,
                is_available: true,
            },
            VendorProfile {
                vendor_id: "V2".to_string(),
                location: "560001".to_string(),
                service_categories: ["painting".to_string()].into_iter().collect(),
                average_rating: 4.0,
                active_job_count: 0,
                is_available: true,
            },
        ]);
        let vendors = registry
            .list_candidate_vendors("plumbing", "560001", 15.0)
            .await
            .unwrap();
        assert_eq!(vendors.len(), 1);
        assert_eq!(vendors[0].vendor_id, "V1");
    }
}
