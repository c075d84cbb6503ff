// ==========================================
// 分派主流程端到端测试
// ==========================================
// 覆盖: 冷启动分派 / 高需求评分 / 行程缓冲改期 / 并发提交冲突 / 补偿释放
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod booking_engine_e2e_test {
    use async_trait::async_trait;
    use booking_intelligence::config::{
        EngineConfig, RetryConfig, ScoringWeights, ServiceCatalog,
    };
    use booking_intelligence::domain::{
        CommittedJob, DemandSample, DemandTier, JobSnapshot, NewJob, ServiceOffering, TimeSlot,
        VendorProfile,
    };
    use booking_intelligence::engine::{AllocationError, BookingEngine, FixedClock};
    use booking_intelligence::repository::{
        InMemoryJobStore, InMemoryVendorRegistry, JobStore, RepositoryError, RepositoryResult,
        VendorRegistry,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use futures::future::join_all;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::test_helpers::{
        at, committed_job, default_distance, request, test_now, vendor, whole_day, GatedJobStore,
    };

    // ==========================================
    // 测试辅助函数
    // ==========================================

    fn build_engine(
        config: EngineConfig,
        vendors: Vec<VendorProfile>,
        job_store: Arc<dyn JobStore>,
    ) -> BookingEngine {
        booking_intelligence::logging::init_test();
        BookingEngine::new(
            config,
            Arc::new(FixedClock::new(test_now())),
            default_distance(),
            Arc::new(InMemoryVendorRegistry::with_vendors(vendors)),
            job_store,
        )
        .unwrap()
    }

    fn plumbing_config(base_price: rust_decimal::Decimal, duration_minutes: i64) -> EngineConfig {
        EngineConfig {
            catalog: ServiceCatalog {
                offerings: vec![ServiceOffering::new("plumbing", base_price, duration_minutes)],
            },
            ..EngineConfig::default()
        }
    }

    // ==========================================
    // 场景 A: 冷启动
    // ==========================================

    #[tokio::test]
    async fn test_cold_start_allocates_sole_vendor_at_low_tier() {
        let store = Arc::new(InMemoryJobStore::new());
        let engine = build_engine(
            EngineConfig::default(),
            vec![vendor("V1", "560002", 4.5, 0)],
            store.clone(),
        );

        let result = engine
            .allocate(&request("BK_A", "560001", at(14, 0)))
            .await
            .unwrap();

        assert_eq!(result.vendor_id, "V1");
        assert_eq!(result.demand_tier_used, DemandTier::Low);
        assert_eq!(result.committed_slot.start, at(14, 0));
        assert_eq!(result.committed_slot.end, at(15, 0));
        assert_eq!(result.quoted_price, dec!(499.00));
        assert_eq!(result.attempts, 1);

        let jobs = store.jobs_for("V1").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, result.job_id);
        assert_eq!(jobs[0].booking_id, "BK_A");
    }

    #[tokio::test]
    async fn test_cold_start_in_peak_window_applies_peak_multiplier() {
        let engine = build_engine(
            EngineConfig::default(),
            vec![vendor("V1", "560002", 4.5, 0)],
            Arc::new(InMemoryJobStore::new()),
        );

        let result = engine
            .allocate(&request("BK_A2", "560001", at(9, 0)))
            .await
            .unwrap();

        assert_eq!(result.demand_tier_used, DemandTier::Low);
        // 499 × 1.0 × 1.2
        assert_eq!(result.quoted_price, dec!(598.80));
    }

    // ==========================================
    // 场景 B: 高需求下的综合评分
    // ==========================================

    fn seed_high_demand(engine: &BookingEngine) {
        for i in 0..50 {
            engine.classifier().record_sample(DemandSample::new(
                "560001",
                "plumbing",
                test_now() - Duration::minutes(i * 20),
            ));
        }
    }

    #[tokio::test]
    async fn test_high_demand_selects_higher_composite_score() {
        let engine = build_engine(
            EngineConfig::default(),
            vec![vendor("V_42", "560002", 4.2, 0), vendor("V_48", "560002", 4.8, 1)],
            Arc::new(InMemoryJobStore::new()),
        );
        seed_high_demand(&engine);

        let result = engine
            .allocate(&request("BK_B", "560001", at(14, 0)))
            .await
            .unwrap();

        assert_eq!(result.demand_tier_used, DemandTier::High);
        assert_eq!(result.vendor_id, "V_48");
        // 499 × 1.35
        assert_eq!(result.quoted_price, dec!(673.65));
    }

    #[tokio::test]
    async fn test_high_demand_load_heavy_weights_select_idle_vendor() {
        let mut config = EngineConfig::default();
        config.scoring.weights = ScoringWeights {
            rating: 0.25,
            proximity: 0.25,
            load: 0.40,
            demand: 0.10,
        };
        let engine = build_engine(
            config,
            vec![vendor("V_42", "560002", 4.2, 0), vendor("V_48", "560002", 4.8, 1)],
            Arc::new(InMemoryJobStore::new()),
        );
        seed_high_demand(&engine);

        let result = engine
            .allocate(&request("BK_B2", "560001", at(14, 0)))
            .await
            .unwrap();

        assert_eq!(result.demand_tier_used, DemandTier::High);
        assert_eq!(result.vendor_id, "V_42");
    }

    // ==========================================
    // 场景 C: 行程缓冲导致改期
    // ==========================================

    #[tokio::test]
    async fn test_travel_buffer_moves_to_earliest_feasible_slot() {
        let store = Arc::new(InMemoryJobStore::new());
        store
            .seed_job(committed_job("J_FAR", "V1", at(10, 0), at(11, 0), "FAR"))
            .unwrap();
        let engine = build_engine(
            plumbing_config(dec!(500), 50),
            vec![vendor("V1", "560002", 4.5, 1)],
            store.clone(),
        );

        let result = engine
            .allocate(&request("BK_C", "560001", at(11, 10)))
            .await
            .unwrap();

        // 行程缓冲 = 10 + 1.5 × 20 = 40 分钟 → 最早 11:40
        assert_eq!(result.vendor_id, "V1");
        assert_eq!(result.committed_slot.start, at(11, 40));
        assert_eq!(result.committed_slot.end, at(12, 30));
        assert_eq!(result.quoted_price, dec!(500.00));
        assert_eq!(store.jobs_for("V1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_travel_buffer_exhausted_window_reports_no_vendor() {
        let store = Arc::new(InMemoryJobStore::new());
        store
            .seed_job(committed_job("J_FAR", "V1", at(10, 0), at(11, 0), "FAR"))
            .unwrap();
        let mut config = plumbing_config(dec!(500), 50);
        config.buffer.search_window_minutes = 15;
        let engine = build_engine(config, vec![vendor("V1", "560002", 4.5, 1)], store.clone());

        let err = engine
            .allocate(&request("BK_C2", "560001", at(11, 10)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AllocationError::NoVendorAvailable { candidates_tried: 1, .. }
        ));
        assert_eq!(store.jobs_for("V1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_busy_top_vendor_falls_back_to_next() {
        let store = Arc::new(InMemoryJobStore::new());
        store
            .seed_job(committed_job("J1", "V_TOP", at(13, 30), at(15, 30), "560001"))
            .unwrap();
        let mut config = EngineConfig::default();
        config.buffer.search_window_minutes = 0;
        let engine = build_engine(
            config,
            vec![vendor("V_TOP", "560001", 5.0, 0), vendor("V_NEXT", "560003", 3.5, 2)],
            store,
        );

        let result = engine
            .allocate(&request("BK_F", "560001", at(14, 0)))
            .await
            .unwrap();
        assert_eq!(result.vendor_id, "V_NEXT");
        assert_eq!(result.committed_slot.start, at(14, 0));
    }

    // ==========================================
    // 场景 D: 并发提交
    // ==========================================

    #[tokio::test]
    async fn test_concurrent_allocations_without_retry_one_conflicts() {
        let inner = Arc::new(InMemoryJobStore::new());
        let gated = Arc::new(GatedJobStore::new(inner.clone(), 2));
        let mut config = EngineConfig::default();
        config.retry = RetryConfig {
            max_commit_retries: 0,
        };
        let engine = build_engine(config, vec![vendor("V1", "560002", 4.5, 0)], gated);

        let r1 = request("BK_D1", "560001", at(14, 0));
        let r2 = request("BK_D2", "560001", at(14, 30));
        let (a, b) = tokio::join!(engine.allocate(&r1), engine.allocate(&r2));

        let (ok, err) = match (a, b) {
            (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
            other => panic!("期望恰好一个成功: {:?}", other),
        };
        assert_eq!(ok.vendor_id, "V1");
        assert!(matches!(
            err,
            AllocationError::AllocationConflict { attempts: 1, .. }
        ));
        assert_eq!(inner.jobs_for("V1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_retry_sees_fresh_snapshot() {
        let inner = Arc::new(InMemoryJobStore::new());
        let gated = Arc::new(GatedJobStore::new(inner.clone(), 2));
        let mut config = EngineConfig::default();
        config.buffer.search_window_minutes = 0;
        let engine = build_engine(config, vec![vendor("V1", "560002", 4.5, 0)], gated);

        let r1 = request("BK_D1", "560001", at(14, 0));
        let r2 = request("BK_D2", "560001", at(14, 0));
        let (a, b) = tokio::join!(engine.allocate(&r1), engine.allocate(&r2));

        let (ok, err) = match (a, b) {
            (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
            other => panic!("期望恰好一个成功: {:?}", other),
        };
        assert_eq!(ok.committed_slot.start, at(14, 0));
        // 重试时新快照已包含对方工单，唯一师傅不再可行
        assert!(matches!(
            err,
            AllocationError::NoVendorAvailable { candidates_tried: 1, .. }
        ));
        assert_eq!(inner.jobs_for("V1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_retry_finds_another_vendor() {
        let inner = Arc::new(InMemoryJobStore::new());
        // 两个候选师傅，每次分派预读两份快照
        let gated = Arc::new(GatedJobStore::new(inner.clone(), 4));
        let mut config = EngineConfig::default();
        config.buffer.search_window_minutes = 0;
        let engine = build_engine(
            config,
            vec![vendor("V_A", "560001", 5.0, 0), vendor("V_B", "560003", 3.0, 3)],
            gated,
        );

        let r1 = request("BK_D1", "560001", at(14, 0));
        let r2 = request("BK_D2", "560001", at(14, 0));
        let (a, b) = tokio::join!(engine.allocate(&r1), engine.allocate(&r2));
        let a = a.unwrap();
        let b = b.unwrap();

        let mut vendors = vec![a.vendor_id.clone(), b.vendor_id.clone()];
        vendors.sort();
        assert_eq!(vendors, vec!["V_A".to_string(), "V_B".to_string()]);

        let retried = if a.vendor_id == "V_B" { &a } else { &b };
        assert_eq!(retried.attempts, 2);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_on_distinct_days_all_commit() {
        let inner = Arc::new(InMemoryJobStore::new());
        let gated = Arc::new(GatedJobStore::new(inner.clone(), 5));
        let mut config = EngineConfig::default();
        config.retry = RetryConfig {
            max_commit_retries: 0,
        };
        let engine = build_engine(config, vec![vendor("V1", "560002", 4.5, 0)], gated);

        // 五个请求读到同一份旧快照，但各自落在不同日期
        let requests: Vec<_> = (1..=5)
            .map(|day| request(&format!("BK_DAY{}", day), "560001", at(10, 0) + Duration::days(day)))
            .collect();
        let results = join_all(requests.iter().map(|r| engine.allocate(r))).await;

        for (req, result) in requests.iter().zip(&results) {
            let result = result.as_ref().unwrap();
            assert_eq!(result.vendor_id, "V1");
            assert_eq!(result.attempts, 1);
            assert_eq!(result.committed_slot.start, req.requested_start);
        }
        assert_eq!(inner.jobs_for("V1").unwrap().len(), 5);
    }

    /// 每次提交前，先替同一师傅在一周后提交一单无关工单
    struct InterleavingJobStore {
        inner: Arc<InMemoryJobStore>,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl JobStore for InterleavingJobStore {
        async fn list_committed_jobs(
            &self,
            vendor_id: &str,
            window: TimeSlot,
        ) -> RepositoryResult<JobSnapshot> {
            self.inner.list_committed_jobs(vendor_id, window).await
        }

        async fn commit_job(&self, job: NewJob, expected_revision: i64) -> RepositoryResult<CommittedJob> {
            let n = self.commits.fetch_add(1, Ordering::SeqCst) as i64;
            let other = TimeSlot::starting_at(at(9, 0) + Duration::days(7 + n), Duration::hours(1));
            let current = self.inner.list_committed_jobs(&job.vendor_id, other).await?;
            self.inner
                .commit_job(
                    NewJob::new(job.vendor_id.clone(), format!("OTHER{}", n), other, "560003"),
                    current.revision,
                )
                .await?;

            self.inner.commit_job(job, expected_revision).await
        }

        async fn release_job(&self, job_id: &str) -> RepositoryResult<()> {
            self.inner.release_job(job_id).await
        }
    }

    #[tokio::test]
    async fn test_unrelated_commit_for_same_vendor_does_not_conflict() {
        let inner = Arc::new(InMemoryJobStore::new());
        let store = Arc::new(InterleavingJobStore {
            inner: inner.clone(),
            commits: AtomicUsize::new(0),
        });
        let mut config = EngineConfig::default();
        config.retry = RetryConfig {
            max_commit_retries: 0,
        };
        let engine = build_engine(config, vec![vendor("V1", "560002", 4.5, 0)], store);

        let result = engine
            .allocate(&request("BK1", "560001", at(14, 0)))
            .await
            .unwrap();
        assert_eq!(result.vendor_id, "V1");
        assert_eq!(result.committed_slot.start, at(14, 0));
        assert_eq!(result.attempts, 1);

        let bookings: Vec<String> = inner
            .jobs_for("V1")
            .unwrap()
            .into_iter()
            .map(|j| j.booking_id)
            .collect();
        assert_eq!(bookings, vec!["BK1".to_string(), "OTHER0".to_string()]);
    }

    #[tokio::test]
    async fn test_new_job_within_buffer_after_snapshot_conflicts() {
        // 14:00 的工单提交前，有人在 15:10 为同一师傅提交了远距离工单（所需缓冲 40 分钟）
        struct NearbyJobStore {
            inner: Arc<InMemoryJobStore>,
        }

        #[async_trait]
        impl JobStore for NearbyJobStore {
            async fn list_committed_jobs(
                &self,
                vendor_id: &str,
                window: TimeSlot,
            ) -> RepositoryResult<JobSnapshot> {
                self.inner.list_committed_jobs(vendor_id, window).await
            }

            async fn commit_job(&self, job: NewJob, expected_revision: i64) -> RepositoryResult<CommittedJob> {
                let nearby = TimeSlot::new(at(15, 10), at(16, 0));
                if job.booking_id == "BK1" {
                    let current = self.inner.list_committed_jobs(&job.vendor_id, nearby).await?;
                    self.inner
                        .commit_job(
                            NewJob::new(job.vendor_id.clone(), "NEARBY", nearby, "FAR"),
                            current.revision,
                        )
                        .await?;
                }
                self.inner.commit_job(job, expected_revision).await
            }

            async fn release_job(&self, job_id: &str) -> RepositoryResult<()> {
                self.inner.release_job(job_id).await
            }
        }

        let inner = Arc::new(InMemoryJobStore::new());
        let mut config = EngineConfig::default();
        config.retry = RetryConfig {
            max_commit_retries: 0,
        };
        let engine = build_engine(
            config,
            vec![vendor("V1", "560002", 4.5, 0)],
            Arc::new(NearbyJobStore {
                inner: inner.clone(),
            }),
        );

        let err = engine
            .allocate(&request("BK1", "560001", at(14, 0)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::AllocationConflict { attempts: 1, .. }
        ));
        assert_eq!(inner.jobs_for("V1").unwrap().len(), 1);
    }

    // ==========================================
    // 补偿释放
    // ==========================================

    #[tokio::test]
    async fn test_release_frees_the_slot() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut config = EngineConfig::default();
        config.buffer.search_window_minutes = 0;
        let engine = build_engine(config, vec![vendor("V1", "560002", 4.5, 0)], store.clone());

        let first = engine
            .allocate(&request("BK_R1", "560001", at(14, 0)))
            .await
            .unwrap();
        let blocked = engine
            .allocate(&request("BK_R2", "560001", at(14, 0)))
            .await
            .unwrap_err();
        assert!(matches!(blocked, AllocationError::NoVendorAvailable { .. }));

        engine.release(&first).await.unwrap();
        let snapshot = store.list_committed_jobs("V1", whole_day()).await.unwrap();
        assert!(snapshot.jobs.is_empty());

        let second = engine
            .allocate(&request("BK_R3", "560001", at(14, 0)))
            .await
            .unwrap();
        assert_eq!(second.vendor_id, "V1");

        // 重复释放
        let err = engine.release(&first).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::Collaborator(RepositoryError::NotFound { .. })
        ));
    }

    // ==========================================
    // 非法请求与边界
    // ==========================================

    #[tokio::test]
    async fn test_unknown_category_is_invalid_request() {
        let engine = build_engine(
            EngineConfig::default(),
            vec![vendor("V1", "560002", 4.5, 0)],
            Arc::new(InMemoryJobStore::new()),
        );
        let mut req = request("BK_X", "560001", at(14, 0));
        req.service_category = "pest_control".to_string();

        let err = engine.allocate(&req).await.unwrap_err();
        assert!(matches!(err, AllocationError::InvalidRequest(_)));
        // 非法请求不计入需求
        assert_eq!(engine.classifier().sample_count("560001", test_now()), 0);
    }

    #[tokio::test]
    async fn test_past_start_is_invalid_request() {
        let engine = build_engine(
            EngineConfig::default(),
            vec![vendor("V1", "560002", 4.5, 0)],
            Arc::new(InMemoryJobStore::new()),
        );
        let err = engine
            .allocate(&request("BK_PAST", "560001", at(7, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_start_near_time_limit_is_invalid_request() {
        let engine = build_engine(
            EngineConfig::default(),
            vec![vendor("V1", "560002", 4.5, 0)],
            Arc::new(InMemoryJobStore::new()),
        );

        let near_max = DateTime::<Utc>::MAX_UTC - Duration::minutes(30);
        let err = engine
            .allocate(&request("BK_MAX", "560001", near_max))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidRequest(_)));

        // 可表示但超出 9999 年，工单存储无法按序保存
        let year_end = Utc.with_ymd_and_hms(9999, 12, 31, 20, 0, 0).unwrap();
        let err = engine
            .allocate(&request("BK_Y9999", "560001", year_end))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidRequest(_)));

        assert_eq!(engine.classifier().sample_count("560001", test_now()), 0);
    }

    #[tokio::test]
    async fn test_no_eligible_vendor_reports_zero_tried() {
        let mut off = vendor("V_OFF", "560002", 4.9, 0);
        off.is_available = false;
        let far = vendor("V_FAR", "FAR", 4.9, 0);
        let engine = build_engine(
            EngineConfig::default(),
            vec![off, far],
            Arc::new(InMemoryJobStore::new()),
        );

        let err = engine
            .allocate(&request("BK_N", "560001", at(14, 0)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::NoVendorAvailable { candidates_tried: 0, .. }
        ));
        // 请求已受理，需求样本已记录
        assert_eq!(engine.classifier().sample_count("560001", test_now()), 1);
    }

    struct FailingRegistry;

    #[async_trait]
    impl VendorRegistry for FailingRegistry {
        async fn list_candidate_vendors(
            &self,
            _service_category: &str,
            _location: &str,
            _radius_km: f64,
        ) -> RepositoryResult<Vec<VendorProfile>> {
            Err(RepositoryError::LockError("registry unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_registry_failure_is_collaborator_error() {
        let engine = BookingEngine::new(
            EngineConfig::default(),
            Arc::new(FixedClock::new(test_now())),
            default_distance(),
            Arc::new(FailingRegistry),
            Arc::new(InMemoryJobStore::new()),
        )
        .unwrap();

        let err = engine
            .allocate(&request("BK_E", "560001", at(14, 0)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::Collaborator(RepositoryError::LockError(_))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let mut config = EngineConfig::default();
        config.demand.low_max = 50;
        config.demand.med_max = 40;
        let result = BookingEngine::new(
            config,
            Arc::new(FixedClock::new(test_now())),
            default_distance(),
            Arc::new(InMemoryVendorRegistry::new()),
            Arc::new(InMemoryJobStore::new()),
        );
        assert!(result.is_err());
    }
}
