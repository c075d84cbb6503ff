// ==========================================
// 上门服务预约智能引擎 - 命令行入口
// ==========================================
// 用法: booking-intelligence <booking_request.json>
// 输出: AllocationResult（JSON）
// 数据库: BOOKING_ENGINE_DB_PATH 或用户数据目录
// 需求样本: 每次受理写入 demand_sample 表，启动时回放保留期内的样本
// ==========================================

use anyhow::{Context, Result};
use booking_intelligence::config::ConfigManager;
use booking_intelligence::engine::{BookingEngine, LocationDirectory, SystemClock};
use booking_intelligence::repository::{SqliteDemandSampleLog, SqliteJobStore, SqliteVendorRegistry};
use booking_intelligence::{db, logging, BookingRequest};
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", booking_intelligence::APP_NAME, booking_intelligence::VERSION);
    tracing::info!("==================================================");

    let request_path = std::env::args()
        .nth(1)
        .context("用法: booking-intelligence <booking_request.json>")?;
    let raw = std::fs::read_to_string(&request_path)
        .with_context(|| format!("无法读取预约请求文件: {}", request_path))?;
    let request: BookingRequest =
        serde_json::from_str(&raw).with_context(|| format!("预约请求格式错误: {}", request_path))?;

    let db_path = db::get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let conn = db::open_sqlite_connection(&db_path)
        .with_context(|| format!("无法打开数据库: {}", db_path))?;
    db::init_schema(&conn).context("数据库初始化失败")?;
    let directory = LocationDirectory::load(&conn).context("区域坐标加载失败")?;
    tracing::info!(locations = directory.len(), "区域坐标已加载");

    let conn = Arc::new(Mutex::new(conn));
    let config = ConfigManager::from_connection(Arc::clone(&conn))?.load_engine_config()?;

    let engine = BookingEngine::new(
        config,
        Arc::new(SystemClock),
        Arc::new(directory),
        Arc::new(SqliteVendorRegistry::new(Arc::clone(&conn))),
        Arc::new(SqliteJobStore::new(Arc::clone(&conn))),
    )?
    .with_demand_log(Arc::new(SqliteDemandSampleLog::new(conn)));

    engine.restore_demand().await.context("需求样本回放失败")?;

    let result = engine.allocate(&request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
