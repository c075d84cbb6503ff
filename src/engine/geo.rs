// ==========================================
// 上门服务预约智能引擎 - 区域距离模型
// ==========================================
// 职责: 区域编码 → 距离（公里）
// 规则:
// - 相同区域编码距离恒为 0
// - 未登记坐标的区域返回 None，由调用方决定保守策略
// ==========================================

use crate::domain::types::LocationKey;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 地球平均半径（公里）
const EARTH_RADIUS_KM: f64 = 6371.0088;

pub trait DistanceModel: Send + Sync {
    /// 两个区域之间的距离（公里）
    fn distance_km(&self, from: &str, to: &str) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// 大圆距离（haversine）
    pub fn haversine_km(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }
}

// ==========================================
// LocationDirectory - 区域坐标目录
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct LocationDirectory {
    points: HashMap<LocationKey, GeoPoint>,
}

impl LocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<LocationKey>, point: GeoPoint) {
        self.points.insert(location.into(), point);
    }

    pub fn with_point(mut self, location: impl Into<LocationKey>, point: GeoPoint) -> Self {
        self.insert(location, point);
        self
    }

    pub fn get(&self, location: &str) -> Option<&GeoPoint> {
        self.points.get(location)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 从 location_point 表加载
    pub fn load(conn: &Connection) -> rusqlite::Result<Self> {
        let mut stmt = conn.prepare("SELECT location, lat, lon FROM location_point")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                GeoPoint::new(row.get(1)?, row.get(2)?),
            ))
        })?;

        let mut directory = Self::new();
        for row in rows {
            let (location, point) = row?;
            directory.insert(location, point);
        }
        Ok(directory)
    }
}

impl DistanceModel for LocationDirectory {
    fn distance_km(&self, from: &str, to: &str) -> Option<f64> {
        if from == to {
            return Some(0.0);
        }
        let a = self.points.get(from)?;
        let b = self.points.get(to)?;
        Some(a.haversine_km(b))
    }
}
