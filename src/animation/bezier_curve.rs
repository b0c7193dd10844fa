//! 贝塞尔曲线
//!
//! 用于 VMD 关键帧的非线性插值。曲线从 (0,0) 到 (1,1)，
//! 两个控制点决定缓动形状；运行时查预计算表，不再解方程。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use glam::Vec2;

/// Newton 迭代次数
const NEWTON_ITERATIONS: usize = 8;
/// Newton 收敛阈值
const NEWTON_EPSILON: f32 = 1e-4;
/// 导数过小视为失败，改用二分
const MIN_DERIVATIVE: f32 = 1e-6;
/// 二分次数上限
const BISECTION_ITERATIONS: usize = 32;

/// 曲线 trait
pub trait Curve {
    fn value(&self, v: f32) -> f32;
}

/// 三次贝塞尔缓动曲线
#[derive(Debug, Clone, PartialEq)]
pub struct BezierCurve {
    /// 预计算的缓动值，长度 size + 1
    table: Vec<f32>,
    /// 控制点1
    c0: Vec2,
    /// 控制点2
    c1: Vec2,
    /// 控制点在对角线上，直接线性插值
    linear: bool,
}

/// 参数方程 B(t)，端点固定为 0 和 1
#[inline]
fn ipfunc(t: f32, p1: f32, p2: f32) -> f32 {
    (1.0 + 3.0 * p1 - 3.0 * p2) * t * t * t + (3.0 * p2 - 6.0 * p1) * t * t + 3.0 * p1 * t
}

/// B'(t)
#[inline]
fn ipfunc_d(t: f32, p1: f32, p2: f32) -> f32 {
    (3.0 + 9.0 * p1 - 9.0 * p2) * t * t + (6.0 * p2 - 12.0 * p1) * t + 3.0 * p1
}

impl BezierCurve {
    /// 创建新的贝塞尔曲线
    ///
    /// # 参数
    /// - `c0`: 控制点1 (归一化到 0-1 范围)
    /// - `c1`: 控制点2 (归一化到 0-1 范围)
    /// - `size`: 插值表采样数
    pub fn new(c0: Vec2, c1: Vec2, size: usize) -> Self {
        let size = size.max(2);
        let linear = c0.x == c0.y && c1.x == c1.y;
        let mut table = Vec::with_capacity(size + 1);
        if !linear {
            for d in 0..size {
                let x = d as f32 / size as f32;
                let t = Self::solve_parameter(x, c0.x, c1.x);
                table.push(ipfunc(t, c0.y, c1.y));
            }
            table.push(1.0);
        }
        Self { table, c0, c1, linear }
    }

    /// 从 VMD 参数创建贝塞尔曲线
    ///
    /// VMD 使用 [0, 127] 范围的控制点参数: [x1, y1, x2, y2]
    pub fn from_parameters(parameters: [u8; 4], size: usize) -> Self {
        let c0 = Vec2::new(parameters[0] as f32 / 127.0, parameters[1] as f32 / 127.0);
        let c1 = Vec2::new(parameters[2] as f32 / 127.0, parameters[3] as f32 / 127.0);
        Self::new(c0, c1, size)
    }

    /// 导出为 VMD 参数格式
    pub fn to_parameters(&self) -> [u8; 4] {
        [
            (self.c0.x * 127.0).round() as u8,
            (self.c0.y * 127.0).round() as u8,
            (self.c1.x * 127.0).round() as u8,
            (self.c1.y * 127.0).round() as u8,
        ]
    }

    #[inline]
    pub fn is_linear(&self) -> bool {
        self.linear
    }

    /// 求解 B_x(t) = x 的参数 t
    ///
    /// 先做 8 次 Newton 迭代，不收敛或导数接近 0 时在 [0,1] 上二分。
    fn solve_parameter(x: f32, x1: f32, x2: f32) -> f32 {
        let mut t = x;
        for _ in 0..NEWTON_ITERATIONS {
            let v = ipfunc(t, x1, x2) - x;
            if v.abs() < NEWTON_EPSILON {
                return t;
            }
            let d = ipfunc_d(t, x1, x2);
            if d.abs() < MIN_DERIVATIVE {
                break;
            }
            t -= v / d;
        }

        // B_x 在 [0,1] 上单调（控制点 x 分量在 [0,1] 内），二分必然收敛
        let (mut lo, mut hi) = (0.0f32, 1.0f32);
        t = 0.5;
        for _ in 0..BISECTION_ITERATIONS {
            let v = ipfunc(t, x1, x2) - x;
            if v.abs() < NEWTON_EPSILON {
                break;
            }
            if v < 0.0 {
                lo = t;
            } else {
                hi = t;
            }
            t = (lo + hi) * 0.5;
        }
        t
    }
}

impl Curve for BezierCurve {
    /// 线性时间比例 -> 缓动比例
    ///
    /// 在插值表相邻两项之间线性插值
    fn value(&self, v: f32) -> f32 {
        if self.linear {
            return v;
        }
        let size = self.table.len() - 1;
        let pos = v.clamp(0.0, 1.0) * size as f32;
        let idx = (pos as usize).min(size - 1);
        let a = self.table[idx];
        let b = self.table[idx + 1];
        a + (b - a) * (pos - idx as f32)
    }
}

/// 贝塞尔曲线工厂 trait
pub trait BezierCurveFactory {
    fn get_or_new(&self, parameters: [u8; 4], size: usize) -> Arc<BezierCurve>;
}

/// 曲线缓存键
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
struct CurveCacheKey {
    parameters: [u8; 4],
    size: usize,
}

/// 贝塞尔曲线缓存
///
/// 相同控制点的曲线只构建一次，所有关键帧共享同一张表
#[derive(Debug)]
pub struct BezierCurveCache(RwLock<HashMap<CurveCacheKey, Arc<BezierCurve>>>);

impl BezierCurveCache {
    pub fn new() -> Self {
        Self(RwLock::new(HashMap::new()))
    }

    /// 已缓存的曲线数量
    pub fn len(&self) -> usize {
        self.0.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BezierCurveCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BezierCurveFactory for BezierCurveCache {
    fn get_or_new(&self, parameters: [u8; 4], size: usize) -> Arc<BezierCurve> {
        let key = CurveCacheKey { parameters, size };
        let build_new_curve = || Arc::new(BezierCurve::from_parameters(parameters, size));

        // 尝试读取缓存
        match self.0.read() {
            Ok(map) => {
                if let Some(curve) = map.get(&key) {
                    return curve.clone();
                }
            }
            Err(_) => return build_new_curve(),
        };

        // 写入缓存
        match self.0.write() {
            Ok(mut map) => map.entry(key).or_insert_with(build_new_curve).clone(),
            Err(_) => build_new_curve(),
        }
    }
}

impl Clone for BezierCurveCache {
    fn clone(&self) -> Self {
        // 克隆时创建新的空缓存
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_curve() {
        // 对角线控制点 -> 线性
        let curve = BezierCurve::from_parameters([20, 20, 107, 107], 256);
        assert!(curve.is_linear());
        assert_eq!(curve.value(0.3), 0.3);
        assert_eq!(curve.value(0.75), 0.75);
    }

    #[test]
    fn test_endpoints() {
        let curve = BezierCurve::new(Vec2::new(0.42, 0.0), Vec2::new(0.58, 1.0), 256);
        assert!(!curve.is_linear());
        assert!(curve.value(0.0).abs() < 1e-3);
        assert!((curve.value(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ease_in_curve() {
        let curve = BezierCurve::new(Vec2::new(0.42, 0.0), Vec2::new(1.0, 1.0), 256);
        // Ease-in 在开始时较慢
        assert!(curve.value(0.25) < 0.25);
        // 单调不减
        let mut prev = 0.0;
        for i in 0..=100 {
            let v = curve.value(i as f32 / 100.0);
            assert!(v + 1e-3 >= prev);
            prev = v;
        }
    }

    #[test]
    fn test_symmetric_ease_midpoint() {
        // 对称缓动曲线在中点取 0.5
        let curve = BezierCurve::new(Vec2::new(0.42, 0.0), Vec2::new(0.58, 1.0), 256);
        assert!((curve.value(0.5) - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_steep_control_points_fall_back() {
        // x 控制点极端时 Newton 容易失败，二分保证结果落在 [0,1]
        let curve = BezierCurve::from_parameters([127, 0, 0, 127], 64);
        for i in 0..=64 {
            let v = curve.value(i as f32 / 64.0);
            assert!(v.is_finite());
            assert!((-1e-3..=1.0 + 1e-3).contains(&v));
        }
    }

    #[test]
    fn test_parameters_roundtrip() {
        let curve = BezierCurve::from_parameters([10, 30, 90, 120], 64);
        assert_eq!(curve.to_parameters(), [10, 30, 90, 120]);
    }

    #[test]
    fn test_cache() {
        let cache = BezierCurveCache::new();

        let curve1 = cache.get_or_new([32, 10, 96, 110], 256);
        let curve2 = cache.get_or_new([32, 10, 96, 110], 256);

        // 应该返回相同的 Arc
        assert!(Arc::ptr_eq(&curve1, &curve2));
        assert_eq!(cache.len(), 1);
    }
}
