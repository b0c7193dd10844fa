//! 关键帧数据
//!
//! Raw* 类型由解析层提供（插值参数仍是 VMD 的 4 字节格式），
//! 构建轨道时转换为共享曲线表的运行时关键帧。

use std::sync::Arc;
use glam::{Vec3, Quat};

use super::bezier_curve::{BezierCurve, BezierCurveFactory};

/// VMD 默认（线性）插值参数
pub const LINEAR_INTERPOLATION: [u8; 4] = [20, 20, 107, 107];

/// 带时间的关键帧
pub trait Timed {
    fn frame(&self) -> f32;
}

// ============================================================================
// 输入数据
// ============================================================================

/// 骨骼关键帧输入
#[derive(Debug, Clone, PartialEq)]
pub struct RawBoneKeyframe {
    pub frame: f32,
    pub translation: Vec3,
    pub orientation: Quat,
    /// X / Y / Z / 旋转 四个通道的控制点 [x1, y1, x2, y2]
    pub interpolation: [[u8; 4]; 4],
}

impl RawBoneKeyframe {
    /// 线性插值的关键帧
    pub fn linear(frame: f32, translation: Vec3, orientation: Quat) -> Self {
        Self {
            frame,
            translation,
            orientation,
            interpolation: [LINEAR_INTERPOLATION; 4],
        }
    }
}

impl Timed for RawBoneKeyframe {
    fn frame(&self) -> f32 {
        self.frame
    }
}

// ============================================================================
// 运行时关键帧
// ============================================================================

/// 骨骼关键帧插值曲线
#[derive(Debug, Clone)]
pub struct BoneKeyframeInterpolation {
    pub translation_x: Arc<BezierCurve>,
    pub translation_y: Arc<BezierCurve>,
    pub translation_z: Arc<BezierCurve>,
    pub orientation: Arc<BezierCurve>,
}

impl BoneKeyframeInterpolation {
    pub fn build(parameters: &[[u8; 4]; 4], size: usize, factory: &dyn BezierCurveFactory) -> Self {
        Self {
            translation_x: factory.get_or_new(parameters[0], size),
            translation_y: factory.get_or_new(parameters[1], size),
            translation_z: factory.get_or_new(parameters[2], size),
            orientation: factory.get_or_new(parameters[3], size),
        }
    }
}

/// 骨骼关键帧
#[derive(Debug, Clone)]
pub struct BoneKeyframe {
    pub frame: f32,
    pub translation: Vec3,
    pub orientation: Quat,
    /// 从上一个关键帧到本关键帧的插值曲线
    pub interpolation: BoneKeyframeInterpolation,
}

impl Timed for BoneKeyframe {
    fn frame(&self) -> f32 {
        self.frame
    }
}

/// Morph 关键帧
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphKeyframe {
    pub frame: f32,
    pub weight: f32,
}

impl MorphKeyframe {
    pub fn new(frame: f32, weight: f32) -> Self {
        Self { frame, weight }
    }
}

impl Timed for MorphKeyframe {
    fn frame(&self) -> f32 {
        self.frame
    }
}

/// 显示 / IK 开关关键帧
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchKeyframe {
    pub frame: f32,
    pub visible: bool,
    /// (IK 骨骼名, 是否启用)
    pub ik_states: Vec<(String, bool)>,
}

impl Timed for SwitchKeyframe {
    fn frame(&self) -> f32 {
        self.frame
    }
}
