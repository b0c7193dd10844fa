//! 动画轨道
//!
//! 存储单个骨骼 / Morph / 开关的所有关键帧，并提供查找和插值功能。
//! 轨道构建后只读，可被多个动作实例共享；查找位置的缓存放在
//! 实例持有的 KeyframeCursor 里。

use glam::{Vec3, Quat};

use super::bezier_curve::{BezierCurveFactory, Curve};
use super::keyframe::{
    BoneKeyframe, BoneKeyframeInterpolation, MorphKeyframe, RawBoneKeyframe, SwitchKeyframe, Timed,
};
use crate::{MmdError, Result};

// ============================================================================
// 查找
// ============================================================================

/// 关键帧查找游标
///
/// 记录上一次使用的区间起点，连续播放时从这里向后扫描
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyframeCursor {
    last_key: usize,
}

impl KeyframeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn last_key(&self) -> usize {
        self.last_key
    }

    #[inline]
    pub fn reset(&mut self) {
        self.last_key = 0;
    }
}

/// 查找包含 frame 的关键帧区间 (k1, k2)
///
/// frame 不小于游标处关键帧时从游标向后扫描，否则从头扫描到游标。
/// 调用方保证 keys 非空，frame 已钳制到最后一个关键帧。
pub(crate) fn search_bracket<K: Timed>(keys: &[K], frame: f32, cursor: &mut KeyframeCursor) -> (usize, usize) {
    let n = keys.len();
    let last = cursor.last_key.min(n - 1);
    let mut k2 = 0;

    let range = if frame >= keys[last].frame() { last..n } else { 0..last + 1 };
    for i in range {
        if frame <= keys[i].frame() {
            k2 = i;
            break;
        }
    }

    let k2 = k2.min(n - 1);
    let k1 = if k2 <= 1 { 0 } else { k2 - 1 };
    cursor.last_key = k1;
    (k1, k2)
}

/// 钳制到最后一个关键帧
#[inline]
fn clamp_frame<K: Timed>(keys: &[K], frame: f32) -> f32 {
    let last = keys[keys.len() - 1].frame();
    if frame > last { last } else { frame }
}

/// 按时间稳定排序，同一时间的关键帧保持输入顺序
fn sort_keys<K: Timed>(keys: &mut [K]) {
    keys.sort_by(|a, b| a.frame().total_cmp(&b.frame()));
}

// ============================================================================
// 轨道接口
// ============================================================================

/// 骨骼帧变换结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneFrameTransform {
    /// 平移
    pub translation: Vec3,
    /// 旋转
    pub orientation: Quat,
}

impl Default for BoneFrameTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

/// 动画轨道 trait
pub trait MotionTrack {
    type Frame;

    /// 求值指定帧
    ///
    /// `wrap_first` 为 true 时（循环回绕后），第一个关键帧的值
    /// 用最后一个关键帧的值代替，保证回绕处连续
    fn seek(&self, frame: f32, cursor: &mut KeyframeCursor, wrap_first: bool) -> Self::Frame;

    /// 轨道名称（骨骼名或 Morph 名）
    fn name(&self) -> &str;

    /// 关键帧数量
    fn len(&self) -> usize;

    /// 是否为空（构建成功的轨道总是非空）
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 最后一个关键帧的时间
    fn max_frame(&self) -> f32;
}

// ============================================================================
// 骨骼轨道
// ============================================================================

/// 骨骼动画轨道
#[derive(Debug, Clone)]
pub struct BoneMotionTrack {
    name: String,
    keyframes: Vec<BoneKeyframe>,
}

impl BoneMotionTrack {
    /// 从输入数据构建，插值曲线通过工厂共享
    pub fn build(
        name: impl Into<String>,
        mut raw: Vec<RawBoneKeyframe>,
        table_size: usize,
        factory: &dyn BezierCurveFactory,
    ) -> Result<Self> {
        let name = name.into();
        if raw.is_empty() {
            return Err(MmdError::EmptyTrack(name));
        }
        sort_keys(&mut raw);
        let keyframes = raw
            .into_iter()
            .map(|k| BoneKeyframe {
                frame: k.frame,
                translation: k.translation,
                orientation: k.orientation.normalize(),
                interpolation: BoneKeyframeInterpolation::build(&k.interpolation, table_size, factory),
            })
            .collect();
        Ok(Self { name, keyframes })
    }

    pub fn keyframes(&self) -> &[BoneKeyframe] {
        &self.keyframes
    }
}

impl MotionTrack for BoneMotionTrack {
    type Frame = BoneFrameTransform;

    fn seek(&self, frame: f32, cursor: &mut KeyframeCursor, wrap_first: bool) -> Self::Frame {
        let keys = &self.keyframes;
        let frame = clamp_frame(keys, frame);
        let (k1, k2) = search_bracket(keys, frame, cursor);

        let last = &keys[keys.len() - 1];
        let (time1, time2) = (keys[k1].frame, keys[k2].frame);
        let (mut pos1, mut rot1) = (keys[k1].translation, keys[k1].orientation);
        let (mut pos2, mut rot2) = (keys[k2].translation, keys[k2].orientation);

        if wrap_first {
            if k1 == 0 || time1 == 0.0 {
                pos1 = last.translation;
                rot1 = last.orientation;
            }
            if k2 == 0 || time2 == 0.0 {
                pos2 = last.translation;
                rot2 = last.orientation;
            }
        }

        if time1 == time2 {
            return BoneFrameTransform { translation: pos1, orientation: rot1 };
        }
        if frame <= time1 {
            return BoneFrameTransform { translation: pos1, orientation: rot1 };
        }
        if frame >= time2 {
            return BoneFrameTransform { translation: pos2, orientation: rot2 };
        }

        // 插值曲线取区间终点关键帧
        let ip = &keys[k2].interpolation;
        let w = (frame - time1) / (time2 - time1);
        let lerp = |a: f32, b: f32, t: f32| a * (1.0 - t) + b * t;
        let translation = Vec3::new(
            lerp(pos1.x, pos2.x, ip.translation_x.value(w)),
            lerp(pos1.y, pos2.y, ip.translation_y.value(w)),
            lerp(pos1.z, pos2.z, ip.translation_z.value(w)),
        );
        let orientation = rot1.slerp(rot2, ip.orientation.value(w));
        BoneFrameTransform { translation, orientation }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.keyframes.len()
    }

    fn max_frame(&self) -> f32 {
        self.keyframes.last().map(|k| k.frame).unwrap_or(0.0)
    }
}

// ============================================================================
// Morph 轨道
// ============================================================================

/// Morph 动画轨道
#[derive(Debug, Clone)]
pub struct MorphMotionTrack {
    name: String,
    keyframes: Vec<MorphKeyframe>,
}

impl MorphMotionTrack {
    pub fn build(name: impl Into<String>, mut keyframes: Vec<MorphKeyframe>) -> Result<Self> {
        let name = name.into();
        if keyframes.is_empty() {
            return Err(MmdError::EmptyTrack(name));
        }
        sort_keys(&mut keyframes);
        Ok(Self { name, keyframes })
    }

    pub fn keyframes(&self) -> &[MorphKeyframe] {
        &self.keyframes
    }
}

impl MotionTrack for MorphMotionTrack {
    type Frame = f32;

    fn seek(&self, frame: f32, cursor: &mut KeyframeCursor, wrap_first: bool) -> f32 {
        let keys = &self.keyframes;
        let frame = clamp_frame(keys, frame);
        let (k1, k2) = search_bracket(keys, frame, cursor);

        let last_weight = keys[keys.len() - 1].weight;
        let (time1, time2) = (keys[k1].frame, keys[k2].frame);
        let (mut weight1, mut weight2) = (keys[k1].weight, keys[k2].weight);

        if wrap_first {
            if k1 == 0 || time1 == 0.0 {
                weight1 = last_weight;
            }
            if k2 == 0 || time2 == 0.0 {
                weight2 = last_weight;
            }
        }

        if time1 == time2 {
            return weight1;
        }
        let w = (frame - time1) / (time2 - time1);
        let toggles = (weight1 == 0.0 && weight2 == 1.0) || (weight1 == 1.0 && weight2 == 0.0);
        if time2 - time1 <= 1.0 && toggles {
            // 相邻帧 0/1 切换不做插值
            if w <= 0.5 { weight1 } else { weight2 }
        } else {
            weight1 * (1.0 - w) + weight2 * w
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.keyframes.len()
    }

    fn max_frame(&self) -> f32 {
        self.keyframes.last().map(|k| k.frame).unwrap_or(0.0)
    }
}

// ============================================================================
// 开关轨道
// ============================================================================

/// 显示 / IK 开关轨道
#[derive(Debug, Clone)]
pub struct SwitchMotionTrack {
    keyframes: Vec<SwitchKeyframe>,
}

impl SwitchMotionTrack {
    pub fn build(mut keyframes: Vec<SwitchKeyframe>) -> Result<Self> {
        if keyframes.is_empty() {
            return Err(MmdError::EmptyTrack("switch".to_string()));
        }
        sort_keys(&mut keyframes);
        Ok(Self { keyframes })
    }

    /// 取当前生效的开关关键帧：恰好落在下一个关键帧上时取它，否则取前一个
    pub fn seek(&self, frame: f32, cursor: &mut KeyframeCursor) -> &SwitchKeyframe {
        let keys = &self.keyframes;
        let frame = clamp_frame(keys, frame);
        let (k1, k2) = search_bracket(keys, frame, cursor);
        if keys[k1].frame != keys[k2].frame && keys[k2].frame == frame {
            &keys[k2]
        } else {
            &keys[k1]
        }
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn max_frame(&self) -> f32 {
        self.keyframes.last().map(|k| k.frame).unwrap_or(0.0)
    }
}
