//! 动画系统
//!
//! - bezier_curve: 关键帧插值曲线与共享缓存
//! - motion_track: 单条轨道的查找与插值
//! - motion_instance: 一个动作在模型上的播放状态
//! - motion_layer: 多个动作按优先级合成

mod bezier_curve;
mod keyframe;
mod motion;
mod motion_instance;
mod motion_layer;
mod motion_track;

pub use bezier_curve::{BezierCurve, BezierCurveCache, BezierCurveFactory, Curve};
pub use keyframe::{
    BoneKeyframe, BoneKeyframeInterpolation, MorphKeyframe, RawBoneKeyframe, SwitchKeyframe, Timed,
    LINEAR_INTERPOLATION,
};
pub use motion::{Motion, MotionBuilder};
pub use motion_instance::{MotionInstance, MotionOp, MotionTarget, CENTER_BONE_NAME};
pub use motion_instance::{
    CONFIGURE_KEY_ADD, CONFIGURE_KEY_BLEND_RATE, CONFIGURE_KEY_BONE_ADD, CONFIGURE_KEY_BONE_NONE,
    CONFIGURE_KEY_BONE_REPLACE, CONFIGURE_KEY_FACE_ADD, CONFIGURE_KEY_FACE_MUL, CONFIGURE_KEY_FACE_NONE,
    CONFIGURE_KEY_FACE_REPLACE, CONFIGURE_KEY_MUL, CONFIGURE_KEY_REPLACE,
};
pub use motion_layer::{
    AccelerationStatus, MotionEvent, MotionKey, MotionLayer, MotionPlayer, MotionStatus, OnEnd, StartOptions,
};
pub use motion_track::{
    BoneFrameTransform, BoneMotionTrack, KeyframeCursor, MorphMotionTrack, MotionTrack, SwitchMotionTrack,
};

use crate::morph::MorphManager;
use crate::skeleton::{BoneSet, BoneTransform};

/// 合成后的姿势：每个骨骼的动作变换和每个 Morph 的权重
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pose {
    pub bones: Vec<BoneTransform>,
    pub morph_weights: Vec<f32>,
    pub visible: bool,
}

impl Pose {
    pub fn capture(bones: &BoneSet, morphs: &MorphManager, visible: bool) -> Self {
        Self {
            bones: bones.bones().iter().map(BoneTransform::from_bone).collect(),
            morph_weights: morphs.weights(),
            visible,
        }
    }
}
