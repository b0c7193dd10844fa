//! 动作数据
//!
//! 解析层逐个插入关键帧，MotionBuilder 按骨骼 / Morph 名分组，
//! build 时排序并生成只读轨道。构建好的 Motion 通过 Arc 共享给所有实例。

use std::collections::HashMap;
use std::sync::Arc;

use super::bezier_curve::{BezierCurveCache, BezierCurveFactory};
use super::keyframe::{MorphKeyframe, RawBoneKeyframe, SwitchKeyframe};
use super::motion_track::{BoneMotionTrack, MorphMotionTrack, MotionTrack, SwitchMotionTrack};
use crate::config::get_config;
use crate::Result;

/// 只读动作数据
#[derive(Debug, Clone)]
pub struct Motion {
    pub name: String,
    pub bone_tracks: Vec<BoneMotionTrack>,
    pub morph_tracks: Vec<MorphMotionTrack>,
    pub switch_track: Option<SwitchMotionTrack>,
    max_frame: f32,
}

impl Motion {
    /// 最后一个关键帧的时间（所有轨道中的最大值）
    #[inline]
    pub fn max_frame(&self) -> f32 {
        self.max_frame
    }

    pub fn find_bone_track(&self, name: &str) -> Option<&BoneMotionTrack> {
        self.bone_tracks.iter().find(|t| t.name() == name)
    }

    pub fn find_morph_track(&self, name: &str) -> Option<&MorphMotionTrack> {
        self.morph_tracks.iter().find(|t| t.name() == name)
    }
}

/// 动作构建器
#[derive(Debug, Default)]
pub struct MotionBuilder {
    name: String,
    /// 保持首次出现的顺序
    bone_order: Vec<String>,
    bone_keyframes: HashMap<String, Vec<RawBoneKeyframe>>,
    morph_order: Vec<String>,
    morph_keyframes: HashMap<String, Vec<MorphKeyframe>>,
    switch_keyframes: Vec<SwitchKeyframe>,
}

impl MotionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// 插入骨骼关键帧
    pub fn insert_bone_keyframe(&mut self, bone_name: &str, keyframe: RawBoneKeyframe) -> &mut Self {
        if !self.bone_keyframes.contains_key(bone_name) {
            self.bone_order.push(bone_name.to_string());
        }
        self.bone_keyframes.entry(bone_name.to_string()).or_default().push(keyframe);
        self
    }

    /// 插入 Morph 关键帧
    pub fn insert_morph_keyframe(&mut self, morph_name: &str, keyframe: MorphKeyframe) -> &mut Self {
        if !self.morph_keyframes.contains_key(morph_name) {
            self.morph_order.push(morph_name.to_string());
        }
        self.morph_keyframes.entry(morph_name.to_string()).or_default().push(keyframe);
        self
    }

    /// 插入显示 / IK 开关关键帧
    pub fn insert_switch_keyframe(&mut self, keyframe: SwitchKeyframe) -> &mut Self {
        self.switch_keyframes.push(keyframe);
        self
    }

    /// 使用给定的曲线工厂构建
    pub fn build_with(self, factory: &dyn BezierCurveFactory) -> Result<Arc<Motion>> {
        let table_size = get_config().interpolation_table_size;
        let mut bone_keyframes = self.bone_keyframes;
        let mut morph_keyframes = self.morph_keyframes;

        let mut bone_tracks = Vec::with_capacity(self.bone_order.len());
        for name in self.bone_order {
            let raw = bone_keyframes.remove(&name).unwrap_or_default();
            bone_tracks.push(BoneMotionTrack::build(name, raw, table_size, factory)?);
        }

        let mut morph_tracks = Vec::with_capacity(self.morph_order.len());
        for name in self.morph_order {
            let raw = morph_keyframes.remove(&name).unwrap_or_default();
            morph_tracks.push(MorphMotionTrack::build(name, raw)?);
        }

        let switch_track = if self.switch_keyframes.is_empty() {
            None
        } else {
            Some(SwitchMotionTrack::build(self.switch_keyframes)?)
        };

        let max_frame = bone_tracks
            .iter()
            .map(|t| t.max_frame())
            .chain(morph_tracks.iter().map(|t| t.max_frame()))
            .chain(switch_track.iter().map(|t| t.max_frame()))
            .fold(0.0f32, f32::max);

        log::debug!(
            "motion '{}' built: {} bone tracks, {} morph tracks, max frame {}",
            self.name, bone_tracks.len(), morph_tracks.len(), max_frame
        );

        Ok(Arc::new(Motion {
            name: self.name,
            bone_tracks,
            morph_tracks,
            switch_track,
            max_frame,
        }))
    }

    /// 使用独立缓存构建
    pub fn build(self) -> Result<Arc<Motion>> {
        let cache = BezierCurveCache::new();
        self.build_with(&cache)
    }
}
