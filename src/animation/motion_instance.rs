//! 动作实例
//!
//! 一个 Motion 在一个模型上的播放状态：每条轨道对应的骨骼 / Morph、
//! 查找游标、开始时的姿势快照、当前帧与混合系数。
//! 多个实例共享同一个只读 Motion。

use std::sync::Arc;
use glam::{Vec3, Quat};

use super::motion::Motion;
use super::motion_track::{BoneFrameTransform, KeyframeCursor, MotionTrack};
use crate::config::get_config;
use crate::morph::MorphManager;
use crate::skeleton::BoneSet;
use crate::{MmdError, Result};

/// 中心骨骼名，有多个关键帧时切换动作需要重定位
pub const CENTER_BONE_NAME: &str = "センター";

// ============================================================================
// 配置键
// ============================================================================

pub const CONFIGURE_KEY_BONE_REPLACE: &str = "MODE_BONE_REPLACE";
pub const CONFIGURE_KEY_BONE_ADD: &str = "MODE_BONE_ADD";
pub const CONFIGURE_KEY_BONE_NONE: &str = "MODE_BONE_NONE";
pub const CONFIGURE_KEY_FACE_REPLACE: &str = "MODE_FACE_REPLACE";
pub const CONFIGURE_KEY_FACE_ADD: &str = "MODE_FACE_ADD";
pub const CONFIGURE_KEY_FACE_MUL: &str = "MODE_FACE_MUL";
pub const CONFIGURE_KEY_FACE_NONE: &str = "MODE_FACE_NONE";
pub const CONFIGURE_KEY_REPLACE: &str = "MODE_REPLACE";
pub const CONFIGURE_KEY_ADD: &str = "MODE_ADD";
pub const CONFIGURE_KEY_MUL: &str = "MODE_MUL";
pub const CONFIGURE_KEY_BLEND_RATE: &str = "BLEND_RATE";

/// 轨道结果的应用方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MotionOp {
    /// 按混合系数替换
    #[default]
    Replace,
    /// 叠加到当前值
    Add,
    /// 只对 Morph 权重有效：f + (1 - f) * w
    Multiply,
    /// 不应用
    None,
}

/// 动作写入的目标
pub struct MotionTarget<'a> {
    pub bones: &'a mut BoneSet,
    pub morphs: &'a mut MorphManager,
    /// 模型显示开关
    pub visible: &'a mut bool,
}

// ============================================================================
// 轨道元素
// ============================================================================

#[derive(Clone, Debug)]
struct BoneElement {
    bone: usize,
    track: usize,
    cursor: KeyframeCursor,
    value: BoneFrameTransform,
    snap: BoneFrameTransform,
    looped: bool,
    op: MotionOp,
    op_rate: f32,
}

#[derive(Clone, Debug)]
struct MorphElement {
    morph: usize,
    track: usize,
    cursor: KeyframeCursor,
    weight: f32,
    snap_weight: f32,
    looped: bool,
    op: MotionOp,
    op_rate: f32,
}

// ============================================================================
// 动作实例
// ============================================================================

/// 动作实例
#[derive(Clone, Debug)]
pub struct MotionInstance {
    motion: Arc<Motion>,
    bone_elements: Vec<BoneElement>,
    morph_elements: Vec<MorphElement>,
    switch_cursor: Option<KeyframeCursor>,
    has_center: bool,
    max_frame: f32,

    current_frame: f32,
    previous_frame: f32,
    bone_blend_rate: f32,
    face_blend_rate: f32,
    ignore_single_motion: bool,

    /// 已拍快照，开头与循环处从快照过渡
    override_first: bool,
    no_bone_smear_frame: f32,
    no_face_smear_frame: f32,
    bone_start_margin: f32,
    face_start_margin: f32,
}

impl MotionInstance {
    /// 把动作轨道绑定到模型的骨骼和 Morph，找不到的轨道跳过
    pub fn new(motion: Arc<Motion>, bones: &BoneSet, morphs: &MorphManager) -> Self {
        let config = get_config();
        let mut has_center = false;

        let mut bone_elements = Vec::with_capacity(motion.bone_tracks.len());
        for (track_idx, track) in motion.bone_tracks.iter().enumerate() {
            let Some(bone) = bones.find_bone_by_name(track.name()) else {
                log::debug!("motion '{}': no bone named '{}', track skipped", motion.name, track.name());
                continue;
            };
            if track.len() > 1 && track.name() == CENTER_BONE_NAME {
                has_center = true;
            }
            bone_elements.push(BoneElement {
                bone,
                track: track_idx,
                cursor: KeyframeCursor::new(),
                value: BoneFrameTransform::default(),
                snap: BoneFrameTransform::default(),
                looped: false,
                op: MotionOp::Replace,
                op_rate: 1.0,
            });
        }

        let mut morph_elements = Vec::with_capacity(motion.morph_tracks.len());
        for (track_idx, track) in motion.morph_tracks.iter().enumerate() {
            let Some(morph) = morphs.find_morph_by_name(track.name()) else {
                log::debug!("motion '{}': no morph named '{}', track skipped", motion.name, track.name());
                continue;
            };
            morph_elements.push(MorphElement {
                morph,
                track: track_idx,
                cursor: KeyframeCursor::new(),
                weight: 0.0,
                snap_weight: 0.0,
                looped: false,
                op: MotionOp::Replace,
                op_rate: 1.0,
            });
        }

        let switch_cursor = motion.switch_track.as_ref().map(|_| KeyframeCursor::new());
        let max_frame = motion.max_frame();

        Self {
            motion,
            bone_elements,
            morph_elements,
            switch_cursor,
            has_center,
            max_frame,
            current_frame: 0.0,
            previous_frame: 0.0,
            bone_blend_rate: 1.0,
            face_blend_rate: 1.0,
            ignore_single_motion: false,
            override_first: false,
            no_bone_smear_frame: 0.0,
            no_face_smear_frame: 0.0,
            bone_start_margin: config.bone_start_margin_frames,
            face_start_margin: config.face_start_margin_frames,
        }
    }

    // ========================================
    // 访问器
    // ========================================

    pub fn motion(&self) -> &Arc<Motion> {
        &self.motion
    }

    #[inline]
    pub fn max_frame(&self) -> f32 {
        self.max_frame
    }

    #[inline]
    pub fn current_frame(&self) -> f32 {
        self.current_frame
    }

    pub fn set_current_frame(&mut self, frame: f32) {
        self.current_frame = frame;
    }

    #[inline]
    pub fn previous_frame(&self) -> f32 {
        self.previous_frame
    }

    /// 中心骨骼有多个关键帧
    #[inline]
    pub fn has_center(&self) -> bool {
        self.has_center
    }

    /// 绑定成功的骨骼轨道数
    pub fn bone_count(&self) -> usize {
        self.bone_elements.len()
    }

    /// 绑定成功的 Morph 轨道数
    pub fn morph_count(&self) -> usize {
        self.morph_elements.len()
    }

    pub fn set_bone_blend_rate(&mut self, rate: f32) {
        self.bone_blend_rate = rate;
    }

    pub fn set_face_blend_rate(&mut self, rate: f32) {
        self.face_blend_rate = rate;
    }

    pub fn set_ignore_single_motion(&mut self, ignore: bool) {
        self.ignore_single_motion = ignore;
    }

    // ========================================
    // 播放控制
    // ========================================

    /// 回到初始状态
    pub fn reset(&mut self) {
        for e in &mut self.bone_elements {
            e.cursor.reset();
        }
        for e in &mut self.morph_elements {
            e.cursor.reset();
        }
        if let Some(cursor) = &mut self.switch_cursor {
            cursor.reset();
        }
        self.current_frame = 0.0;
        self.previous_frame = 0.0;
        self.no_bone_smear_frame = 0.0;
        self.no_face_smear_frame = 0.0;
        self.bone_blend_rate = 1.0;
        self.face_blend_rate = 1.0;
        self.ignore_single_motion = false;
        self.override_first = false;
        self.set_looped_flags(false);
    }

    /// 应用当前帧后前进 delta 帧，到达末尾返回 true（帧钳制到末尾）
    pub fn advance(&mut self, delta: f32, target: &mut MotionTarget<'_>) -> bool {
        self.control(self.current_frame, target);

        if self.no_bone_smear_frame > 0.0 {
            self.no_bone_smear_frame = (self.no_bone_smear_frame - delta).max(0.0);
        }
        if self.no_face_smear_frame > 0.0 {
            self.no_face_smear_frame = (self.no_face_smear_frame - delta).max(0.0);
        }

        self.previous_frame = self.current_frame;
        self.current_frame += delta;
        if self.current_frame >= self.max_frame {
            self.current_frame = self.max_frame;
            return true;
        }
        false
    }

    /// 循环回到 target_frame，frame 为本次前进量，超出末尾的部分保留
    pub fn rewind(&mut self, target_frame: f32, frame: f32) {
        self.current_frame = self.previous_frame + frame - self.max_frame + target_frame;
        self.previous_frame = target_frame;
        if self.override_first {
            // 回绕后首帧用末帧的值
            self.set_looped_flags(true);
        }
    }

    /// 拍下当前姿势，开头从快照过渡
    ///
    /// center_offset 为中心重定位时的偏移，从不受其他骨骼影响的骨骼快照中扣除
    pub fn set_override_first(&mut self, center_offset: Option<Vec3>, bones: &BoneSet, morphs: &MorphManager) {
        self.take_snap(center_offset, bones, morphs);
        self.set_looped_flags(false);
        self.override_first = true;
        self.no_bone_smear_frame = self.bone_start_margin;
        self.no_face_smear_frame = self.face_start_margin;
    }

    fn take_snap(&mut self, center_offset: Option<Vec3>, bones: &BoneSet, morphs: &MorphManager) {
        for e in &mut self.bone_elements {
            let Some(bone) = bones.get_bone(e.bone) else { continue };
            let mut translation = bone.animation_translate;
            if let Some(offset) = center_offset {
                if bone.has_motion_independency() {
                    translation -= offset;
                }
            }
            e.snap = BoneFrameTransform { translation, orientation: bone.animation_rotate };
        }
        for e in &mut self.morph_elements {
            e.snap_weight = morphs.get_morph_weight(e.morph);
        }
    }

    fn set_looped_flags(&mut self, looped: bool) {
        for e in &mut self.bone_elements {
            e.looped = looped;
        }
        for e in &mut self.morph_elements {
            e.looped = looped;
        }
    }

    fn set_op_rate(&mut self, rate: f32) {
        for e in &mut self.bone_elements {
            e.op_rate = rate;
        }
        for e in &mut self.morph_elements {
            e.op_rate = rate;
        }
    }

    // ========================================
    // 配置
    // ========================================

    /// 修改轨道的应用方式
    ///
    /// 单轨道键的值为逗号分隔的轨道名，返回是否有轨道匹配；
    /// 全局键的值可选，为操作系数
    pub fn configure(&mut self, key: &str, value: &str) -> Result<bool> {
        let value = value.trim();
        let parse_rate = |v: &str| -> Result<f32> {
            v.parse::<f32>().map_err(|_| MmdError::InvalidConfigureValue {
                key: key.to_string(),
                value: v.to_string(),
            })
        };

        let global = match key {
            CONFIGURE_KEY_BLEND_RATE => {
                if value.is_empty() {
                    return Err(MmdError::InvalidConfigureValue { key: key.to_string(), value: String::new() });
                }
                self.set_op_rate(parse_rate(value)?);
                return Ok(true);
            }
            CONFIGURE_KEY_REPLACE => Some((MotionOp::Replace, MotionOp::Replace)),
            CONFIGURE_KEY_ADD => Some((MotionOp::Add, MotionOp::Add)),
            // 骨骼不支持乘算，保持替换
            CONFIGURE_KEY_MUL => Some((MotionOp::Replace, MotionOp::Multiply)),
            _ => None,
        };
        if let Some((bone_op, face_op)) = global {
            if !value.is_empty() {
                self.set_op_rate(parse_rate(value)?);
            }
            for e in &mut self.bone_elements {
                e.op = bone_op;
            }
            for e in &mut self.morph_elements {
                e.op = face_op;
            }
            return Ok(true);
        }

        let (is_bone, op) = match key {
            CONFIGURE_KEY_BONE_REPLACE => (true, MotionOp::Replace),
            CONFIGURE_KEY_BONE_ADD => (true, MotionOp::Add),
            CONFIGURE_KEY_BONE_NONE => (true, MotionOp::None),
            CONFIGURE_KEY_FACE_REPLACE => (false, MotionOp::Replace),
            CONFIGURE_KEY_FACE_ADD => (false, MotionOp::Add),
            CONFIGURE_KEY_FACE_MUL => (false, MotionOp::Multiply),
            CONFIGURE_KEY_FACE_NONE => (false, MotionOp::None),
            _ => return Err(MmdError::UnknownConfigureKey(key.to_string())),
        };
        if value.is_empty() {
            return Err(MmdError::InvalidConfigureValue { key: key.to_string(), value: String::new() });
        }

        let mut found = false;
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if is_bone {
                for e in &mut self.bone_elements {
                    if self.motion.bone_tracks[e.track].name() == name {
                        e.op = op;
                        found = true;
                    }
                }
            } else {
                for e in &mut self.morph_elements {
                    if self.motion.morph_tracks[e.track].name() == name {
                        e.op = op;
                        found = true;
                    }
                }
            }
        }
        Ok(found)
    }

    // ========================================
    // 求值与应用
    // ========================================

    /// 骨骼开头过渡：当前值向快照靠拢
    #[inline]
    fn bone_smear_weight(&self) -> Option<f32> {
        (self.override_first && self.no_bone_smear_frame > 0.0)
            .then(|| self.no_bone_smear_frame / self.bone_start_margin)
    }

    /// 把指定帧的动作写入目标
    pub fn control(&mut self, frame: f32, target: &mut MotionTarget<'_>) {
        let smear = self.bone_smear_weight();
        let bone_rate = self.bone_blend_rate;
        let face_rate = self.face_blend_rate;

        // 骨骼
        for e in &mut self.bone_elements {
            let track = &self.motion.bone_tracks[e.track];
            let Some(bone) = target.bones.get_bone_mut(e.bone) else { continue };

            if self.ignore_single_motion && track.len() <= 1 {
                if let Some(w) = smear {
                    bone.animation_translate = bone.animation_translate.lerp(e.snap.translation, w);
                    bone.animation_rotate = bone.animation_rotate.slerp(e.snap.orientation, w);
                }
                continue;
            }

            let mut value = track.seek(frame, &mut e.cursor, self.override_first && e.looped);
            if let Some(w) = smear {
                if e.op == MotionOp::Replace {
                    value.translation = value.translation.lerp(e.snap.translation, w);
                    value.orientation = value.orientation.slerp(e.snap.orientation, w);
                }
            }
            if e.op_rate != 1.0 {
                value.translation *= e.op_rate;
                value.orientation = Quat::IDENTITY.slerp(value.orientation, e.op_rate);
            }
            e.value = value;

            match e.op {
                MotionOp::Replace | MotionOp::Multiply => {
                    if bone_rate == 1.0 {
                        bone.animation_translate = value.translation;
                        bone.animation_rotate = value.orientation;
                    } else {
                        bone.animation_translate = bone.animation_translate.lerp(value.translation, bone_rate);
                        bone.animation_rotate = bone.animation_rotate.slerp(value.orientation, bone_rate);
                    }
                }
                MotionOp::Add => {
                    if bone_rate == 1.0 {
                        bone.animation_translate += value.translation;
                        bone.animation_rotate = value.orientation * bone.animation_rotate;
                    } else {
                        bone.animation_translate += value.translation * bone_rate;
                        bone.animation_rotate =
                            Quat::IDENTITY.slerp(value.orientation, bone_rate) * bone.animation_rotate;
                    }
                }
                MotionOp::None => {}
            }
        }

        // Morph，混合系数不受 motion blend rate 影响
        for e in &mut self.morph_elements {
            let track = &self.motion.morph_tracks[e.track];
            if self.ignore_single_motion && track.len() <= 1 {
                continue;
            }

            let mut weight = track.seek(frame, &mut e.cursor, self.override_first && e.looped);
            if self.override_first && self.no_face_smear_frame > 0.0 {
                let margin = self.face_start_margin;
                let smear_frame = match track.keyframes().get(1) {
                    Some(k) => k.frame.min(margin),
                    None => margin,
                };
                if smear_frame > 1.0 {
                    let cur = margin - self.no_face_smear_frame;
                    if cur < smear_frame {
                        let w = cur / smear_frame;
                        weight = weight * w + e.snap_weight * (1.0 - w);
                    }
                }
            }
            if e.op_rate != 1.0 {
                weight *= e.op_rate;
            }
            e.weight = weight;

            let current = target.morphs.get_morph_weight(e.morph);
            let next = match e.op {
                MotionOp::Replace => {
                    if face_rate == 1.0 {
                        weight
                    } else {
                        current * (1.0 - face_rate) + weight * face_rate
                    }
                }
                MotionOp::Add => current + weight * face_rate,
                MotionOp::Multiply => current + (1.0 - current) * weight * face_rate,
                MotionOp::None => continue,
            };
            target.morphs.set_morph_weight(e.morph, next);
        }

        // 显示 / IK 开关
        if let (Some(track), Some(cursor)) = (self.motion.switch_track.as_ref(), self.switch_cursor.as_mut()) {
            if self.ignore_single_motion && track.len() <= 1 {
                return;
            }
            let key = track.seek(frame, cursor);
            *target.visible = key.visible;
            for (name, enabled) in &key.ik_states {
                if let Some(idx) = target.bones.find_bone_by_name(name) {
                    if let Some(bone) = target.bones.get_bone_mut(idx) {
                        bone.set_enable_ik(*enabled);
                    }
                }
            }
        }
    }
}
