//! 动作层
//!
//! 按优先级管理多个动作播放器，每帧依次应用（后应用的覆盖先应用的）。
//! 负责开始 / 结束时的平滑过渡、循环、删除和速度渐变。

use std::sync::Arc;
use glam::Vec3;
use slotmap::{new_key_type, SlotMap};

use super::motion::Motion;
use super::motion_instance::{MotionInstance, MotionTarget, CENTER_BONE_NAME};
use super::Pose;
use crate::config::get_config;
use crate::morph::MorphManager;
use crate::skeleton::BoneSet;
use crate::{MmdError, Result};

new_key_type! {
    /// 动作播放器句柄
    pub struct MotionKey;
}

/// 播放到末尾时的行为
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnEnd {
    /// 保持最后的姿势
    Hold,
    /// 回到 loop_at 帧继续
    Loop,
    /// 删除（平滑时先淡出）
    Delete,
}

/// 速度渐变状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccelerationStatus {
    Constant,
    /// 等待到达开始帧
    Waiting,
    Changing,
    /// 本帧刚结束，下一帧回到 Constant
    Ended,
}

/// 本帧播放器状态变化
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionStatus {
    Running,
    Looped,
    Deleted,
}

/// 播放器事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MotionEvent {
    pub name: String,
    pub status: MotionStatus,
}

/// 开始动作的参数
#[derive(Clone, Copy, Debug)]
pub struct StartOptions {
    /// 完整动作：单关键帧轨道也应用，并让未控制的骨骼回到默认姿势
    pub full: bool,
    /// 播放一次后删除，否则循环
    pub once: bool,
    /// 开始和结束时平滑过渡
    pub smooth: bool,
    /// 带中心动作时把模型重定位到当前位置
    pub reposition: bool,
    /// 优先级，越大越后应用
    pub priority: f32,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            full: true,
            once: false,
            smooth: true,
            reposition: true,
            priority: 0.0,
        }
    }
}

// ============================================================================
// 播放器
// ============================================================================

/// 动作播放器
#[derive(Clone, Debug)]
pub struct MotionPlayer {
    pub name: String,
    pub instance: MotionInstance,
    pub on_end: OnEnd,
    pub priority: f32,
    pub ignore_static: bool,
    pub loop_at: f32,
    pub enable_smooth: bool,
    pub enable_repos: bool,
    /// 骨骼混合系数（Morph 不使用）
    pub motion_blend_rate: f32,

    ending_bone_blend_frames: f32,
    ending_face_blend_frames: f32,
    ending_bone_blend: f32,
    ending_face_blend: f32,

    active: bool,
    want_delete: bool,
    status: MotionStatus,

    target_speed_rate: f32,
    current_speed_rate: f32,
    remaining_frames_for_start: f32,
    remaining_frames_for_end: f32,
    acceleration: AccelerationStatus,
}

impl MotionPlayer {
    fn new(name: &str, instance: MotionInstance, options: &StartOptions) -> Self {
        let config = get_config();
        Self {
            name: name.to_string(),
            instance,
            on_end: if options.once { OnEnd::Delete } else { OnEnd::Loop },
            priority: options.priority,
            ignore_static: !options.full,
            loop_at: 0.0,
            enable_smooth: options.smooth,
            enable_repos: options.reposition,
            motion_blend_rate: 1.0,
            ending_bone_blend_frames: config.bone_end_margin_frames,
            ending_face_blend_frames: config.face_end_margin_frames,
            ending_bone_blend: 0.0,
            ending_face_blend: 0.0,
            active: true,
            want_delete: false,
            status: MotionStatus::Running,
            target_speed_rate: 1.0,
            current_speed_rate: 1.0,
            remaining_frames_for_start: -1.0,
            remaining_frames_for_end: -1.0,
            acceleration: AccelerationStatus::Constant,
        }
    }

    /// 是否处于淡出中
    #[inline]
    pub fn is_ending(&self) -> bool {
        self.ending_bone_blend != 0.0 || self.ending_face_blend != 0.0
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn speed_rate(&self) -> f32 {
        self.current_speed_rate
    }

    #[inline]
    pub fn acceleration_status(&self) -> AccelerationStatus {
        self.acceleration
    }

    /// 当前淡出系数 (骨骼, 表情)，未淡出时为 None
    pub fn ending_rates(&self) -> Option<(f32, f32)> {
        self.is_ending().then(|| {
            (
                self.motion_blend_rate * self.ending_bone_blend / self.ending_bone_blend_frames,
                self.ending_face_blend / self.ending_face_blend_frames,
            )
        })
    }

    fn begin_ending(&mut self) {
        self.ending_bone_blend = self.ending_bone_blend_frames;
        self.ending_face_blend = self.ending_face_blend_frames;
    }
}

// ============================================================================
// 动作层
// ============================================================================

/// 动作层
#[derive(Debug, Default)]
pub struct MotionLayer {
    players: SlotMap<MotionKey, MotionPlayer>,
    /// 按优先级排列，同优先级按开始顺序
    order: Vec<MotionKey>,
    /// 完整动作开始后，未受控骨骼 / 表情回到默认姿势的剩余帧数
    beginning_non_controlled_blend: f32,
    /// 最近一次 update 的事件
    events: Vec<MotionEvent>,
}

impl MotionLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 播放器数量（含淡出中的）
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 按应用顺序遍历播放器
    pub fn players(&self) -> impl Iterator<Item = &MotionPlayer> {
        self.order.iter().filter_map(|&k| self.players.get(k))
    }

    pub fn get(&self, key: MotionKey) -> Option<&MotionPlayer> {
        self.players.get(key)
    }

    pub fn get_mut(&mut self, key: MotionKey) -> Option<&mut MotionPlayer> {
        self.players.get_mut(key)
    }

    /// 查找正在播放（未淡出）的同名播放器
    pub fn get_running(&self, name: &str) -> Option<&MotionPlayer> {
        self.players().find(|p| p.active && !p.is_ending() && p.name == name)
    }

    fn find_active_key(&self, name: &str) -> Option<MotionKey> {
        self.order
            .iter()
            .copied()
            .find(|&k| self.players.get(k).is_some_and(|p| p.active && p.name == name))
    }

    /// 最近一次 update 的事件
    pub fn events(&self) -> &[MotionEvent] {
        &self.events
    }

    /// 终止淡出中的同名动作，允许立即重新开始
    fn terminate_ending_motion(&mut self, name: &str) {
        for player in self.players.values_mut() {
            if player.active && player.is_ending() && player.name == name {
                player.active = false;
            }
        }
    }

    /// 清除已停用的播放器
    fn purge(&mut self) {
        let players = &mut self.players;
        self.order.retain(|&k| {
            let keep = players.get(k).is_some_and(|p| p.active);
            if !keep {
                players.remove(k);
            }
            keep
        });
    }

    /// 开始动作
    pub fn start_motion(
        &mut self,
        name: &str,
        motion: Arc<Motion>,
        options: StartOptions,
        bones: &mut BoneSet,
        morphs: &MorphManager,
    ) -> MotionKey {
        self.terminate_ending_motion(name);
        self.purge();

        let instance = MotionInstance::new(motion, bones, morphs);
        let mut player = MotionPlayer::new(name, instance, &options);
        Self::start_motion_sub(&mut player, None, bones, morphs);

        if !player.ignore_static {
            self.beginning_non_controlled_blend = get_config().non_controlled_reset_frames;
        }

        let priority = player.priority;
        let key = self.players.insert(player);
        let pos = self
            .order
            .iter()
            .position(|&k| self.players.get(k).is_some_and(|p| p.priority > priority))
            .unwrap_or(self.order.len());
        self.order.insert(pos, key);

        log::debug!("motion '{}' started at priority {}", name, priority);
        key
    }

    /// 替换同名播放器的动作，保留播放参数
    pub fn swap_motion(
        &mut self,
        name: &str,
        motion: Arc<Motion>,
        bones: &mut BoneSet,
        morphs: &MorphManager,
    ) -> Result<()> {
        self.purge();
        let key = self
            .order
            .iter()
            .copied()
            .find(|&k| self.players.get(k).is_some_and(|p| p.name == name))
            .ok_or_else(|| MmdError::MotionNotFound(name.to_string()))?;
        let Some(player) = self.players.get_mut(key) else {
            return Err(MmdError::MotionNotFound(name.to_string()));
        };

        Self::start_motion_sub(player, Some(motion), bones, morphs);
        if !player.ignore_static {
            self.beginning_non_controlled_blend = get_config().non_controlled_reset_frames;
        }
        Ok(())
    }

    /// 初始化播放器
    fn start_motion_sub(
        player: &mut MotionPlayer,
        motion: Option<Arc<Motion>>,
        bones: &mut BoneSet,
        morphs: &MorphManager,
    ) {
        if let Some(motion) = motion {
            player.instance = MotionInstance::new(motion, bones, morphs);
        }
        player.instance.reset();
        // 基础动作把单关键帧轨道当作普通轨道
        player.instance.set_ignore_single_motion(player.ignore_static);

        player.active = true;
        player.ending_bone_blend = 0.0;
        player.ending_face_blend = 0.0;
        // 切换动作时关闭速度渐变
        player.acceleration = AccelerationStatus::Constant;
        player.want_delete = false;

        if !player.enable_smooth {
            return;
        }

        let center = bones.find_bone_by_name(CENTER_BONE_NAME);
        match center {
            Some(center) if player.instance.has_center() && player.enable_repos => {
                // 中心骨骼的当前全局位置成为新的模型根偏移，中心的局部位置归零
                let root_offset = bones.root_offset();
                let initial = bones.get_bone(center).map(|b| b.initial_position).unwrap_or(Vec3::ZERO);
                let pos = bones.world_position(center) - root_offset;
                let mut offset = pos - initial;
                // 保持模型在地面上
                offset.y = 0.0;

                player.instance.set_override_first(Some(offset), bones, morphs);
                bones.set_root_offset(root_offset + offset);
                bones.update_all();
            }
            _ => player.instance.set_override_first(None, bones, morphs),
        }
    }

    /// 设置速度渐变
    ///
    /// target_frame < 0 时立即开始，否则在到达该帧时开始，length 帧内变到 rate
    pub fn set_motion_speed_rate(&mut self, name: &str, rate: f32, length: f32, target_frame: f32) -> Result<()> {
        if rate < 0.0 || length < 0.0 {
            return Err(MmdError::InvalidSpeed { rate, length });
        }
        let key = self
            .find_active_key(name)
            .ok_or_else(|| MmdError::MotionNotFound(name.to_string()))?;
        let Some(player) = self.players.get_mut(key) else {
            return Err(MmdError::MotionNotFound(name.to_string()));
        };

        player.target_speed_rate = rate;
        if target_frame < 0.0 {
            player.remaining_frames_for_start = 0.0;
            player.remaining_frames_for_end = length;
        } else {
            let mut start = target_frame - player.instance.current_frame();
            if start < 0.0 {
                start += player.instance.max_frame();
            }
            player.remaining_frames_for_start = start;
            player.remaining_frames_for_end = start + length;
        }
        player.acceleration = AccelerationStatus::Waiting;
        Ok(())
    }

    /// 请求删除，下一次 update 时生效
    pub fn delete_motion(&mut self, name: &str) -> Result<()> {
        let key = self
            .find_active_key(name)
            .ok_or_else(|| MmdError::MotionNotFound(name.to_string()))?;
        if let Some(player) = self.players.get_mut(key) {
            player.want_delete = true;
        }
        Ok(())
    }

    /// 转发到动作实例的 configure
    pub fn configure_motion(&mut self, name: &str, key: &str, value: &str) -> Result<bool> {
        let k = self
            .find_active_key(name)
            .ok_or_else(|| MmdError::MotionNotFound(name.to_string()))?;
        match self.players.get_mut(k) {
            Some(player) => player.instance.configure(key, value),
            None => Err(MmdError::MotionNotFound(name.to_string())),
        }
    }

    /// 设置骨骼混合系数
    pub fn set_motion_blend_rate(&mut self, name: &str, rate: f32) -> Result<()> {
        let key = self
            .find_active_key(name)
            .ok_or_else(|| MmdError::MotionNotFound(name.to_string()))?;
        if let Some(player) = self.players.get_mut(key) {
            player.motion_blend_rate = rate;
        }
        Ok(())
    }

    /// 推进速度渐变，返回本帧是否有渐变结束
    pub fn update_motion_speed_rate(&mut self, frame: f32) -> bool {
        let mut ended = false;
        for player in self.players.values_mut() {
            if !player.active || player.acceleration == AccelerationStatus::Constant {
                continue;
            }
            if player.acceleration == AccelerationStatus::Ended {
                player.acceleration = AccelerationStatus::Constant;
                continue;
            }

            let f = frame * player.current_speed_rate;
            if player.acceleration == AccelerationStatus::Waiting {
                player.remaining_frames_for_start -= f;
                if player.remaining_frames_for_start <= 0.0 {
                    player.acceleration = AccelerationStatus::Changing;
                }
            }
            player.remaining_frames_for_end -= f;
            if player.acceleration == AccelerationStatus::Changing {
                if player.remaining_frames_for_end <= 0.0 {
                    player.current_speed_rate = player.target_speed_rate;
                    player.acceleration = AccelerationStatus::Ended;
                    ended = true;
                } else {
                    player.current_speed_rate += (player.target_speed_rate - player.current_speed_rate)
                        * (frame / (player.remaining_frames_for_end + frame));
                }
            }
        }
        ended
    }

    /// 应用所有播放器并前进 frame 帧，返回状态变化事件
    pub fn update(&mut self, frame: f32, target: &mut MotionTarget<'_>) -> &[MotionEvent] {
        if self.beginning_non_controlled_blend > 0.0 {
            let reset_frames = get_config().non_controlled_reset_frames;
            self.beginning_non_controlled_blend = (self.beginning_non_controlled_blend - frame).max(0.0);
            let rate = self.beginning_non_controlled_blend / reset_frames;
            target.bones.smear_all_to_default(rate);
            target.morphs.smear_all_to_default(rate);
        }

        for player in self.players.values_mut() {
            player.status = MotionStatus::Running;
        }

        for &key in &self.order {
            let Some(player) = self.players.get_mut(key) else { continue };
            if !player.active {
                continue;
            }
            let step = frame * player.current_speed_rate;

            if let Some((bone_rate, face_rate)) = player.ending_rates() {
                if player.want_delete {
                    player.status = MotionStatus::Deleted;
                    player.want_delete = false;
                }
                player.instance.set_bone_blend_rate(bone_rate);
                player.instance.set_face_blend_rate(face_rate);
                player.instance.advance(step, target);

                player.ending_bone_blend = (player.ending_bone_blend - frame).max(0.0);
                player.ending_face_blend = (player.ending_face_blend - frame).max(0.0);
                if !player.is_ending() {
                    player.active = false;
                }
                continue;
            }

            player.instance.set_bone_blend_rate(player.motion_blend_rate);
            player.instance.set_face_blend_rate(1.0);
            if player.instance.advance(step, target) {
                match player.on_end {
                    OnEnd::Hold => {}
                    OnEnd::Loop => {
                        // 空动作不循环，避免每帧都触发事件
                        if player.instance.max_frame() != 0.0 {
                            player.instance.rewind(player.loop_at, step);
                            player.status = MotionStatus::Looped;
                        }
                    }
                    OnEnd::Delete => {
                        if player.enable_smooth {
                            player.begin_ending();
                        } else {
                            player.active = false;
                        }
                        player.status = MotionStatus::Deleted;
                    }
                }
            }

            if player.want_delete {
                if player.enable_smooth {
                    player.begin_ending();
                } else {
                    player.active = false;
                }
                player.status = MotionStatus::Deleted;
                player.want_delete = false;
            }
        }

        self.events = self
            .players()
            .filter(|p| p.status != MotionStatus::Running)
            .map(|p| MotionEvent { name: p.name.clone(), status: p.status })
            .collect();
        for event in &self.events {
            log::debug!("motion '{}' {:?}", event.name, event.status);
        }

        self.purge();
        &self.events
    }

    /// 推进速度渐变和所有播放器，返回合成后的姿势
    pub fn composite(&mut self, frames: f32, target: &mut MotionTarget<'_>) -> Pose {
        self.update_motion_speed_rate(frames);
        self.update(frames, target);
        Pose::capture(target.bones, target.morphs, *target.visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use crate::animation::keyframe::RawBoneKeyframe;
    use crate::animation::motion::MotionBuilder;
    use crate::skeleton::BoneLink;

    struct Fixture {
        bones: BoneSet,
        morphs: MorphManager,
        visible: bool,
    }

    impl Fixture {
        fn new() -> Self {
            let bones = BoneSet::new(vec![
                BoneLink::new(CENTER_BONE_NAME),
                BoneLink::new("右腕").with_parent(0, Vec3::new(1.0, 1.0, 0.0)),
                BoneLink::new("左腕").with_parent(0, Vec3::new(-1.0, 1.0, 0.0)),
            ])
            .unwrap();
            Self { bones, morphs: MorphManager::new(), visible: true }
        }

        fn target(&mut self) -> MotionTarget<'_> {
            MotionTarget { bones: &mut self.bones, morphs: &mut self.morphs, visible: &mut self.visible }
        }

        fn arm(&self) -> Vec3 {
            self.bones.get_bone(1).unwrap().animation_translate
        }
    }

    /// 右腕保持固定平移的动作
    fn constant_motion(name: &str, value: Vec3, length: f32) -> Arc<Motion> {
        let mut b = MotionBuilder::new(name);
        b.insert_bone_keyframe("右腕", RawBoneKeyframe::linear(0.0, value, Quat::IDENTITY))
            .insert_bone_keyframe("右腕", RawBoneKeyframe::linear(length, value, Quat::IDENTITY));
        b.build().unwrap()
    }

    fn sharp(priority: f32, once: bool) -> StartOptions {
        StartOptions { full: false, once, smooth: false, reposition: false, priority }
    }

    #[test]
    fn test_higher_priority_wins() {
        let mut fx = Fixture::new();
        let mut layer = MotionLayer::new();
        // 高优先级先开始，仍然后应用
        layer.start_motion("b", constant_motion("b", Vec3::Y, 30.0), sharp(5.0, false), &mut fx.bones, &fx.morphs);
        layer.start_motion("a", constant_motion("a", Vec3::X, 30.0), sharp(0.0, false), &mut fx.bones, &fx.morphs);

        let names: Vec<&str> = layer.players().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let pose = layer.composite(1.0, &mut fx.target());
        assert!((pose.bones[1].translation - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_same_priority_keeps_start_order() {
        let mut fx = Fixture::new();
        let mut layer = MotionLayer::new();
        layer.start_motion("first", constant_motion("first", Vec3::X, 30.0), sharp(1.0, false), &mut fx.bones, &fx.morphs);
        layer.start_motion("second", constant_motion("second", Vec3::Z, 30.0), sharp(1.0, false), &mut fx.bones, &fx.morphs);
        layer.update(1.0, &mut fx.target());
        assert!((fx.arm() - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_full_blend_equals_raw_pose() {
        let mut fx = Fixture::new();
        let mut layer = MotionLayer::new();
        let mut b = MotionBuilder::new("wave");
        b.insert_bone_keyframe("右腕", RawBoneKeyframe::linear(0.0, Vec3::ZERO, Quat::IDENTITY))
            .insert_bone_keyframe("右腕", RawBoneKeyframe::linear(10.0, Vec3::new(2.0, 0.0, 0.0), Quat::from_rotation_z(1.0)));
        layer.start_motion("wave", b.build().unwrap(), sharp(0.0, false), &mut fx.bones, &fx.morphs);

        layer.update(5.0, &mut fx.target());
        let pose = layer.composite(1.0, &mut fx.target());
        // 第 5 帧
        assert!((pose.bones[1].translation.x - 1.0).abs() < 1e-5);
        assert!(pose.bones[1].rotation.angle_between(Quat::from_rotation_z(0.5)) < 1e-4);
    }

    #[test]
    fn test_fadeout_decays_linearly_and_removes() {
        let mut fx = Fixture::new();
        fx.bones.get_bone_mut(1).unwrap().animation_translate = Vec3::X;
        let mut layer = MotionLayer::new();
        let options = StartOptions { full: false, once: false, smooth: true, reposition: false, priority: 0.0 };
        layer.start_motion("fade", constant_motion("fade", Vec3::X, 100.0), options, &mut fx.bones, &fx.morphs);

        layer.delete_motion("fade").unwrap();
        let events = layer.update(1.0, &mut fx.target()).to_vec();
        assert_eq!(events, vec![MotionEvent { name: "fade".into(), status: MotionStatus::Deleted }]);
        assert!(layer.get_running("fade").is_none());

        for i in 0..20 {
            assert_eq!(layer.len(), 1);
            fx.bones.get_bone_mut(1).unwrap().animation_translate = Vec3::ZERO;
            layer.update(1.0, &mut fx.target());
            let expected = (20 - i) as f32 / 20.0;
            assert!((fx.arm().x - expected).abs() < 1e-5, "step {}: {}", i, fx.arm().x);
        }
        assert!(layer.is_empty());
    }

    #[test]
    fn test_loop_event() {
        let mut fx = Fixture::new();
        let mut layer = MotionLayer::new();
        layer.start_motion("loop", constant_motion("loop", Vec3::X, 10.0), sharp(0.0, false), &mut fx.bones, &fx.morphs);
        assert!(layer.update(6.0, &mut fx.target()).is_empty());
        let events = layer.update(6.0, &mut fx.target()).to_vec();
        assert_eq!(events[0].status, MotionStatus::Looped);
        let player = layer.get_running("loop").unwrap();
        assert!((player.instance.current_frame() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_once_without_smooth_removed_at_end() {
        let mut fx = Fixture::new();
        let mut layer = MotionLayer::new();
        layer.start_motion("once", constant_motion("once", Vec3::X, 10.0), sharp(0.0, true), &mut fx.bones, &fx.morphs);
        let events = layer.update(12.0, &mut fx.target()).to_vec();
        assert_eq!(events[0].status, MotionStatus::Deleted);
        assert!(layer.is_empty());
    }

    #[test]
    fn test_speed_ramp() {
        let mut fx = Fixture::new();
        let mut layer = MotionLayer::new();
        layer.start_motion("run", constant_motion("run", Vec3::X, 1000.0), sharp(0.0, false), &mut fx.bones, &fx.morphs);

        assert!(matches!(
            layer.set_motion_speed_rate("run", -1.0, 10.0, -1.0),
            Err(MmdError::InvalidSpeed { .. })
        ));
        assert!(layer.set_motion_speed_rate("none", 1.0, 1.0, -1.0).is_err());
        layer.set_motion_speed_rate("run", 2.0, 10.0, -1.0).unwrap();

        let mut prev = 1.0;
        let mut ended = false;
        for _ in 0..20 {
            ended |= layer.update_motion_speed_rate(1.0);
            let speed = layer.get_running("run").unwrap().speed_rate();
            assert!(speed >= prev);
            prev = speed;
        }
        assert!(ended);
        let player = layer.get_running("run").unwrap();
        assert_eq!(player.speed_rate(), 2.0);
        assert_eq!(player.acceleration_status(), AccelerationStatus::Constant);
    }

    #[test]
    fn test_non_controlled_reset() {
        let mut fx = Fixture::new();
        fx.bones.get_bone_mut(2).unwrap().animation_translate = Vec3::new(0.0, 4.0, 0.0);
        let mut layer = MotionLayer::new();
        let options = StartOptions { full: true, smooth: false, ..Default::default() };
        layer.start_motion("base", constant_motion("base", Vec3::X, 30.0), options, &mut fx.bones, &fx.morphs);
        layer.update(5.0, &mut fx.target());
        let left = fx.bones.get_bone(2).unwrap().animation_translate;
        assert!((left.y - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_swap_keeps_priority() {
        let mut fx = Fixture::new();
        let mut layer = MotionLayer::new();
        layer.start_motion("top", constant_motion("top", Vec3::Y, 30.0), sharp(9.0, false), &mut fx.bones, &fx.morphs);
        layer.start_motion("base", constant_motion("base", Vec3::X, 30.0), sharp(0.0, false), &mut fx.bones, &fx.morphs);
        layer.swap_motion("top", constant_motion("top2", Vec3::Z, 30.0), &mut fx.bones, &fx.morphs).unwrap();
        layer.update(1.0, &mut fx.target());
        assert!((fx.arm() - Vec3::Z).length() < 1e-6);
        assert!(layer.swap_motion("missing", constant_motion("x", Vec3::Z, 1.0), &mut fx.bones, &fx.morphs).is_err());
    }

    #[test]
    fn test_center_reposition() {
        let mut fx = Fixture::new();
        // 模型已经走到 (3, 0.5, 0)
        fx.bones.get_bone_mut(0).unwrap().animation_translate = Vec3::new(3.0, 0.5, 0.0);
        fx.bones.update_all();

        let mut b = MotionBuilder::new("walk");
        b.insert_bone_keyframe(CENTER_BONE_NAME, RawBoneKeyframe::linear(0.0, Vec3::ZERO, Quat::IDENTITY))
            .insert_bone_keyframe(CENTER_BONE_NAME, RawBoneKeyframe::linear(30.0, Vec3::Z, Quat::IDENTITY));
        let mut layer = MotionLayer::new();
        let options = StartOptions { full: false, ..Default::default() };
        layer.start_motion("walk", b.build().unwrap(), options, &mut fx.bones, &fx.morphs);

        // 水平偏移移到根上，Y 保持
        assert!((fx.bones.root_offset() - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-6);
    }
}
