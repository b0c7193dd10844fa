//! MMD 物理桥接
//!
//! 每帧流程：sync_bodies → step_simulation → sync_bones。
//! 运动学刚体跟随骨骼，动力学刚体的结果写回骨骼。
//! 运动学/动力学切换时保存并恢复刚体状态，切换瞬间不跳变。

use std::collections::HashMap;

use glam::{Mat4, Vec3};

use super::engine::{BodyState, JointDesc, PhysicsEngine};
use super::rapier_engine::RapierEngine;
use super::rigid_body::{ControlType, JointDef, MmdRigidBody, RigidBodyDef};
use crate::config::{get_config, EngineConfig};
use crate::skeleton::BoneSet;

/// MMD 物理桥接
pub struct MmdPhysics {
    engine: Box<dyn PhysicsEngine>,
    rigid_bodies: Vec<MmdRigidBody>,
    /// 写回骨骼的顺序：按骨骼索引，父骨骼的刚体在前
    sync_order: Vec<usize>,
    /// 骨骼索引 → 刚体下标列表
    bone_bodies: HashMap<usize, Vec<usize>>,
    joint_count: usize,
    /// 物理 FPS
    fps: f32,
    /// 最大子步数
    max_substep_count: i32,
    enabled: bool,
    /// 关闭模拟时是否保留状态，重新开启时使用
    preserve_on_resume: bool,
}

/// 动作层之后的物理同步阶段
pub type PhysicsBridge = MmdPhysics;

impl MmdPhysics {
    pub fn new(mut engine: Box<dyn PhysicsEngine>) -> Self {
        let config = get_config();
        engine.set_gravity(Vec3::new(0.0, config.gravity_y, 0.0));

        if config.debug_log {
            log::info!("[物理] 创建: FPS={}, 重力Y={}", config.physics_fps, config.gravity_y);
        }

        Self {
            engine,
            rigid_bodies: Vec::new(),
            sync_order: Vec::new(),
            bone_bodies: HashMap::new(),
            joint_count: 0,
            fps: config.physics_fps.max(1.0),
            max_substep_count: config.max_substep_count.max(1),
            enabled: true,
            preserve_on_resume: false,
        }
    }

    /// 使用 Rapier 引擎
    pub fn with_rapier() -> Self {
        let gravity = Vec3::new(0.0, get_config().gravity_y, 0.0);
        Self::new(Box::new(RapierEngine::new(gravity)))
    }

    /// 构建刚体和关节
    ///
    /// 需在骨骼处于初始姿势时调用。创建失败的刚体记录警告后跳过，
    /// 引用了它们的关节一并跳过。拥有动力学刚体的骨骼标记为 SIMULATED。
    pub fn build(&mut self, bones: &mut BoneSet, bodies: &[RigidBodyDef], joints: &[JointDef]) {
        let config = get_config();
        let mut def_to_body: Vec<Option<usize>> = vec![None; bodies.len()];
        self.rigid_bodies.reserve(bodies.len());

        for (def_idx, def) in bodies.iter().enumerate() {
            let bone_world = if def.bone_index < 0 {
                Mat4::IDENTITY
            } else {
                match bones.get_bone(def.bone_index as usize) {
                    Some(bone) => bone.global_transform(),
                    None => {
                        log::warn!("[物理] 刚体 '{}' 引用了不存在的骨骼 {}，跳过", def.name, def.bone_index);
                        continue;
                    }
                }
            };
            let transform = bone_world * def.local_transform();

            let body = match self.engine.add_body(&def.to_desc(transform, &config)) {
                Ok(body) => body,
                Err(e) => {
                    log::warn!("[物理] {}，跳过", e);
                    continue;
                }
            };

            let idx = self.rigid_bodies.len();
            let rb = MmdRigidBody::new(def, body, transform);
            if let Some(bone) = rb.bone() {
                self.bone_bodies.entry(bone).or_default().push(idx);
                if def.control.is_dynamic() {
                    if let Some(b) = bones.get_bone_mut(bone) {
                        b.set_simulated(true);
                    }
                }
            }
            self.rigid_bodies.push(rb);
            def_to_body[def_idx] = Some(idx);
        }

        // 父骨骼排在子骨骼之前，物理跟骨刚体取原点时父骨骼已写回
        let rigid_bodies = &self.rigid_bodies;
        let mut order: Vec<usize> = (0..rigid_bodies.len()).collect();
        order.sort_by_key(|&i| rigid_bodies[i].bone().unwrap_or(usize::MAX));
        self.sync_order = order;

        for joint in joints {
            let lookup = |i: usize| def_to_body.get(i).copied().flatten();
            let (Some(a), Some(b)) = (lookup(joint.body_a), lookup(joint.body_b)) else {
                log::warn!("[物理] 关节 '{}' 引用的刚体无效，跳过", joint.name);
                continue;
            };
            if a == b {
                continue;
            }
            let desc = JointDesc {
                name: joint.name.clone(),
                body_a: self.rigid_bodies[a].body,
                body_b: self.rigid_bodies[b].body,
                transform: joint.transform(),
                linear_lower: joint.linear_lower,
                linear_upper: joint.linear_upper,
                angular_lower: joint.angular_lower,
                angular_upper: joint.angular_upper,
            };
            match self.engine.add_joint(&desc) {
                Ok(()) => self.joint_count += 1,
                Err(e) => log::warn!("[物理] {}，跳过", e),
            }
        }

        let count = |control: ControlType| self.rigid_bodies.iter().filter(|rb| rb.control == control).count();
        log::info!(
            "物理构建完成: {} 刚体 ({}跟骨 + {}物理 + {}物理跟骨), {} 关节",
            self.rigid_bodies.len(),
            count(ControlType::KinematicOnly),
            count(ControlType::DynamicSimulated),
            count(ControlType::DynamicAlignedToBone),
            self.joint_count
        );
    }

    // ========== 访问器 ==========

    pub fn rigid_body_count(&self) -> usize {
        self.rigid_bodies.len()
    }

    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    pub fn rigid_bodies(&self) -> &[MmdRigidBody] {
        &self.rigid_bodies
    }

    /// 骨骼关联的刚体下标
    pub fn bodies_of_bone(&self, bone: usize) -> &[usize] {
        self.bone_bodies.get(&bone).map(|v| v.as_slice()).unwrap_or(&[])
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn engine(&self) -> &dyn PhysicsEngine {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn PhysicsEngine {
        self.engine.as_mut()
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.engine.set_gravity(gravity);
    }

    // ========== 每帧流程 ==========

    /// 把运动学刚体移动到骨骼当前位置
    pub fn sync_bodies(&mut self, bones: &BoneSet) {
        for rb in &self.rigid_bodies {
            if !rb.is_kinematic() {
                continue;
            }
            let Some(bone) = rb.bone().and_then(|b| bones.get_bone(b)) else { continue };
            self.engine.move_kinematic(rb.body, rb.body_transform(bone.global_transform()));
        }
    }

    /// 推进模拟，frames 为动作帧数
    ///
    /// 按物理 FPS 分成固定子步，子步数不超过上限。返回实际子步数。
    pub fn step_simulation(&mut self, frames: f32) -> u32 {
        let config = get_config();
        let seconds = frames / config.motion_fps;
        if seconds.is_nan() || seconds <= 0.0 {
            return 0;
        }
        let fixed_dt = 1.0 / self.fps;
        // 浮点误差不应多出一个子步
        let wanted = (seconds / fixed_dt - 1e-4).ceil().max(1.0);
        let substeps = (wanted as i32).min(self.max_substep_count) as u32;

        for _ in 0..substeps {
            self.engine.step(fixed_dt);
        }
        self.clamp_velocities(&config);
        substeps
    }

    /// 截断超速刚体，防止卡顿帧或极端力导致的物理爆炸
    fn clamp_velocities(&mut self, config: &EngineConfig) {
        let max_lin = config.max_linear_velocity;
        let max_ang = config.max_angular_velocity;

        for rb in &self.rigid_bodies {
            if rb.is_kinematic() {
                continue;
            }
            let Some(state) = self.engine.state(rb.body) else { continue };
            let lin = state.linear_velocity.clamp_length_max(max_lin);
            let ang = state.angular_velocity.clamp_length_max(max_ang);
            if lin != state.linear_velocity || ang != state.angular_velocity {
                self.engine.set_velocities(rb.body, lin, ang);
            }
        }
    }

    /// 把动力学刚体的结果写回骨骼全局变换
    ///
    /// 返回是否有骨骼被写入。之后需调用 BoneSet::propagate_from_simulated。
    pub fn sync_bones(&self, bones: &mut BoneSet) -> bool {
        if !self.enabled {
            return false;
        }
        let mut written = false;
        for rb in self.sync_order.iter().filter_map(|&i| self.rigid_bodies.get(i)) {
            if rb.is_kinematic() {
                continue;
            }
            let Some(bone_idx) = rb.bone() else { continue };
            let Some(body_world) = self.engine.transform(rb.body) else { continue };

            let world = match rb.control {
                ControlType::DynamicSimulated => rb.bone_transform(body_world),
                ControlType::DynamicAlignedToBone => {
                    let Some(bone) = bones.get_bone(bone_idx) else { continue };
                    let parent = bone
                        .parent_id()
                        .and_then(|p| bones.get_bone(p))
                        .map(|p| p.global_transform())
                        .unwrap_or_else(|| Mat4::from_translation(bones.root_offset()));
                    let origin = (parent * bone.local_transform()).w_axis.truncate();
                    rb.bone_transform_aligned(body_world, origin)
                }
                ControlType::KinematicOnly => continue,
            };
            if let Some(bone) = bones.get_bone_mut(bone_idx) {
                bone.set_global_transform(world);
                written = true;
            }
        }
        written
    }

    // ========== 控制切换 ==========

    /// 切换单个骨骼的刚体控制方式
    ///
    /// 骨骼没有刚体时什么也不做。只有 KinematicOnly 刚体的骨骼同样不受影响。
    /// 整体模拟关闭期间只记录选择，刚体保持运动学，重新开启时生效。
    pub fn set_control_mode(&mut self, bones: &mut BoneSet, bone: usize, dynamic: bool, preserve: bool) {
        let Some(indices) = self.bone_bodies.get(&bone).cloned() else {
            log::debug!("[物理] 骨骼 {} 没有刚体，忽略控制切换", bone);
            return;
        };
        if !indices.iter().any(|&i| self.rigid_bodies[i].control.is_dynamic()) {
            return;
        }

        for &i in &indices {
            self.rigid_bodies[i].set_pinned(!dynamic);
        }
        if !self.enabled {
            log::debug!("[物理] 模拟已关闭，骨骼 {} 的控制切换在重新开启时生效", bone);
            if let Some(b) = bones.get_bone_mut(bone) {
                b.set_simulated(dynamic);
            }
            return;
        }

        if dynamic {
            for &i in &indices {
                self.set_body_kinematic(i, false, preserve, bones);
            }
            if let Some(b) = bones.get_bone_mut(bone) {
                b.set_simulated(true);
            }
        } else {
            for &i in &indices {
                self.set_body_kinematic(i, true, preserve, bones);
            }
            // 骨骼改由动作驱动，记录当前位置作为之后恢复的基准
            if let Some(b) = bones.get_bone_mut(bone) {
                b.set_simulated(false);
                b.save_transform();
            }
        }
    }

    /// 整个模型开关物理模拟
    ///
    /// 关闭时所有刚体变为运动学，骨骼按动作更新后保存为恢复基准。
    /// 开启时按骨骼固定为运动学的刚体保持不变。
    pub fn set_simulation_enabled(&mut self, bones: &mut BoneSet, enabled: bool, preserve: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        if !enabled {
            self.preserve_on_resume = preserve;
        }

        for i in 0..self.rigid_bodies.len() {
            let kinematic = !enabled || self.rigid_bodies[i].is_pinned();
            self.set_body_kinematic(i, kinematic, self.preserve_on_resume, bones);
        }

        if !enabled {
            bones.update_all();
            bones.save_transforms();
        }
    }

    /// 第一个不受物理控制的骨骼（从自身开始向上）
    fn find_unsimulated_ancestor(bones: &BoneSet, start: Option<usize>) -> Option<usize> {
        let mut current = start;
        while let Some(idx) = current {
            let bone = bones.get_bone(idx)?;
            if !bone.is_simulated() {
                return Some(idx);
            }
            current = bone.parent_id();
        }
        None
    }

    fn set_body_kinematic(&mut self, idx: usize, kinematic: bool, preserve: bool, bones: &BoneSet) {
        let Some(rb) = self.rigid_bodies.get_mut(idx) else { return };
        if rb.control == ControlType::KinematicOnly || rb.is_kinematic() == kinematic {
            return;
        }

        if kinematic {
            let saved = if preserve { self.engine.state(rb.body) } else { None };
            self.engine.clear_forces(rb.body);
            self.engine.set_kinematic(rb.body, true);
            rb.store_state(saved);
            rb.set_kinematic_flag(true);
            return;
        }

        let kinematic_world = rb
            .bone()
            .and_then(|b| bones.get_bone(b))
            .map(|b| rb.body_transform(b.global_transform()))
            .or_else(|| self.engine.transform(rb.body))
            .unwrap_or(rb.initial_transform);

        let mut restore: Option<BodyState> = None;
        let start = match (preserve, rb.saved_state().copied()) {
            (true, Some(mut saved)) => {
                match Self::find_unsimulated_ancestor(bones, rb.bone()).and_then(|i| bones.get_bone(i)) {
                    Some(base) => {
                        // 基准骨骼自保存以来的运动
                        let tr = base.global_transform() * base.saved_world.inverse();
                        let (_, rot, _) = tr.to_scale_rotation_translation();
                        saved.linear_velocity = rot * saved.linear_velocity;
                        saved.angular_velocity = rot * saved.angular_velocity;
                        restore = Some(saved);
                        tr * saved.transform
                    }
                    None => {
                        restore = Some(saved);
                        kinematic_world
                    }
                }
            }
            _ => kinematic_world,
        };

        self.engine.set_kinematic(rb.body, false);
        self.engine.set_transform(rb.body, start);
        match restore {
            Some(state) => self.engine.apply_state(rb.body, &state),
            None => self.engine.clear_forces(rb.body),
        }
        rb.store_state(None);
        rb.set_kinematic_flag(false);
    }

    /// 所有刚体回到骨骼当前位置，清零速度和外力
    pub fn reset(&mut self, bones: &BoneSet) {
        for rb in &self.rigid_bodies {
            let transform = rb
                .bone()
                .and_then(|b| bones.get_bone(b))
                .map(|b| rb.body_transform(b.global_transform()))
                .unwrap_or(rb.initial_transform);
            self.engine.set_transform(rb.body, transform);
            self.engine.set_velocities(rb.body, Vec3::ZERO, Vec3::ZERO);
            self.engine.clear_forces(rb.body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::engine::BodyShape;
    use crate::physics::mock_engine::MockEngine;
    use crate::skeleton::BoneLink;
    use glam::Quat;
    use std::f32::consts::FRAC_PI_2;

    fn bones() -> BoneSet {
        BoneSet::new(vec![
            BoneLink::new("センター").with_parent(-1, Vec3::ZERO),
            BoneLink::new("頭").with_parent(0, Vec3::new(0.0, 1.0, 0.0)),
            BoneLink::new("髪").with_parent(1, Vec3::new(0.0, 2.0, 0.0)),
        ])
        .unwrap()
    }

    fn sphere(name: &str, bone: i32, control: ControlType) -> RigidBodyDef {
        RigidBodyDef::new(name, bone, control, BodyShape::Sphere { radius: 0.2 })
    }

    fn bridge(bones: &mut BoneSet) -> MmdPhysics {
        let mut physics = MmdPhysics::new(Box::new(MockEngine::new()));
        physics.set_gravity(Vec3::ZERO);
        physics.build(
            bones,
            &[
                sphere("頭", 1, ControlType::KinematicOnly),
                sphere("髪", 2, ControlType::DynamicSimulated),
            ],
            &[],
        );
        physics
    }

    #[test]
    fn test_build_marks_simulated() {
        let mut set = bones();
        let physics = bridge(&mut set);
        assert_eq!(physics.rigid_body_count(), 2);
        assert!(!set.get_bone(1).unwrap().is_simulated());
        assert!(set.get_bone(2).unwrap().is_simulated());
        assert_eq!(physics.bodies_of_bone(2), &[1]);
        assert!(physics.bodies_of_bone(0).is_empty());
    }

    #[test]
    fn test_failed_body_skipped_with_its_joint() {
        let mut set = bones();
        let mut physics = MmdPhysics::new(Box::new(MockEngine::new()));
        let mut bad = sphere("bad", 2, ControlType::DynamicSimulated);
        bad.shape = BodyShape::Sphere { radius: -1.0 };
        let joint = JointDef {
            name: "j".into(),
            body_a: 0,
            body_b: 1,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            linear_lower: Vec3::ZERO,
            linear_upper: Vec3::ZERO,
            angular_lower: Vec3::ZERO,
            angular_upper: Vec3::ZERO,
        };
        physics.build(&mut set, &[sphere("頭", 1, ControlType::KinematicOnly), bad], &[joint]);
        assert_eq!(physics.rigid_body_count(), 1);
        assert_eq!(physics.joint_count(), 0);
        assert!(!set.get_bone(2).unwrap().is_simulated());
    }

    #[test]
    fn test_kinematic_body_follows_bone() {
        let mut set = bones();
        let mut physics = bridge(&mut set);
        set.get_bone_mut(0).unwrap().animation_translate = Vec3::new(3.0, 0.0, 0.0);
        set.update_all();
        physics.sync_bodies(&set);
        physics.step_simulation(1.0);
        let t = physics.engine().transform(physics.rigid_bodies()[0].body).unwrap();
        assert!((t.w_axis.truncate() - Vec3::new(3.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_substeps_capped() {
        let mut set = bones();
        let mut physics = bridge(&mut set);
        // 1 帧 = 1/30 秒 = 2 个 1/60 子步
        assert_eq!(physics.step_simulation(1.0), 2);
        assert_eq!(physics.step_simulation(100.0), get_config().max_substep_count as u32);
        assert_eq!(physics.step_simulation(0.0), 0);
    }

    #[test]
    fn test_velocity_clamped_after_step() {
        let mut set = bones();
        let mut physics = bridge(&mut set);
        let body = physics.rigid_bodies()[1].body;
        physics.engine_mut().set_velocities(body, Vec3::new(1.0e4, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0e4));
        physics.step_simulation(1.0);
        let state = physics.engine().state(body).unwrap();
        let config = get_config();
        assert!(state.linear_velocity.length() <= config.max_linear_velocity + 1e-3);
        assert!(state.angular_velocity.length() <= config.max_angular_velocity + 1e-3);
    }

    #[test]
    fn test_dynamic_writes_back_and_aligned_keeps_origin() {
        let mut set = bones();
        let mut physics = MmdPhysics::new(Box::new(MockEngine::new()));
        physics.set_gravity(Vec3::ZERO);
        physics.build(
            &mut set,
            &[
                sphere("頭", 1, ControlType::DynamicAlignedToBone),
                sphere("髪", 2, ControlType::DynamicSimulated),
            ],
            &[],
        );
        let moved = Mat4::from_rotation_translation(Quat::from_rotation_z(0.5), Vec3::new(4.0, 4.0, 0.0));
        let (head, hair) = (physics.rigid_bodies()[0].body, physics.rigid_bodies()[1].body);
        physics.engine_mut().set_transform(head, moved);
        physics.engine_mut().set_transform(hair, moved);

        assert!(physics.sync_bones(&mut set));
        let head_world = set.get_bone(1).unwrap().global_transform();
        assert!((head_world.w_axis.truncate() - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
        assert!(head_world.x_axis.abs_diff_eq(moved.x_axis, 1e-5));
        let hair_world = set.get_bone(2).unwrap().global_transform();
        assert!(hair_world.abs_diff_eq(moved, 1e-5));
    }

    #[test]
    fn test_resume_rotates_saved_velocity_by_ancestor_motion() {
        let mut set = bones();
        let mut physics = bridge(&mut set);
        let hair = physics.rigid_bodies()[1].body;
        physics.engine_mut().set_velocities(hair, Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 2.0));

        physics.set_simulation_enabled(&mut set, false, true);
        assert_eq!(physics.engine().is_kinematic(hair), Some(true));

        // 头骨（第一个非模拟祖先）平移并绕 Y 旋转 90 度
        {
            let head = set.get_bone_mut(1).unwrap();
            head.animation_translate = Vec3::new(2.0, 0.0, 0.0);
            head.animation_rotate = Quat::from_rotation_y(FRAC_PI_2);
        }
        set.update_all();
        physics.set_simulation_enabled(&mut set, true, true);

        let state = physics.engine().state(hair).unwrap();
        assert_eq!(physics.engine().is_kinematic(hair), Some(false));
        assert!((state.linear_velocity - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
        assert!((state.angular_velocity - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
        // 刚体随头骨一起移动：头 (2,1,0)，髪 在其上方 1
        assert!((state.transform.w_axis.truncate() - Vec3::new(2.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_resume_without_preserve_snaps_to_bone() {
        let mut set = bones();
        let mut physics = bridge(&mut set);
        let hair = physics.rigid_bodies()[1].body;
        physics.engine_mut().set_velocities(hair, Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO);
        physics.set_simulation_enabled(&mut set, false, false);
        set.get_bone_mut(0).unwrap().animation_translate = Vec3::new(0.0, 0.0, 5.0);
        set.update_all();
        physics.set_simulation_enabled(&mut set, true, false);
        let state = physics.engine().state(hair).unwrap();
        assert!((state.transform.w_axis.truncate() - Vec3::new(0.0, 2.0, 5.0)).length() < 1e-5);
    }

    #[test]
    fn test_control_mode_on_bone_without_body_is_noop() {
        let mut set = bones();
        let mut physics = bridge(&mut set);
        let before: Vec<_> = set.bones().iter().map(|b| b.flags).collect();
        physics.set_control_mode(&mut set, 0, false, true);
        physics.set_control_mode(&mut set, 1, false, true);
        physics.set_control_mode(&mut set, 99, true, true);
        let after: Vec<_> = set.bones().iter().map(|b| b.flags).collect();
        assert_eq!(before, after);
        assert_eq!(physics.engine().is_kinematic(physics.rigid_bodies()[1].body), Some(false));
    }

    #[test]
    fn test_per_bone_switch_roundtrip() {
        let mut set = bones();
        let mut physics = bridge(&mut set);
        let hair = physics.rigid_bodies()[1].body;
        physics.engine_mut().set_velocities(hair, Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO);

        physics.set_control_mode(&mut set, 2, false, true);
        assert!(!set.get_bone(2).unwrap().is_simulated());
        assert!(physics.rigid_bodies()[1].is_kinematic());
        assert!(physics.rigid_bodies()[1].saved_state().is_some());

        // 运动学期间不写回骨骼
        physics.engine_mut().set_transform(hair, Mat4::from_translation(Vec3::splat(9.0)));
        physics.sync_bones(&mut set);
        assert!((set.world_position(2) - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);

        physics.set_control_mode(&mut set, 2, true, true);
        assert!(set.get_bone(2).unwrap().is_simulated());
        let state = physics.engine().state(hair).unwrap();
        assert!((state.linear_velocity - Vec3::Y).length() < 1e-5);
        assert!((state.transform.w_axis.truncate() - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_pinned_body_stays_kinematic_after_resume() {
        let mut set = bones();
        let mut physics = bridge(&mut set);
        let hair = physics.rigid_bodies()[1].body;

        physics.set_control_mode(&mut set, 2, false, true);
        physics.set_simulation_enabled(&mut set, false, true);
        physics.set_simulation_enabled(&mut set, true, true);

        assert_eq!(physics.engine().is_kinematic(hair), Some(true));
        assert!(physics.rigid_bodies()[1].is_pinned());
        assert!(!set.get_bone(2).unwrap().is_simulated());

        // 固定的刚体不写回骨骼
        physics.engine_mut().set_transform(hair, Mat4::from_translation(Vec3::splat(9.0)));
        assert!(!physics.sync_bones(&mut set));
        assert!((set.world_position(2) - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);

        physics.set_control_mode(&mut set, 2, true, true);
        assert_eq!(physics.engine().is_kinematic(hair), Some(false));
        assert!(set.get_bone(2).unwrap().is_simulated());
    }

    #[test]
    fn test_control_mode_while_disabled_applies_on_resume() {
        let mut set = bones();
        let mut physics = bridge(&mut set);
        physics.set_gravity(Vec3::new(0.0, -98.0, 0.0));
        let hair = physics.rigid_bodies()[1].body;

        physics.set_control_mode(&mut set, 2, false, false);
        physics.set_simulation_enabled(&mut set, false, false);
        physics.set_control_mode(&mut set, 2, true, false);

        // 关闭期间只记录，刚体仍跟随骨骼
        assert_eq!(physics.engine().is_kinematic(hair), Some(true));
        assert!(set.get_bone(2).unwrap().is_simulated());
        for _ in 0..30 {
            physics.sync_bodies(&set);
            physics.step_simulation(1.0);
        }
        let t = physics.engine().transform(hair).unwrap();
        assert!((t.w_axis.truncate() - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);

        physics.set_simulation_enabled(&mut set, true, false);
        assert_eq!(physics.engine().is_kinematic(hair), Some(false));
        assert!(physics.sync_bones(&mut set));
        assert!((set.world_position(2) - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_aligned_child_uses_parent_written_this_frame() {
        let mut set = bones();
        let mut physics = MmdPhysics::new(Box::new(MockEngine::new()));
        physics.set_gravity(Vec3::ZERO);
        // 子骨骼的刚体排在父骨骼之前
        physics.build(
            &mut set,
            &[
                sphere("髪", 2, ControlType::DynamicAlignedToBone),
                sphere("頭", 1, ControlType::DynamicSimulated),
            ],
            &[],
        );
        let (hair, head) = (physics.rigid_bodies()[0].body, physics.rigid_bodies()[1].body);
        physics.engine_mut().set_transform(head, Mat4::from_translation(Vec3::new(5.0, 1.0, 0.0)));
        let spun = Mat4::from_rotation_translation(Quat::from_rotation_z(0.5), Vec3::new(9.0, 9.0, 0.0));
        physics.engine_mut().set_transform(hair, spun);

        assert!(physics.sync_bones(&mut set));
        assert!((set.world_position(1) - Vec3::new(5.0, 1.0, 0.0)).length() < 1e-5);
        assert!((set.world_position(2) - Vec3::new(5.0, 2.0, 0.0)).length() < 1e-5);
        assert!(set.get_bone(2).unwrap().global_transform().x_axis.abs_diff_eq(spun.x_axis, 1e-5));
    }
}
