//! MMD 模型
//!
//! 把骨骼、Morph、IK 链、动作层和物理桥接组合成每帧流程：
//! 动作合成 → 骨骼 Morph → 骨骼更新 → IK → 物理同步。
//! 同时提供动作、IK 开关和物理开关的控制接口。

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::animation::{Motion, MotionEvent, MotionKey, MotionLayer, MotionTarget, Pose, StartOptions};
use crate::capability::{CapabilityTable, CAPABILITY_IK_SOLVER, CAPABILITY_VERTEX_INDEX};
use crate::morph::{MorphManager, VertexIndexPolicy, WrapCompat};
use crate::physics::{JointDef, MmdPhysics, PhysicsEngine, RigidBodyDef};
use crate::skeleton::{BoneFlags, BoneSet, ChainSolver, IkChain, IkSolver};
use crate::{MmdError, Result};

/// MMD 模型
pub struct MmdModel {
    pub name: String,
    bones: BoneSet,
    morphs: MorphManager,
    ik_chains: Vec<IkChain>,
    motions: MotionLayer,
    physics: Option<MmdPhysics>,
    visible: bool,
    capabilities: CapabilityTable,
    /// 动作层本帧的合成结果（IK 和物理之前）
    motion_pose: Pose,
    /// 下一次步进后重新开启物理
    resume_physics: bool,
}

impl MmdModel {
    pub fn new(name: impl Into<String>, bones: BoneSet, morphs: MorphManager) -> Self {
        let motion_pose = Pose::capture(&bones, &morphs, true);
        Self {
            name: name.into(),
            bones,
            morphs,
            ik_chains: Vec::new(),
            motions: MotionLayer::new(),
            physics: None,
            visible: true,
            capabilities: CapabilityTable::with_defaults(),
            motion_pose,
            resume_physics: false,
        }
    }

    /// 添加 IK 链
    ///
    /// 链接骨骼和末端骨骼标记为 UNDER_IK，每帧动作应用前清零。
    pub fn add_ik_chain(&mut self, chain: IkChain) -> Result<usize> {
        chain.validate(&self.bones)?;
        for &idx in chain.links.iter().chain(std::iter::once(&chain.target)) {
            if let Some(bone) = self.bones.get_bone_mut(idx) {
                bone.flags.insert(BoneFlags::UNDER_IK);
            }
        }
        self.ik_chains.push(chain);
        Ok(self.ik_chains.len() - 1)
    }

    /// 替换能力表，必需的能力缺失时拒绝
    pub fn set_capabilities(&mut self, table: CapabilityTable) -> Result<()> {
        table.require::<dyn ChainSolver>(CAPABILITY_IK_SOLVER)?;
        table.require::<dyn VertexIndexPolicy>(CAPABILITY_VERTEX_INDEX)?;
        self.capabilities = table;
        Ok(())
    }

    /// 构建物理，需在初始姿势下调用
    pub fn build_physics(&mut self, engine: Box<dyn PhysicsEngine>, bodies: &[RigidBodyDef], joints: &[JointDef]) {
        let mut physics = MmdPhysics::new(engine);
        physics.build(&mut self.bones, bodies, joints);
        self.physics = Some(physics);
    }

    /// 使用 Rapier 构建物理
    pub fn build_physics_rapier(&mut self, bodies: &[RigidBodyDef], joints: &[JointDef]) {
        let mut physics = MmdPhysics::with_rapier();
        physics.build(&mut self.bones, bodies, joints);
        self.physics = Some(physics);
    }

    // ========================================
    // 每帧流程
    // ========================================

    /// 前进 frames 帧（30 帧 = 1 秒），返回动作状态变化事件
    pub fn update(&mut self, frames: f32) -> &[MotionEvent] {
        self.bones.reset_ik_bones();

        let mut target = MotionTarget {
            bones: &mut self.bones,
            morphs: &mut self.morphs,
            visible: &mut self.visible,
        };
        self.motion_pose = self.motions.composite(frames, &mut target);

        self.morphs.apply_bone_morphs(&mut self.bones);
        self.bones.update_all();
        self.solve_ik();
        self.update_physics(frames);

        self.motions.events()
    }

    fn ik_solver(&self) -> Arc<dyn ChainSolver> {
        self.capabilities
            .get::<dyn ChainSolver>(CAPABILITY_IK_SOLVER)
            .unwrap_or_else(|| Arc::new(IkSolver::new()))
    }

    /// 求解所有 IK 链；物理开启时跳过由物理驱动的链
    fn solve_ik(&mut self) {
        let solver = self.ik_solver();
        let physics_on = self.physics.as_ref().is_some_and(|p| p.is_enabled());
        for chain in &self.ik_chains {
            if physics_on && chain.is_simulated(&self.bones) {
                continue;
            }
            solver.solve(chain, &mut self.bones);
        }
    }

    fn update_physics(&mut self, frames: f32) {
        let Some(physics) = self.physics.as_mut() else { return };
        physics.sync_bodies(&self.bones);
        physics.step_simulation(frames);

        if self.resume_physics {
            self.resume_physics = false;
            physics.set_simulation_enabled(&mut self.bones, true, true);
        }

        if physics.sync_bones(&mut self.bones) {
            self.bones.propagate_from_simulated();
        }
    }

    // ========================================
    // 动作控制
    // ========================================

    pub fn start_motion(&mut self, name: &str, motion: Arc<Motion>, options: StartOptions) -> MotionKey {
        self.motions.start_motion(name, motion, options, &mut self.bones, &self.morphs)
    }

    pub fn swap_motion(&mut self, name: &str, motion: Arc<Motion>) -> Result<()> {
        self.motions.swap_motion(name, motion, &mut self.bones, &self.morphs)
    }

    pub fn delete_motion(&mut self, name: &str) -> Result<()> {
        self.motions.delete_motion(name)
    }

    pub fn configure_motion(&mut self, name: &str, key: &str, value: &str) -> Result<bool> {
        self.motions.configure_motion(name, key, value)
    }

    /// 速度渐变，见 MotionLayer::set_motion_speed_rate
    pub fn set_motion_speed_rate(&mut self, name: &str, rate: f32, length: f32, target_frame: f32) -> Result<()> {
        self.motions.set_motion_speed_rate(name, rate, length, target_frame)
    }

    pub fn set_motion_blend_rate(&mut self, name: &str, rate: f32) -> Result<()> {
        self.motions.set_motion_blend_rate(name, rate)
    }

    // ========================================
    // IK 控制
    // ========================================

    /// 按 IK 骨骼名开关 IK 链
    pub fn set_ik_enabled(&mut self, bone_name: &str, enabled: bool) -> Result<()> {
        let chain = self
            .bones
            .find_bone_by_name(bone_name)
            .filter(|&idx| self.ik_chains.iter().any(|c| c.destination == idx))
            .ok_or_else(|| MmdError::InvalidIkChain(format!("no IK chain for bone '{}'", bone_name)))?;
        if let Some(bone) = self.bones.get_bone_mut(chain) {
            bone.set_enable_ik(enabled);
        }
        Ok(())
    }

    pub fn is_ik_enabled(&self, bone_name: &str) -> bool {
        self.bones
            .find_bone_by_name(bone_name)
            .and_then(|idx| self.bones.get_bone(idx))
            .is_some_and(|b| b.enable_ik())
    }

    // ========================================
    // 物理控制
    // ========================================

    /// 切换单个骨骼的物理控制，没有刚体的骨骼不受影响
    pub fn set_bone_physics(&mut self, bone_name: &str, dynamic: bool, preserve: bool) {
        let Some(physics) = self.physics.as_mut() else { return };
        let Some(bone) = self.bones.find_bone_by_name(bone_name) else {
            log::debug!("[物理] 找不到骨骼 '{}'", bone_name);
            return;
        };
        physics.set_control_mode(&mut self.bones, bone, dynamic, preserve);
    }

    /// 整个模型开关物理
    pub fn set_physics_enabled(&mut self, enabled: bool, preserve: bool) {
        self.resume_physics = false;
        if let Some(physics) = self.physics.as_mut() {
            physics.set_simulation_enabled(&mut self.bones, enabled, preserve);
        }
    }

    pub fn is_physics_enabled(&self) -> bool {
        self.physics.as_ref().is_some_and(|p| p.is_enabled())
    }

    /// 跳过下一次模拟（例如基础动作切换时），之后自动恢复并保留刚体状态
    pub fn skip_next_simulation(&mut self) {
        if let Some(physics) = self.physics.as_mut() {
            if physics.is_enabled() {
                physics.set_simulation_enabled(&mut self.bones, false, true);
                self.resume_physics = true;
            }
        }
    }

    /// 刚体回到骨骼当前位置
    pub fn reset_physics(&mut self) {
        if let Some(physics) = self.physics.as_mut() {
            physics.reset(&self.bones);
        }
    }

    // ========================================
    // 访问器
    // ========================================

    pub fn bones(&self) -> &BoneSet {
        &self.bones
    }

    pub fn bones_mut(&mut self) -> &mut BoneSet {
        &mut self.bones
    }

    pub fn morphs(&self) -> &MorphManager {
        &self.morphs
    }

    pub fn morphs_mut(&mut self) -> &mut MorphManager {
        &mut self.morphs
    }

    pub fn ik_chains(&self) -> &[IkChain] {
        &self.ik_chains
    }

    pub fn motions(&self) -> &MotionLayer {
        &self.motions
    }

    pub fn physics(&self) -> Option<&MmdPhysics> {
        self.physics.as_ref()
    }

    pub fn physics_mut(&mut self) -> Option<&mut MmdPhysics> {
        self.physics.as_mut()
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// 动作层的合成结果（IK 和物理之前）
    pub fn motion_pose(&self) -> &Pose {
        &self.motion_pose
    }

    /// 所有骨骼的最终世界变换
    pub fn world_transforms(&self) -> Vec<Mat4> {
        self.bones.world_transforms()
    }

    pub fn morph_weights(&self) -> Vec<f32> {
        self.morphs.weights()
    }

    /// 在基础顶点位置上叠加顶点 Morph，越界索引按能力表中的策略处理
    pub fn apply_vertex_morphs(&self, base: &[Vec3]) -> Vec<Vec3> {
        let mut positions = base.to_vec();
        match self.capabilities.get::<dyn VertexIndexPolicy>(CAPABILITY_VERTEX_INDEX) {
            Some(policy) => self.morphs.apply_vertex_morphs(&mut positions, policy.as_ref()),
            None => self.morphs.apply_vertex_morphs(&mut positions, &WrapCompat),
        }
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morph::{Morph, VertexMorphOffset};
    use crate::skeleton::BoneLink;

    fn leg_model() -> MmdModel {
        let bones = BoneSet::new(vec![
            BoneLink::new("センター").with_parent(-1, Vec3::new(0.0, 2.0, 0.0)),
            BoneLink::new("右足").with_parent(0, Vec3::new(0.0, 2.0, 0.0)),
            BoneLink::new("右ひざ").with_parent(1, Vec3::new(0.0, 1.0, 0.0)),
            BoneLink::new("右足首").with_parent(2, Vec3::new(0.0, 0.0, 0.0)),
            BoneLink::new("右足ＩＫ").with_parent(-1, Vec3::new(0.5, 0.5, 0.0)),
        ])
        .unwrap();
        let mut model = MmdModel::new("test", bones, MorphManager::new());
        model.add_ik_chain(IkChain::new(4, 3, vec![1, 2], 64, 0.5)).unwrap();
        model
    }

    #[test]
    fn test_ik_chain_marks_under_ik() {
        let model = leg_model();
        assert!(model.bones().get_bone(1).unwrap().is_under_ik());
        assert!(model.bones().get_bone(3).unwrap().is_under_ik());
        assert!(!model.bones().get_bone(4).unwrap().is_under_ik());
    }

    #[test]
    fn test_invalid_chain_rejected() {
        let mut model = leg_model();
        assert!(model.add_ik_chain(IkChain::new(4, 3, vec![], 10, 1.0)).is_err());
        assert!(model.add_ik_chain(IkChain::new(40, 3, vec![1], 10, 1.0)).is_err());
        assert_eq!(model.ik_chains().len(), 1);
    }

    #[test]
    fn test_update_solves_ik_and_switch() {
        let mut model = leg_model();
        model.update(1.0);
        let reach = (model.bones().world_position(3) - model.bones().world_position(4)).length();
        assert!(reach < 0.05, "reach {}", reach);

        model.set_ik_enabled("右足ＩＫ", false).unwrap();
        assert!(!model.is_ik_enabled("右足ＩＫ"));
        model.update(1.0);
        // IK 关闭后链接骨骼被清零，回到初始姿势
        assert!((model.bones().world_position(3) - Vec3::new(0.0, 0.0, 0.0)).length() < 1e-5);

        assert!(model.set_ik_enabled("右ひざ", true).is_err());
    }

    #[test]
    fn test_missing_capability_rejected() {
        let mut model = leg_model();
        assert!(matches!(model.set_capabilities(CapabilityTable::new()), Err(MmdError::Capability(_))));
        assert_eq!(model.capabilities().len(), 2);
    }

    #[test]
    fn test_vertex_morph_uses_policy() {
        let mut morphs = MorphManager::new();
        morphs.add_morph(Morph::vertex("あ", vec![VertexMorphOffset { vertex_index: 65536, offset: Vec3::X }]));
        let bones = BoneSet::new(vec![BoneLink::new("センター")]).unwrap();
        let mut model = MmdModel::new("m", bones, morphs);
        model.morphs_mut().set_morph_weight(0, 1.0);
        assert_eq!(model.apply_vertex_morphs(&[Vec3::ZERO]), vec![Vec3::X]);

        let mut table = CapabilityTable::with_defaults();
        table.register::<dyn VertexIndexPolicy>(CAPABILITY_VERTEX_INDEX, Arc::new(crate::morph::Strict));
        model.set_capabilities(table).unwrap();
        assert_eq!(model.apply_vertex_morphs(&[Vec3::ZERO]), vec![Vec3::ZERO]);
    }

    #[test]
    fn test_physics_ops_without_physics_are_noops() {
        let mut model = leg_model();
        model.set_bone_physics("右足", false, true);
        model.set_physics_enabled(false, true);
        model.skip_next_simulation();
        model.reset_physics();
        assert!(!model.is_physics_enabled());
        assert!(model.physics().is_none());
    }
}
