//! MMD 刚体与关节定义
//!
//! 刚体相对骨骼的位置在构建时确定：
//! 刚体世界变换 = 骨骼世界变换 * offset。

use glam::{EulerRot, Mat4, Quat, Vec3};

use super::engine::{BodyId, BodyShape, BodyState, RigidBodyDesc};
use crate::config::EngineConfig;

/// 刚体控制方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ControlType {
    /// 始终跟随骨骼
    #[default]
    KinematicOnly,
    /// 物理模拟，结果写回骨骼
    DynamicSimulated,
    /// 物理模拟，只写回旋转，位置保持骨骼动画位置
    DynamicAlignedToBone,
}

impl ControlType {
    /// 对应模型文件中的刚体类型编号
    pub fn from_mode(mode: u8) -> Self {
        match mode {
            1 => Self::DynamicSimulated,
            2 => Self::DynamicAlignedToBone,
            _ => Self::KinematicOnly,
        }
    }

    #[inline]
    pub fn is_dynamic(self) -> bool {
        self != Self::KinematicOnly
    }
}

/// 刚体定义（由模型加载方提供）
#[derive(Clone, Debug)]
pub struct RigidBodyDef {
    pub name: String,
    /// 关联骨骼，-1 表示无
    pub bone_index: i32,
    pub control: ControlType,
    pub shape: BodyShape,
    /// 相对骨骼原点的位置
    pub position: Vec3,
    /// 欧拉角 (弧度, 按 ZYX 顺序应用)
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub friction: f32,
    pub restitution: f32,
    pub group: u8,
    pub group_mask: u16,
}

impl RigidBodyDef {
    pub fn new(name: impl Into<String>, bone_index: i32, control: ControlType, shape: BodyShape) -> Self {
        Self {
            name: name.into(),
            bone_index,
            control,
            shape,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            mass: 1.0,
            linear_damping: 0.5,
            angular_damping: 0.5,
            friction: 0.5,
            restitution: 0.0,
            group: 0,
            group_mask: 0xFFFF,
        }
    }

    pub fn with_offset(mut self, position: Vec3, rotation: Vec3) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    /// 相对骨骼的局部变换
    pub fn local_transform(&self) -> Mat4 {
        let rot = Quat::from_euler(EulerRot::ZYX, self.rotation.z, self.rotation.y, self.rotation.x);
        Mat4::from_rotation_translation(rot, self.position)
    }

    pub(crate) fn to_desc(&self, transform: Mat4, config: &EngineConfig) -> RigidBodyDesc {
        RigidBodyDesc {
            name: self.name.clone(),
            shape: self.shape,
            mass: self.mass * config.mass_scale,
            linear_damping: self.linear_damping * config.linear_damping_scale,
            angular_damping: self.angular_damping * config.angular_damping_scale,
            friction: self.friction,
            restitution: self.restitution,
            group: self.group,
            group_mask: self.group_mask,
            transform,
            kinematic: !self.control.is_dynamic(),
        }
    }
}

/// 关节定义，刚体以定义列表中的下标引用
#[derive(Clone, Debug)]
pub struct JointDef {
    pub name: String,
    pub body_a: usize,
    pub body_b: usize,
    /// 模型空间位置
    pub position: Vec3,
    pub rotation: Vec3,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
}

impl JointDef {
    pub fn transform(&self) -> Mat4 {
        let rot = Quat::from_euler(EulerRot::ZYX, self.rotation.z, self.rotation.y, self.rotation.x);
        Mat4::from_rotation_translation(rot, self.position)
    }
}

/// 桥接层持有的刚体
#[derive(Clone, Debug)]
pub struct MmdRigidBody {
    pub name: String,
    pub bone_index: i32,
    pub control: ControlType,
    pub body: BodyId,
    offset: Mat4,
    offset_inv: Mat4,
    pub initial_transform: Mat4,
    /// 当前是否处于运动学状态
    kinematic: bool,
    /// 切换为运动学时保存的状态
    saved: Option<BodyState>,
    /// 按骨骼切换固定为运动学，整体重新开启模拟时保持
    pinned: bool,
}

impl MmdRigidBody {
    pub fn new(def: &RigidBodyDef, body: BodyId, initial_transform: Mat4) -> Self {
        let offset = def.local_transform();
        Self {
            name: def.name.clone(),
            bone_index: def.bone_index,
            control: def.control,
            body,
            offset,
            offset_inv: offset.inverse(),
            initial_transform,
            kinematic: !def.control.is_dynamic(),
            saved: None,
            pinned: false,
        }
    }

    #[inline]
    pub fn bone(&self) -> Option<usize> {
        (self.bone_index >= 0).then_some(self.bone_index as usize)
    }

    #[inline]
    pub fn is_kinematic(&self) -> bool {
        self.kinematic
    }

    #[inline]
    pub(crate) fn set_kinematic_flag(&mut self, kinematic: bool) {
        self.kinematic = kinematic;
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    #[inline]
    pub(crate) fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
    }

    #[inline]
    pub fn saved_state(&self) -> Option<&BodyState> {
        self.saved.as_ref()
    }

    #[inline]
    pub(crate) fn store_state(&mut self, state: Option<BodyState>) {
        self.saved = state;
    }

    /// 骨骼世界变换 → 刚体世界变换
    #[inline]
    pub fn body_transform(&self, bone_world: Mat4) -> Mat4 {
        bone_world * self.offset
    }

    /// 刚体世界变换 → 骨骼世界变换
    #[inline]
    pub fn bone_transform(&self, body_world: Mat4) -> Mat4 {
        body_world * self.offset_inv
    }

    /// 只取刚体旋转，原点使用骨骼动画位置
    pub fn bone_transform_aligned(&self, body_world: Mat4, bone_origin: Vec3) -> Mat4 {
        let mut m = self.bone_transform(body_world);
        m.w_axis = bone_origin.extend(1.0);
        m
    }
}
