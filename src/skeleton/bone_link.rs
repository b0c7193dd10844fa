//! 骨骼节点
//!
//! 一个骨骼的姿势来源有三个：动作（含 IK 写入的旋转）、骨骼 Morph、物理写回。
//! 前两者合成本地变换，物理直接覆盖全局变换。

use glam::{Vec3, Quat, Mat4};
use bitflags::bitflags;

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// IK 开关（仅对 IK 链的目的骨骼有意义）
        const IK_ENABLED = 1 << 0;
        /// 由动态刚体驱动
        const SIMULATED = 1 << 1;
        /// 只能绕 X 轴旋转（膝盖）
        const LIMIT_ANGLE_X = 1 << 2;
        /// 不受其他控制骨骼影响（根骨骼及其直接子骨骼）
        const MOTION_INDEPENDENT = 1 << 3;
        /// IK 链接骨骼或 IK 目标骨骼，每帧动作前清零
        const UNDER_IK = 1 << 4;
    }
}

// ============================================================================
// 骨骼节点
// ============================================================================

/// 骨骼节点
///
/// local_to_world = parent.local_to_world * local_to_parent，
/// SIMULATED 骨骼的 local_to_world 由物理写回。
#[derive(Clone, Debug)]
pub struct BoneLink {
    // ========================================
    // 静态数据（初始化后不变）
    // ========================================

    /// 骨骼名称
    pub name: String,

    /// 骨骼内部索引
    pub(crate) internal_id: usize,

    /// 父骨骼索引 (-1 表示根骨骼)
    pub parent_index: i32,

    /// 骨骼标志
    pub flags: BoneFlags,

    /// 初始位置（模型空间）
    pub initial_position: Vec3,

    /// 相对于父骨骼的初始偏移（BoneSet 构建时计算）
    pub body_shift: Vec3,

    // ========================================
    // 动态数据（每帧更新）
    // ========================================

    /// 当前平移（动作与 IK 写入）
    pub animation_translate: Vec3,

    /// 当前旋转（动作与 IK 写入）
    pub animation_rotate: Quat,

    /// 骨骼 Morph 平移
    pub morph_translate: Vec3,

    /// 骨骼 Morph 旋转
    pub morph_rotate: Quat,

    /// 本地变换矩阵 (local_to_parent)
    pub local_to_parent: Mat4,

    /// 全局变换矩阵 (local_to_world)
    pub local_to_world: Mat4,

    /// 物理关闭时保存的全局变换，恢复模拟时计算位移用
    pub saved_world: Mat4,
}

impl BoneLink {
    /// 创建新骨骼
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            internal_id: 0,
            parent_index: -1,
            flags: BoneFlags::IK_ENABLED,
            initial_position: Vec3::ZERO,
            body_shift: Vec3::ZERO,
            animation_translate: Vec3::ZERO,
            animation_rotate: Quat::IDENTITY,
            morph_translate: Vec3::ZERO,
            morph_rotate: Quat::IDENTITY,
            local_to_parent: Mat4::IDENTITY,
            local_to_world: Mat4::IDENTITY,
            saved_world: Mat4::IDENTITY,
        }
    }

    /// 指定父骨骼和初始位置
    pub fn with_parent(mut self, parent_index: i32, initial_position: Vec3) -> Self {
        self.parent_index = parent_index;
        self.initial_position = initial_position;
        self
    }

    /// 追加标志
    pub fn with_flags(mut self, flags: BoneFlags) -> Self {
        self.flags |= flags;
        self
    }

    // ========================================
    // 访问器
    // ========================================

    /// 骨骼索引
    #[inline]
    pub fn link_id(&self) -> usize {
        self.internal_id
    }

    /// 父骨骼索引
    #[inline]
    pub fn parent_id(&self) -> Option<usize> {
        if self.parent_index >= 0 {
            Some(self.parent_index as usize)
        } else {
            None
        }
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_index < 0
    }

    /// 获取世界位置
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.local_to_world.col(3).truncate()
    }

    /// 获取世界旋转
    #[inline]
    pub fn rotation(&self) -> Quat {
        Quat::from_mat4(&self.local_to_world).normalize()
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 重置动画状态
    #[inline]
    pub fn reset_animation(&mut self) {
        self.animation_translate = Vec3::ZERO;
        self.animation_rotate = Quat::IDENTITY;
    }

    /// 重置骨骼 Morph 偏移
    #[inline]
    pub fn reset_morph(&mut self) {
        self.morph_translate = Vec3::ZERO;
        self.morph_rotate = Quat::IDENTITY;
    }

    /// 叠加骨骼 Morph 偏移
    #[inline]
    pub fn add_morph(&mut self, translate: Vec3, rotate: Quat) {
        self.morph_translate += translate;
        self.morph_rotate = rotate * self.morph_rotate;
    }

    /// 计算本地变换 (local_to_parent)
    ///
    /// 变换顺序：
    /// 1. 平移 = body_shift + animation_translate + morph_translate
    /// 2. 旋转 = morph_rotate * animation_rotate
    pub fn compute_local_transform(&mut self) {
        let translate = self.body_shift + self.animation_translate + self.morph_translate;
        let rotation = self.morph_rotate * self.animation_rotate;
        self.local_to_parent = Mat4::from_rotation_translation(rotation, translate);
    }

    /// 保存当前全局变换
    #[inline]
    pub fn save_transform(&mut self) {
        self.saved_world = self.local_to_world;
    }

    // ========================================
    // 矩阵访问（物理同步用）
    // ========================================

    #[inline]
    pub fn global_transform(&self) -> Mat4 {
        self.local_to_world
    }

    /// 物理写回时直接覆盖，不经过本地变换
    #[inline]
    pub fn set_global_transform(&mut self, transform: Mat4) {
        self.local_to_world = transform;
    }

    #[inline]
    pub fn local_transform(&self) -> Mat4 {
        self.local_to_parent
    }

    // ========================================
    // 标志检查方法
    // ========================================

    #[inline]
    pub fn enable_ik(&self) -> bool {
        self.flags.contains(BoneFlags::IK_ENABLED)
    }

    #[inline]
    pub fn set_enable_ik(&mut self, enabled: bool) {
        self.flags.set(BoneFlags::IK_ENABLED, enabled);
    }

    #[inline]
    pub fn is_simulated(&self) -> bool {
        self.flags.contains(BoneFlags::SIMULATED)
    }

    #[inline]
    pub fn set_simulated(&mut self, simulated: bool) {
        self.flags.set(BoneFlags::SIMULATED, simulated);
    }

    #[inline]
    pub fn is_limited_rotation_x(&self) -> bool {
        self.flags.contains(BoneFlags::LIMIT_ANGLE_X)
    }

    #[inline]
    pub fn has_motion_independency(&self) -> bool {
        self.flags.contains(BoneFlags::MOTION_INDEPENDENT)
    }

    #[inline]
    pub fn is_under_ik(&self) -> bool {
        self.flags.contains(BoneFlags::UNDER_IK)
    }
}

impl Default for BoneLink {
    fn default() -> Self {
        Self::new(String::new())
    }
}
