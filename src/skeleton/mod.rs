//! 骨骼系统
//!
//! - BoneLink: 单个骨骼节点，持有动作 / Morph / 物理三种姿势来源
//! - BoneSet: 骨骼层次结构和更新顺序
//! - IkSolver: CCD IK 求解器，通过 ChainSolver 接口可替换

mod bone_link;
mod bone_set;
mod ik_solver;

pub use bone_link::{BoneLink, BoneFlags};
pub use bone_set::BoneSet;
pub use ik_solver::{IkChain, ChainSolver, IkSolver, chain_error};

use glam::{Vec3, Quat, Mat4};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 骨骼变换数据
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl BoneTransform {
    /// 骨骼当前的动作姿势（不含 Morph）
    #[inline]
    pub fn from_bone(bone: &BoneLink) -> Self {
        Self {
            translation: bone.animation_translate,
            rotation: bone.animation_rotate,
            scale: Vec3::ONE,
        }
    }

    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// 从矩阵分解
    #[inline]
    pub fn from_matrix(m: Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self { translation, rotation, scale }
    }
}
