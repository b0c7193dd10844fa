//! IK 求解器 - CCD（循环坐标下降）
//!
//! 设计原则：
//! - 从末端向根部逐个调整链接骨骼
//! - 每调整一个链接立即刷新子树，下一个链接看到的是最新位置
//! - 支持单轴模式（膝盖等只能绕 X 轴弯曲的骨骼）

use glam::{Quat, EulerRot, Vec3};

use super::bone_set::BoneSet;
use crate::{MmdError, Result};

// ============================================================================
// 常量
// ============================================================================

const IK_PI: f32 = 3.1415926;
/// 目标与目的点足够接近（局部空间距离平方）
const MIN_DISTANCE: f32 = 0.0001;
/// 角度过小则跳过
const MIN_ANGLE: f32 = 0.00000001;
/// 非首次迭代时旋转轴过短则跳过
const MIN_AXIS: f32 = 0.000001;
/// 单轴骨骼允许的最小累计角度
const MIN_ROT_SUM: f32 = 0.002;
/// 受限后旋转过小则跳过
const MIN_ROTATION: f32 = 0.00001;

// ============================================================================
// IK 链
// ============================================================================

/// IK 链定义，随骨骼一起加载，之后不再修改
#[derive(Clone, Debug)]
pub struct IkChain {
    /// IK 骨骼（目的点），其 IK 开关决定本链是否求解
    pub destination: usize,
    /// 末端骨骼，求解使其到达目的点
    pub target: usize,
    /// 链接骨骼，从根到末端排列
    pub links: Vec<usize>,
    /// 最大迭代次数
    pub iterations: u32,
    /// 单步角度限制（弧度）
    pub angle_limit: f32,
}

impl IkChain {
    pub fn new(destination: usize, target: usize, links: Vec<usize>, iterations: u32, angle_limit: f32) -> Self {
        Self { destination, target, links, iterations, angle_limit }
    }

    /// 检查索引是否都在骨骼范围内
    pub fn validate(&self, bones: &BoneSet) -> Result<()> {
        let count = bones.len();
        for &idx in [self.destination, self.target].iter().chain(self.links.iter()) {
            if idx >= count {
                return Err(MmdError::BoneIndexOutOfRange { index: idx as i32, count });
            }
        }
        if self.links.is_empty() {
            return Err(MmdError::InvalidIkChain(format!(
                "chain of destination bone {} has no links", self.destination
            )));
        }
        if self.links.contains(&self.target) || self.links.contains(&self.destination) {
            return Err(MmdError::InvalidIkChain(format!(
                "chain of destination bone {} lists its target or destination as a link", self.destination
            )));
        }
        Ok(())
    }

    /// 紧挨末端的链接骨骼由物理驱动时，整条链可以跳过
    pub fn is_simulated(&self, bones: &BoneSet) -> bool {
        self.links
            .last()
            .and_then(|&idx| bones.get_bone(idx))
            .map(|b| b.is_simulated())
            .unwrap_or(false)
    }
}

// ============================================================================
// 求解器接口
// ============================================================================

/// IK 链求解器，可以通过能力表替换
pub trait ChainSolver: Send + Sync {
    fn solve(&self, chain: &IkChain, bones: &mut BoneSet);
}

/// CCD 求解器
#[derive(Clone, Copy, Debug)]
pub struct IkSolver {
    /// 求解前先刷新链接骨骼
    pub update_links_first: bool,
}

impl Default for IkSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IkSolver {
    pub fn new() -> Self {
        Self { update_links_first: true }
    }

    /// 刷新链接骨骼和末端骨骼
    fn update_link_bones(chain: &IkChain, bones: &mut BoneSet) {
        for &idx in &chain.links {
            bones.update_from(idx);
        }
        bones.update_from(chain.target);
    }

    /// 单轴骨骼的受限旋转
    ///
    /// 返回 None 表示本次跳过该链接
    fn limit_rotation_x(rot: Quat, current: Quat, angle: f32, iteration: u32, angle_limit: f32) -> Option<Quat> {
        let (_, _, mut x) = rot.to_euler(EulerRot::ZYX);
        let (_, _, mut cx) = current.to_euler(EulerRot::ZYX);

        if iteration == 0 && cx < angle_limit {
            // 首次迭代直接转到限制方向，腿部收敛更快
            return Some(Quat::from_rotation_x(angle.abs()));
        }

        // y、z 必须为 0，x 在 0 到 PI 之间
        if cx < -IK_PI * 0.5 {
            cx += IK_PI * 2.0;
        }
        if x + cx > IK_PI {
            x = IK_PI - cx;
        }
        if MIN_ROT_SUM > x + cx {
            x = MIN_ROT_SUM - cx;
        }
        if x.abs() < MIN_ROTATION {
            return None;
        }
        Some(Quat::from_rotation_x(x))
    }
}

impl ChainSolver for IkSolver {
    fn solve(&self, chain: &IkChain, bones: &mut BoneSet) {
        let enabled = bones.get_bone(chain.destination).map(|b| b.enable_ik()).unwrap_or(false);
        if !enabled {
            return;
        }

        let dest_pos = bones.world_position(chain.destination);

        if self.update_links_first {
            Self::update_link_bones(chain, bones);
        }

        let orig_target_rot = match bones.get_bone(chain.target) {
            Some(b) => b.animation_rotate,
            None => return,
        };

        'iteration: for ite in 0..chain.iterations {
            // 从末端向根部
            for &link in chain.links.iter().rev() {
                let target_pos = bones.world_position(chain.target);
                let link_world = match bones.get_bone(link) {
                    Some(b) => b.local_to_world,
                    None => continue,
                };
                let link_pos = link_world.col(3).truncate();
                if link_pos == target_pos || link_pos == dest_pos {
                    continue;
                }

                let inv = link_world.inverse();
                let local_dest = inv.transform_point3(dest_pos);
                let local_target = inv.transform_point3(target_pos);

                if local_dest.distance_squared(local_target) < MIN_DISTANCE {
                    break 'iteration;
                }

                let local_dest = local_dest.normalize_or_zero();
                let local_target = local_target.normalize_or_zero();

                let dot = local_dest.dot(local_target);
                if dot > 1.0 {
                    continue;
                }
                let mut angle = dot.max(-1.0).acos();
                if angle.abs() < MIN_ANGLE {
                    continue;
                }
                angle = angle.clamp(-chain.angle_limit, chain.angle_limit);

                let axis = local_target.cross(local_dest);
                let axis_len2 = axis.length_squared();
                if axis_len2 < MIN_AXIS && ite > 0 {
                    continue;
                }
                if axis_len2 < f32::EPSILON * f32::EPSILON {
                    continue;
                }
                let mut rot = Quat::from_axis_angle(axis / axis_len2.sqrt(), angle);

                let Some(bone) = bones.get_bone_mut(link) else { continue };
                if bone.is_limited_rotation_x() {
                    match Self::limit_rotation_x(rot, bone.animation_rotate, angle, ite, chain.angle_limit) {
                        Some(limited) => rot = limited,
                        None => continue,
                    }
                    bone.animation_rotate = (rot * bone.animation_rotate).normalize();
                } else {
                    bone.animation_rotate = (bone.animation_rotate * rot).normalize();
                }

                bones.update_from(link);
            }
        }

        // 末端骨骼只用于求解，恢复原旋转
        if let Some(target) = bones.get_bone_mut(chain.target) {
            target.animation_rotate = orig_target_rot;
        }
        bones.update_from(chain.target);
    }
}

/// 到达误差（末端到目的点的世界距离）
pub fn chain_error(chain: &IkChain, bones: &BoneSet) -> f32 {
    let d: Vec3 = bones.world_position(chain.target) - bones.world_position(chain.destination);
    d.length()
}
