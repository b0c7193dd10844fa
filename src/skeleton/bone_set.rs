//! 骨骼集合
//!
//! 持有所有骨骼，维护父子关系缓存和更新顺序。
//! 骨骼之间只通过索引引用。

use std::collections::HashMap;
use glam::{Vec3, Quat, Mat4};

use super::bone_link::{BoneLink, BoneFlags};
use crate::{MmdError, Result};

/// 骨骼集合
#[derive(Clone, Debug)]
pub struct BoneSet {
    bones: Vec<BoneLink>,
    name_to_index: HashMap<String, usize>,
    /// 子骨骼缓存
    children_cache: Vec<Vec<usize>>,
    /// 父骨骼总在子骨骼之前的更新顺序
    update_order: Vec<usize>,
    /// 模型根偏移（动作切换时的中心重定位）
    root_offset: Vec3,
}

impl BoneSet {
    /// 构建骨骼集合
    ///
    /// 计算 body_shift、子骨骼缓存与拓扑顺序，根骨骼标记为 MOTION_INDEPENDENT。
    pub fn new(mut bones: Vec<BoneLink>) -> Result<Self> {
        let count = bones.len();
        let mut children_cache = vec![Vec::new(); count];
        let mut roots = Vec::new();

        for (i, bone) in bones.iter().enumerate() {
            match bone.parent_id() {
                Some(p) if p >= count => {
                    return Err(MmdError::BoneIndexOutOfRange { index: bone.parent_index, count });
                }
                Some(p) if p == i => {
                    return Err(MmdError::InvalidHierarchy { bone: i, parent: bone.parent_index });
                }
                Some(p) => children_cache[p].push(i),
                None => roots.push(i),
            }
        }

        // 广度优先得到更新顺序，环路中的骨骼不会被访问到
        let mut update_order = Vec::with_capacity(count);
        let mut queue = std::collections::VecDeque::from(roots);
        while let Some(idx) = queue.pop_front() {
            update_order.push(idx);
            queue.extend(children_cache[idx].iter().copied());
        }
        if update_order.len() != count {
            let bad = (0..count)
                .find(|i| !update_order.contains(i))
                .unwrap_or(0);
            return Err(MmdError::InvalidHierarchy { bone: bad, parent: bones[bad].parent_index });
        }

        let initial: Vec<Vec3> = bones.iter().map(|b| b.initial_position).collect();
        let mut name_to_index = HashMap::with_capacity(count);
        for (i, bone) in bones.iter_mut().enumerate() {
            bone.internal_id = i;
            bone.body_shift = match bone.parent_id() {
                Some(p) => initial[i] - initial[p],
                None => {
                    bone.flags.insert(BoneFlags::MOTION_INDEPENDENT);
                    initial[i]
                }
            };
            // 同名骨骼以第一个为准
            name_to_index.entry(bone.name.clone()).or_insert(i);
        }

        let mut set = Self {
            bones,
            name_to_index,
            children_cache,
            update_order,
            root_offset: Vec3::ZERO,
        };
        set.update_all();
        for bone in &mut set.bones {
            bone.save_transform();
        }
        Ok(set)
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    #[inline]
    pub fn get_bone(&self, idx: usize) -> Option<&BoneLink> {
        self.bones.get(idx)
    }

    #[inline]
    pub fn get_bone_mut(&mut self, idx: usize) -> Option<&mut BoneLink> {
        self.bones.get_mut(idx)
    }

    #[inline]
    pub fn bones(&self) -> &[BoneLink] {
        &self.bones
    }

    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        self.children_cache.get(idx).map(|c| c.as_slice()).unwrap_or(&[])
    }

    #[inline]
    pub fn root_offset(&self) -> Vec3 {
        self.root_offset
    }

    pub fn set_root_offset(&mut self, offset: Vec3) {
        self.root_offset = offset;
    }

    /// 骨骼世界位置，越界返回原点
    pub fn world_position(&self, idx: usize) -> Vec3 {
        self.bones.get(idx).map(|b| b.position()).unwrap_or(Vec3::ZERO)
    }

    /// 所有骨骼的世界变换（供渲染读取）
    pub fn world_transforms(&self) -> Vec<Mat4> {
        self.bones.iter().map(|b| b.local_to_world).collect()
    }

    // ========================================
    // 变换更新
    // ========================================

    #[inline]
    fn parent_world(&self, idx: usize) -> Mat4 {
        match self.bones[idx].parent_id() {
            Some(p) => self.bones[p].local_to_world,
            None => Mat4::from_translation(self.root_offset),
        }
    }

    /// 按层级顺序更新所有骨骼
    pub fn update_all(&mut self) {
        for i in 0..self.update_order.len() {
            let idx = self.update_order[i];
            self.bones[idx].compute_local_transform();
            let parent = self.parent_world(idx);
            self.bones[idx].local_to_world = parent * self.bones[idx].local_to_parent;
        }
    }

    /// 重新计算单个骨骼的本地变换，并递归更新整棵子树
    pub fn update_from(&mut self, idx: usize) {
        if idx >= self.bones.len() {
            return;
        }
        self.bones[idx].compute_local_transform();
        self.update_global_transform_recursive(idx);
    }

    /// 递归更新全局变换（使用已有的本地变换）
    fn update_global_transform_recursive(&mut self, idx: usize) {
        let parent = self.parent_world(idx);
        self.bones[idx].local_to_world = parent * self.bones[idx].local_to_parent;

        for c in 0..self.children_cache[idx].len() {
            let child = self.children_cache[idx][c];
            self.update_global_transform_recursive(child);
        }
    }

    /// 物理写回后，刷新挂在模拟骨骼下面的非模拟骨骼
    pub fn propagate_from_simulated(&mut self) {
        let mut dirty = vec![false; self.bones.len()];
        for i in 0..self.update_order.len() {
            let idx = self.update_order[i];
            if self.bones[idx].is_simulated() {
                dirty[idx] = true;
                continue;
            }
            if let Some(p) = self.bones[idx].parent_id() {
                if dirty[p] {
                    self.bones[idx].local_to_world = self.bones[p].local_to_world * self.bones[idx].local_to_parent;
                    dirty[idx] = true;
                }
            }
        }
    }

    // ========================================
    // 姿势操作
    // ========================================

    /// 清零 IK 控制骨骼的姿势（每帧动作应用前）
    pub fn reset_ik_bones(&mut self) {
        for bone in &mut self.bones {
            if bone.is_under_ik() {
                bone.reset_animation();
            }
        }
    }

    /// 清零所有骨骼 Morph 偏移
    pub fn reset_morphs(&mut self) {
        for bone in &mut self.bones {
            bone.reset_morph();
        }
    }

    /// 把所有骨骼姿势向默认姿势收缩
    ///
    /// rate = 1 保持不变，rate = 0 回到默认
    pub fn smear_all_to_default(&mut self, rate: f32) {
        for bone in &mut self.bones {
            bone.animation_translate = Vec3::ZERO.lerp(bone.animation_translate, rate);
            bone.animation_rotate = Quat::IDENTITY.slerp(bone.animation_rotate, rate);
        }
    }

    /// 保存所有骨骼的当前全局变换
    pub fn save_transforms(&mut self) {
        for bone in &mut self.bones {
            bone.save_transform();
        }
    }

    /// 回到初始姿势
    pub fn reset_pose(&mut self) {
        for bone in &mut self.bones {
            bone.reset_animation();
            bone.reset_morph();
        }
        self.update_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> BoneSet {
        BoneSet::new(vec![
            BoneLink::new("センター").with_parent(-1, Vec3::new(0.0, 1.0, 0.0)),
            BoneLink::new("上半身").with_parent(0, Vec3::new(0.0, 2.0, 0.0)),
            BoneLink::new("首").with_parent(1, Vec3::new(0.0, 3.0, 0.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_rest_pose() {
        let set = chain();
        assert!((set.world_position(2) - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-6);
        assert!(set.get_bone(0).unwrap().has_motion_independency());
        assert!(!set.get_bone(1).unwrap().has_motion_independency());
        assert_eq!(set.find_bone_by_name("首"), Some(2));
        assert_eq!(set.children(0), &[1]);
    }

    #[test]
    fn test_update_from_propagates() {
        let mut set = chain();
        set.get_bone_mut(1).unwrap().animation_rotate =
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        set.update_from(1);
        // 上半身绕 Z 旋转 90 度，首从 (0,3,0) 转到 (-1,2,0)
        assert!((set.world_position(2) - Vec3::new(-1.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_root_offset() {
        let mut set = chain();
        set.set_root_offset(Vec3::new(5.0, 0.0, 0.0));
        set.update_all();
        assert!((set.world_position(2) - Vec3::new(5.0, 3.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_smear_to_default() {
        let mut set = chain();
        set.get_bone_mut(0).unwrap().animation_translate = Vec3::new(2.0, 0.0, 0.0);
        set.smear_all_to_default(0.5);
        assert!((set.get_bone(0).unwrap().animation_translate.x - 1.0).abs() < 1e-6);
        set.smear_all_to_default(0.0);
        assert_eq!(set.get_bone(0).unwrap().animation_translate, Vec3::ZERO);
    }

    #[test]
    fn test_invalid_parent() {
        let result = BoneSet::new(vec![BoneLink::new("a").with_parent(3, Vec3::ZERO)]);
        assert!(matches!(result, Err(MmdError::BoneIndexOutOfRange { .. })));

        // 互为父子
        let result = BoneSet::new(vec![
            BoneLink::new("a").with_parent(1, Vec3::ZERO),
            BoneLink::new("b").with_parent(0, Vec3::ZERO),
        ]);
        assert!(matches!(result, Err(MmdError::InvalidHierarchy { .. })));
    }
}
