//! Morph 管理器

use std::collections::HashMap;
use glam::{Vec3, Quat};

use crate::skeleton::BoneSet;
use super::{Morph, MorphType, VertexIndexPolicy};

/// 组合 Morph 最大展开深度
const MAX_GROUP_DEPTH: u32 = 16;
/// 权重低于此值的 Morph 不参与应用
const MIN_EFFECTIVE_WEIGHT: f32 = 0.001;

/// Morph 管理器
#[derive(Clone, Debug, Default)]
pub struct MorphManager {
    morphs: Vec<Morph>,
    name_to_index: HashMap<String, usize>,
}

impl MorphManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加 Morph，同名时以第一个为准
    pub fn add_morph(&mut self, morph: Morph) -> usize {
        let index = self.morphs.len();
        self.name_to_index.entry(morph.name.clone()).or_insert(index);
        self.morphs.push(morph);
        index
    }

    /// 通过名称查找 Morph
    pub fn find_morph_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// 获取 Morph 数量
    pub fn morph_count(&self) -> usize {
        self.morphs.len()
    }

    pub fn get_morph(&self, index: usize) -> Option<&Morph> {
        self.morphs.get(index)
    }

    /// 设置 Morph 权重
    pub fn set_morph_weight(&mut self, index: usize, weight: f32) {
        if let Some(morph) = self.morphs.get_mut(index) {
            morph.set_weight(weight);
        }
    }

    /// 获取 Morph 权重，越界返回 0
    pub fn get_morph_weight(&self, index: usize) -> f32 {
        self.morphs.get(index).map(|m| m.weight).unwrap_or(0.0)
    }

    /// 所有 Morph 的当前权重（供渲染读取）
    pub fn weights(&self) -> Vec<f32> {
        self.morphs.iter().map(|m| m.weight).collect()
    }

    /// 重置所有 Morph 权重
    pub fn reset_all_weights(&mut self) {
        for morph in &mut self.morphs {
            morph.reset();
        }
    }

    /// 所有权重向 0 收缩，rate = 1 保持不变
    pub fn smear_all_to_default(&mut self, rate: f32) {
        for morph in &mut self.morphs {
            morph.weight *= rate;
        }
    }

    // ========== Morph 应用 ==========

    /// 展开组合 Morph，对每个叶子 Morph 调用 f(morph, 有效权重)
    fn visit_active<F: FnMut(&Morph, f32)>(&self, mut f: F) {
        for idx in 0..self.morphs.len() {
            let weight = self.morphs[idx].weight;
            if weight.abs() > MIN_EFFECTIVE_WEIGHT {
                self.visit_single(idx, weight, 0, &mut f);
            }
        }
    }

    /// depth 用于防止组合 Morph 循环引用
    fn visit_single<F: FnMut(&Morph, f32)>(&self, idx: usize, weight: f32, depth: u32, f: &mut F) {
        if depth > MAX_GROUP_DEPTH || weight.abs() < MIN_EFFECTIVE_WEIGHT {
            return;
        }
        let Some(morph) = self.morphs.get(idx) else { return };
        match morph.morph_type {
            MorphType::Group => {
                for sub in &morph.group_offsets {
                    if sub.morph_index < 0 {
                        continue;
                    }
                    let sub_idx = sub.morph_index as usize;
                    if sub_idx != idx {
                        self.visit_single(sub_idx, weight * sub.influence, depth + 1, f);
                    }
                }
            }
            _ => f(morph, weight),
        }
    }

    /// 应用骨骼 Morph
    ///
    /// 先清空所有骨骼的 Morph 偏移，再按当前权重叠加。
    /// 之后需要重新计算骨骼变换。
    pub fn apply_bone_morphs(&self, bones: &mut BoneSet) {
        bones.reset_morphs();
        self.visit_active(|morph, weight| {
            if morph.morph_type != MorphType::Bone {
                return;
            }
            for offset in &morph.bone_offsets {
                if offset.bone_index < 0 {
                    continue;
                }
                if let Some(bone) = bones.get_bone_mut(offset.bone_index as usize) {
                    bone.add_morph(offset.translation * weight, Quat::IDENTITY.slerp(offset.rotation, weight));
                } else {
                    log::debug!("bone morph '{}' references missing bone {}", morph.name, offset.bone_index);
                }
            }
        });
    }

    /// 应用顶点 Morph 到顶点位置
    ///
    /// positions 应为基础位置的副本；越界索引交给 policy 处理
    pub fn apply_vertex_morphs(&self, positions: &mut [Vec3], policy: &dyn VertexIndexPolicy) {
        let count = positions.len();
        self.visit_active(|morph, weight| {
            if morph.morph_type != MorphType::Vertex {
                return;
            }
            for offset in &morph.vertex_offsets {
                if let Some(idx) = policy.resolve(offset.vertex_index, count) {
                    positions[idx] += offset.offset * weight;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morph::{BoneMorphOffset, GroupMorphOffset, Strict, VertexMorphOffset, WrapCompat};
    use crate::skeleton::BoneLink;

    fn manager() -> MorphManager {
        let mut m = MorphManager::new();
        m.add_morph(Morph::vertex("あ", vec![
            VertexMorphOffset { vertex_index: 0, offset: Vec3::X },
            VertexMorphOffset { vertex_index: 65536 + 1, offset: Vec3::Y },
        ]));
        m.add_morph(Morph::bone("腕上げ", vec![BoneMorphOffset {
            bone_index: 0,
            translation: Vec3::new(0.0, 2.0, 0.0),
            rotation: Quat::from_rotation_z(1.0),
        }]));
        m.add_morph(Morph::group("笑顔", vec![
            GroupMorphOffset { morph_index: 0, influence: 0.5 },
            GroupMorphOffset { morph_index: 2, influence: 1.0 },
        ]));
        m
    }

    #[test]
    fn test_vertex_morph_policies() {
        let m = {
            let mut m = manager();
            m.set_morph_weight(0, 1.0);
            m
        };
        let mut positions = vec![Vec3::ZERO; 2];
        m.apply_vertex_morphs(&mut positions, &WrapCompat);
        assert_eq!(positions, vec![Vec3::X, Vec3::Y]);

        let mut positions = vec![Vec3::ZERO; 2];
        m.apply_vertex_morphs(&mut positions, &Strict);
        assert_eq!(positions, vec![Vec3::X, Vec3::ZERO]);
    }

    #[test]
    fn test_group_morph_scales_and_ignores_self() {
        let mut m = manager();
        m.set_morph_weight(2, 0.8);
        let mut positions = vec![Vec3::ZERO; 2];
        m.apply_vertex_morphs(&mut positions, &Strict);
        assert!((positions[0].x - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_bone_morph_applied_and_reset() {
        let mut bones = BoneSet::new(vec![BoneLink::new("腕")]).unwrap();
        let mut m = manager();
        m.set_morph_weight(1, 0.5);
        m.apply_bone_morphs(&mut bones);
        let bone = bones.get_bone(0).unwrap();
        assert!((bone.morph_translate.y - 1.0).abs() < 1e-6);
        assert!(bone.morph_rotate.angle_between(Quat::from_rotation_z(0.5)) < 1e-4);

        m.set_morph_weight(1, 0.0);
        m.apply_bone_morphs(&mut bones);
        assert_eq!(bones.get_bone(0).unwrap().morph_translate, Vec3::ZERO);
    }

    #[test]
    fn test_smear_and_lookup() {
        let mut m = manager();
        m.set_morph_weight(0, 0.8);
        m.smear_all_to_default(0.5);
        assert!((m.get_morph_weight(0) - 0.4).abs() < 1e-6);
        assert_eq!(m.find_morph_by_name("笑顔"), Some(2));
        assert_eq!(m.get_morph_weight(99), 0.0);
    }
}
