//! Morph 系统
//!
//! 支持顶点 Morph、骨骼 Morph 和组合 Morph。
//! 权重由动作层写入，骨骼 Morph 在动作合成之后叠加到骨骼上。

mod manager;

pub use manager::MorphManager;

use glam::{Vec3, Quat};

/// Morph 类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MorphType {
    Vertex,
    Bone,
    Group,
}

/// 顶点 Morph 偏移
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexMorphOffset {
    pub vertex_index: u32,
    pub offset: Vec3,
}

/// 骨骼 Morph 偏移
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneMorphOffset {
    pub bone_index: i32,
    pub translation: Vec3,
    pub rotation: Quat,
}

/// 组合 Morph 子项
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupMorphOffset {
    pub morph_index: i32,
    pub influence: f32,
}

/// Morph 定义
#[derive(Clone, Debug)]
pub struct Morph {
    pub name: String,
    pub morph_type: MorphType,
    pub weight: f32,
    pub vertex_offsets: Vec<VertexMorphOffset>,
    pub bone_offsets: Vec<BoneMorphOffset>,
    pub group_offsets: Vec<GroupMorphOffset>,
}

impl Morph {
    fn empty(name: impl Into<String>, morph_type: MorphType) -> Self {
        Self {
            name: name.into(),
            morph_type,
            weight: 0.0,
            vertex_offsets: Vec::new(),
            bone_offsets: Vec::new(),
            group_offsets: Vec::new(),
        }
    }

    pub fn vertex(name: impl Into<String>, offsets: Vec<VertexMorphOffset>) -> Self {
        Self { vertex_offsets: offsets, ..Self::empty(name, MorphType::Vertex) }
    }

    pub fn bone(name: impl Into<String>, offsets: Vec<BoneMorphOffset>) -> Self {
        Self { bone_offsets: offsets, ..Self::empty(name, MorphType::Bone) }
    }

    pub fn group(name: impl Into<String>, offsets: Vec<GroupMorphOffset>) -> Self {
        Self { group_offsets: offsets, ..Self::empty(name, MorphType::Group) }
    }

    #[inline]
    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    #[inline]
    pub fn reset(&mut self) {
        self.weight = 0.0;
    }
}

// ============================================================================
// 顶点索引策略
// ============================================================================

/// 顶点 Morph 索引越界时的处理方式
pub trait VertexIndexPolicy: Send + Sync {
    /// 返回 None 表示跳过该偏移
    fn resolve(&self, index: u32, vertex_count: usize) -> Option<usize>;
}

/// 兼容旧模型：越界索引先减 65536，仍越界则跳过
///
/// 部分 PMD 导出工具把超过 16 位的索引写成回绕后的值
#[derive(Clone, Copy, Debug, Default)]
pub struct WrapCompat;

impl VertexIndexPolicy for WrapCompat {
    fn resolve(&self, index: u32, vertex_count: usize) -> Option<usize> {
        let idx = index as usize;
        if idx < vertex_count {
            return Some(idx);
        }
        idx.checked_sub(65536).filter(|&i| i < vertex_count)
    }
}

/// 越界直接跳过
#[derive(Clone, Copy, Debug, Default)]
pub struct Strict;

impl VertexIndexPolicy for Strict {
    fn resolve(&self, index: u32, vertex_count: usize) -> Option<usize> {
        let idx = index as usize;
        (idx < vertex_count).then_some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_compat() {
        let policy = WrapCompat;
        assert_eq!(policy.resolve(5, 10), Some(5));
        assert_eq!(policy.resolve(65536 + 3, 10), Some(3));
        assert_eq!(policy.resolve(65536 + 30, 10), None);
        assert_eq!(policy.resolve(20, 10), None);
    }

    #[test]
    fn test_strict() {
        assert_eq!(Strict.resolve(9, 10), Some(9));
        assert_eq!(Strict.resolve(65536 + 3, 10), None);
    }
}
