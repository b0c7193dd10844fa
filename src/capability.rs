//! 能力表
//!
//! 功能名 → 实现（trait 对象）。启动时配置，逐帧流程按名称取用，
//! 替换 IK 求解器或顶点索引策略不需要改动模型代码。

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::morph::{VertexIndexPolicy, WrapCompat};
use crate::skeleton::{ChainSolver, IkSolver};
use crate::{MmdError, Result};

/// IK 求解器，类型 `dyn ChainSolver`
pub const CAPABILITY_IK_SOLVER: &str = "ik.solver";
/// 顶点 Morph 索引策略，类型 `dyn VertexIndexPolicy`
pub const CAPABILITY_VERTEX_INDEX: &str = "morph.vertex_index";

/// 能力表
#[derive(Clone, Default)]
pub struct CapabilityTable {
    /// 值为 Arc<T> 装箱后的类型擦除形式
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl CapabilityTable {
    /// 空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 带默认实现的表：CCD IK 求解器、兼容回绕的顶点索引
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register::<dyn ChainSolver>(CAPABILITY_IK_SOLVER, Arc::new(IkSolver::new()));
        table.register::<dyn VertexIndexPolicy>(CAPABILITY_VERTEX_INDEX, Arc::new(WrapCompat));
        table
    }

    /// 注册或替换实现
    pub fn register<T: ?Sized + Send + Sync + 'static>(&mut self, name: &str, value: Arc<T>) {
        if self.entries.insert(name.to_string(), Arc::new(value)).is_some() {
            log::debug!("capability '{}' replaced", name);
        }
    }

    /// 按名称和类型取出实现
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name)?.downcast_ref::<Arc<T>>().cloned()
    }

    /// 同 get，缺失或类型不符时返回错误
    pub fn require<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.get(name).ok_or_else(|| MmdError::Capability(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("CapabilityTable").field("entries", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morph::Strict;

    #[test]
    fn test_defaults() {
        let table = CapabilityTable::with_defaults();
        assert_eq!(table.len(), 2);
        assert!(table.get::<dyn ChainSolver>(CAPABILITY_IK_SOLVER).is_some());
        let policy = table.require::<dyn VertexIndexPolicy>(CAPABILITY_VERTEX_INDEX).unwrap();
        assert_eq!(policy.resolve(65536 + 1, 4), Some(1));
    }

    #[test]
    fn test_replace_policy() {
        let mut table = CapabilityTable::with_defaults();
        table.register::<dyn VertexIndexPolicy>(CAPABILITY_VERTEX_INDEX, Arc::new(Strict));
        let policy = table.require::<dyn VertexIndexPolicy>(CAPABILITY_VERTEX_INDEX).unwrap();
        assert_eq!(policy.resolve(65536 + 1, 4), None);
    }

    #[test]
    fn test_missing_or_wrong_type() {
        let table = CapabilityTable::with_defaults();
        assert!(matches!(
            table.require::<dyn ChainSolver>("physics.engine"),
            Err(MmdError::Capability(_))
        ));
        // 名称存在但类型不符
        assert!(table.get::<dyn VertexIndexPolicy>(CAPABILITY_IK_SOLVER).is_none());
    }
}
