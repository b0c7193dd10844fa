//! MMD 动作 / IK / 物理同步核心
//!
//! 每帧流程：
//! 1. 动作层按优先级合成所有正在播放的动作
//! 2. 骨骼 Morph 叠加后更新骨骼
//! 3. 求解开启的 IK 链
//! 4. 运动学刚体跟随骨骼，动力学刚体的结果写回骨骼
//!
//! 文件解析和渲染不在本 crate 内，由调用方提供轨道数据并读取
//! `MmdModel::world_transforms` / `MmdModel::morph_weights`。

pub mod animation;
pub mod capability;
pub mod config;
pub mod error;
pub mod model;
pub mod morph;
pub mod physics;
pub mod skeleton;

pub use error::{MmdError, Result};
pub use model::MmdModel;
