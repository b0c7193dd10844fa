//! 错误类型
//!
//! 只用于构建期与控制接口。逐帧流程中的策略性跳过（未匹配的轨道名、
//! IK 开关关闭、无刚体骨骼上的物理操作）不产生错误。

use thiserror::Error;

/// 引擎错误
#[derive(Error, Debug)]
pub enum MmdError {
    /// 关键帧轨道为空
    #[error("Empty keyframe track: '{0}'")]
    EmptyTrack(String),

    /// 骨骼索引越界
    #[error("Bone index {index} out of range (bone count {count})")]
    BoneIndexOutOfRange { index: i32, count: usize },

    /// 骨骼父子关系错误（父骨骼必须排在子骨骼之前）
    #[error("Invalid hierarchy: bone {bone} has parent {parent}")]
    InvalidHierarchy { bone: usize, parent: i32 },

    /// IK 链定义错误
    #[error("Invalid IK chain: {0}")]
    InvalidIkChain(String),

    /// 找不到正在播放的动作
    #[error("Motion not found: '{0}'")]
    MotionNotFound(String),

    /// 未知的动作配置键
    #[error("Unknown motion configure key: '{0}'")]
    UnknownConfigureKey(String),

    /// 配置值无法解析
    #[error("Invalid value '{value}' for key '{key}'")]
    InvalidConfigureValue { key: String, value: String },

    /// 播放速度参数错误
    #[error("Invalid speed parameters: rate {rate}, change length {length}")]
    InvalidSpeed { rate: f32, length: f32 },

    /// 刚体创建失败
    #[error("Rigid body '{0}' creation failed: {1}")]
    RigidBody(String, String),

    /// 能力表中缺少实现或类型不匹配
    #[error("Capability '{0}' is missing or has an unexpected type")]
    Capability(String),
}

/// 使用 MmdError 的 Result
pub type Result<T> = std::result::Result<T, MmdError>;
