//! 引擎配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 动作相关的帧数参数在 MotionInstance / MotionLayer 创建时读取，
//! 物理参数在 PhysicsBridge 创建和每次步进时读取。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 引擎配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // ========== 动作时间 ==========
    /// 动作帧率，默认 30.0（VMD 标准）
    /// 物理步进时用于把帧数换算成秒
    pub motion_fps: f32,
    /// 贝塞尔插值表采样数，默认 256
    pub interpolation_table_size: usize,

    // ========== 过渡帧数 ==========
    /// 动作开始时骨骼从快照过渡的帧数，默认 20
    pub bone_start_margin_frames: f32,
    /// 动作开始时表情从快照过渡的帧数，默认 6
    pub face_start_margin_frames: f32,
    /// 删除动作时骨骼淡出帧数，默认 20
    pub bone_end_margin_frames: f32,
    /// 删除动作时表情淡出帧数，默认 6
    pub face_end_margin_frames: f32,
    /// 完整动作开始时未受控骨骼/表情回到默认姿势的帧数，默认 10
    pub non_controlled_reset_frames: f32,

    // ========== 重力 ==========
    /// 重力 Y 分量（负数向下），默认 -98.0（MMD 标准）
    pub gravity_y: f32,

    // ========== 模拟参数 ==========
    /// 物理 FPS，默认 60.0
    pub physics_fps: f32,
    /// 每帧最大子步数，默认 5
    pub max_substep_count: i32,

    // ========== 刚体 ==========
    /// 线性阻尼缩放（乘以模型原值），默认 1.0
    pub linear_damping_scale: f32,
    /// 角速度阻尼缩放（乘以模型原值），默认 1.0
    pub angular_damping_scale: f32,
    /// 质量缩放（乘以模型原值），默认 1.0
    pub mass_scale: f32,

    // ========== 速度限制 ==========
    /// 最大线速度，默认 100.0
    pub max_linear_velocity: f32,
    /// 最大角速度 (rad/s)，默认 50.0
    pub max_angular_velocity: f32,

    // ========== 调试 ==========
    /// 是否输出调试日志，默认 false
    pub debug_log: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            motion_fps: 30.0,
            interpolation_table_size: 256,

            bone_start_margin_frames: 20.0,
            face_start_margin_frames: 6.0,
            bone_end_margin_frames: 20.0,
            face_end_margin_frames: 6.0,
            non_controlled_reset_frames: 10.0,

            // MMD 标准重力，模型的质量/阻尼参数都是为此重力设计的
            gravity_y: -98.0,

            // 越高越稳定，CPU 消耗越大
            physics_fps: 60.0,
            max_substep_count: 5,

            linear_damping_scale: 1.0,
            angular_damping_scale: 1.0,
            mass_scale: 1.0,

            max_linear_velocity: 100.0,
            max_angular_velocity: 50.0,

            debug_log: false,
        }
    }
}

/// 全局配置实例
static ENGINE_CONFIG: Lazy<RwLock<EngineConfig>> = Lazy::new(|| {
    RwLock::new(EngineConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> EngineConfig {
    ENGINE_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: EngineConfig) {
    *ENGINE_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *ENGINE_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = EngineConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_margins() {
        let config = EngineConfig::default();
        assert_eq!(config.bone_start_margin_frames, 20.0);
        assert_eq!(config.face_start_margin_frames, 6.0);
        assert_eq!(config.non_controlled_reset_frames, 10.0);
        assert_eq!(config.motion_fps, 30.0);
    }
}
