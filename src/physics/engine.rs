//! 物理引擎接口
//!
//! 桥接层只通过这个 trait 操作刚体，具体实现可以是 Rapier，
//! 也可以是测试用的确定性引擎。所有变换都在模型局部空间。

use glam::{Mat4, Vec3};

use crate::Result;

/// 引擎内刚体句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BodyId(pub usize);

/// 碰撞形状
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BodyShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    /// height 为两个半球球心之间的距离
    Capsule { radius: f32, height: f32 },
}

/// 创建刚体所需的全部参数
#[derive(Clone, Debug)]
pub struct RigidBodyDesc {
    pub name: String,
    pub shape: BodyShape,
    /// 运动学刚体忽略质量
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub friction: f32,
    pub restitution: f32,
    /// 碰撞组编号 (0..16)
    pub group: u8,
    /// 可碰撞组掩码
    pub group_mask: u16,
    /// 初始世界变换
    pub transform: Mat4,
    pub kinematic: bool,
}

/// 六自由度关节
#[derive(Clone, Debug)]
pub struct JointDesc {
    pub name: String,
    pub body_a: BodyId,
    pub body_b: BodyId,
    /// 关节在模型空间中的变换
    pub transform: Mat4,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
}

/// 刚体的动力学状态快照
///
/// 切换为运动学时保存，恢复为动力学时写回
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyState {
    pub transform: Mat4,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// 尚未结算的外力
    pub force: Vec3,
    pub torque: Vec3,
    /// 各轴平移允许系数 (0 = 锁定)
    pub linear_factor: Vec3,
    pub angular_factor: Vec3,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            linear_factor: Vec3::ONE,
            angular_factor: Vec3::ONE,
        }
    }
}

/// 物理引擎
///
/// 对无效句柄的操作应当静默忽略，读取返回 None。
pub trait PhysicsEngine: Send {
    fn add_body(&mut self, desc: &RigidBodyDesc) -> Result<BodyId>;

    fn add_joint(&mut self, desc: &JointDesc) -> Result<()>;

    fn body_count(&self) -> usize;

    fn set_gravity(&mut self, gravity: Vec3);

    /// 切换运动学/动力学，不改变当前位置
    fn set_kinematic(&mut self, id: BodyId, kinematic: bool);

    fn is_kinematic(&self, id: BodyId) -> Option<bool>;

    fn transform(&self, id: BodyId) -> Option<Mat4>;

    /// 直接设置位置（瞬移）
    fn set_transform(&mut self, id: BodyId, transform: Mat4);

    /// 运动学刚体下一步的目标位置
    fn move_kinematic(&mut self, id: BodyId, transform: Mat4);

    /// 读取完整状态
    fn state(&self, id: BodyId) -> Option<BodyState>;

    /// 写回速度、外力和轴系数（不含位置）
    fn apply_state(&mut self, id: BodyId, state: &BodyState);

    fn set_velocities(&mut self, id: BodyId, linear: Vec3, angular: Vec3);

    fn clear_forces(&mut self, id: BodyId);

    /// 以固定时间步长推进一步（秒）
    fn step(&mut self, dt: f32);
}
