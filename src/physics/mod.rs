//! 物理系统
//!
//! - engine: 物理引擎接口与刚体/关节描述
//! - rapier_engine: Rapier3D 实现
//! - rigid_body: MMD 刚体定义与骨骼偏移
//! - mmd_physics: 骨骼与刚体之间的同步

mod engine;
mod mmd_physics;
mod rapier_engine;
mod rigid_body;

#[cfg(test)]
pub(crate) mod mock_engine;

pub use engine::{BodyId, BodyShape, BodyState, JointDesc, PhysicsEngine, RigidBodyDesc};
pub use mmd_physics::{MmdPhysics, PhysicsBridge};
pub use rapier_engine::RapierEngine;
pub use rigid_body::{ControlType, JointDef, MmdRigidBody, RigidBodyDef};
