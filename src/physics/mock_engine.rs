//! 测试用的确定性物理引擎
//!
//! 无碰撞，质量为 1，按显式欧拉积分。

use glam::{Mat4, Quat, Vec3};

use super::engine::{BodyId, BodyShape, BodyState, JointDesc, PhysicsEngine, RigidBodyDesc};
use crate::{MmdError, Result};

#[derive(Clone, Debug)]
struct MockBody {
    kinematic: bool,
    state: BodyState,
    target: Option<Mat4>,
}

#[derive(Debug, Default)]
pub(crate) struct MockEngine {
    bodies: Vec<MockBody>,
    gravity: Vec3,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PhysicsEngine for MockEngine {
    fn add_body(&mut self, desc: &RigidBodyDesc) -> Result<BodyId> {
        let valid = match desc.shape {
            BodyShape::Sphere { radius } => radius > 0.0,
            BodyShape::Box { half_extents } => half_extents.min_element() > 0.0,
            BodyShape::Capsule { radius, height } => radius > 0.0 && height >= 0.0,
        };
        if !valid {
            return Err(MmdError::RigidBody(desc.name.clone(), "invalid shape".into()));
        }
        self.bodies.push(MockBody {
            kinematic: desc.kinematic,
            state: BodyState { transform: desc.transform, ..BodyState::default() },
            target: None,
        });
        Ok(BodyId(self.bodies.len() - 1))
    }

    fn add_joint(&mut self, desc: &JointDesc) -> Result<()> {
        if desc.body_a.0 >= self.bodies.len() || desc.body_b.0 >= self.bodies.len() {
            return Err(MmdError::RigidBody(desc.name.clone(), "missing body".into()));
        }
        Ok(())
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    fn set_kinematic(&mut self, id: BodyId, kinematic: bool) {
        if let Some(b) = self.bodies.get_mut(id.0) {
            b.kinematic = kinematic;
            b.target = None;
        }
    }

    fn is_kinematic(&self, id: BodyId) -> Option<bool> {
        self.bodies.get(id.0).map(|b| b.kinematic)
    }

    fn transform(&self, id: BodyId) -> Option<Mat4> {
        self.bodies.get(id.0).map(|b| b.state.transform)
    }

    fn set_transform(&mut self, id: BodyId, transform: Mat4) {
        if let Some(b) = self.bodies.get_mut(id.0) {
            b.state.transform = transform;
            b.target = None;
        }
    }

    fn move_kinematic(&mut self, id: BodyId, transform: Mat4) {
        if let Some(b) = self.bodies.get_mut(id.0) {
            b.target = Some(transform);
        }
    }

    fn state(&self, id: BodyId) -> Option<BodyState> {
        self.bodies.get(id.0).map(|b| b.state)
    }

    fn apply_state(&mut self, id: BodyId, state: &BodyState) {
        if let Some(b) = self.bodies.get_mut(id.0) {
            b.state = BodyState { transform: b.state.transform, ..*state };
        }
    }

    fn set_velocities(&mut self, id: BodyId, linear: Vec3, angular: Vec3) {
        if let Some(b) = self.bodies.get_mut(id.0) {
            b.state.linear_velocity = linear;
            b.state.angular_velocity = angular;
        }
    }

    fn clear_forces(&mut self, id: BodyId) {
        if let Some(b) = self.bodies.get_mut(id.0) {
            b.state.force = Vec3::ZERO;
            b.state.torque = Vec3::ZERO;
        }
    }

    fn step(&mut self, dt: f32) {
        for b in &mut self.bodies {
            if b.kinematic {
                if let Some(target) = b.target.take() {
                    b.state.transform = target;
                }
                continue;
            }
            let s = &mut b.state;
            s.linear_velocity += (self.gravity + s.force) * dt * s.linear_factor;
            s.angular_velocity += s.torque * dt * s.angular_factor;
            let (_, rot, pos) = s.transform.to_scale_rotation_translation();
            let rot = (Quat::from_scaled_axis(s.angular_velocity * dt) * rot).normalize();
            s.transform = Mat4::from_rotation_translation(rot, pos + s.linear_velocity * dt);
            s.force = Vec3::ZERO;
            s.torque = Vec3::ZERO;
        }
    }
}
