//! Rapier3D 物理引擎实现
//!
//! 坐标转换统一走 rapier3d 自带的 nalgebra 类型。
//! Rapier 的外力会一直保留到手动清除，这里每步之后清空，
//! 让外力只作用一步。

use glam::{Mat4, Quat, Vec3};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

use super::engine::{BodyId, BodyShape, BodyState, JointDesc, PhysicsEngine, RigidBodyDesc};
use crate::{MmdError, Result};

/// 动力学刚体的最小质量
const MIN_DYNAMIC_MASS: f32 = 1e-3;

// ============================================================================
// 类型转换
// ============================================================================

#[inline]
fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

#[inline]
fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn to_isometry(m: Mat4) -> Isometry<Real> {
    let (_, r, t) = m.to_scale_rotation_translation();
    Isometry::from_parts(
        Translation3::new(t.x, t.y, t.z),
        UnitQuaternion::from_quaternion(Quaternion::new(r.w, r.x, r.y, r.z)),
    )
}

fn from_isometry(iso: &Isometry<Real>) -> Mat4 {
    let t = iso.translation.vector;
    let q = iso.rotation;
    Mat4::from_rotation_translation(Quat::from_xyzw(q.i, q.j, q.k, q.w), Vec3::new(t.x, t.y, t.z))
}

fn factors_to_locked(linear: Vec3, angular: Vec3) -> LockedAxes {
    let mut axes = LockedAxes::empty();
    axes.set(LockedAxes::TRANSLATION_LOCKED_X, linear.x == 0.0);
    axes.set(LockedAxes::TRANSLATION_LOCKED_Y, linear.y == 0.0);
    axes.set(LockedAxes::TRANSLATION_LOCKED_Z, linear.z == 0.0);
    axes.set(LockedAxes::ROTATION_LOCKED_X, angular.x == 0.0);
    axes.set(LockedAxes::ROTATION_LOCKED_Y, angular.y == 0.0);
    axes.set(LockedAxes::ROTATION_LOCKED_Z, angular.z == 0.0);
    axes
}

fn locked_to_factors(axes: LockedAxes) -> (Vec3, Vec3) {
    let f = |flag: LockedAxes| if axes.contains(flag) { 0.0 } else { 1.0 };
    (
        Vec3::new(
            f(LockedAxes::TRANSLATION_LOCKED_X),
            f(LockedAxes::TRANSLATION_LOCKED_Y),
            f(LockedAxes::TRANSLATION_LOCKED_Z),
        ),
        Vec3::new(
            f(LockedAxes::ROTATION_LOCKED_X),
            f(LockedAxes::ROTATION_LOCKED_Y),
            f(LockedAxes::ROTATION_LOCKED_Z),
        ),
    )
}

fn shape_is_valid(shape: &BodyShape) -> bool {
    match *shape {
        BodyShape::Sphere { radius } => radius.is_finite() && radius > 0.0,
        BodyShape::Box { half_extents } => half_extents.is_finite() && half_extents.min_element() > 0.0,
        BodyShape::Capsule { radius, height } => {
            radius.is_finite() && radius > 0.0 && height.is_finite() && height >= 0.0
        }
    }
}

// ============================================================================
// RapierEngine
// ============================================================================

/// Rapier 物理世界
pub struct RapierEngine {
    pipeline: PhysicsPipeline,
    params: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    gravity: Vector<Real>,
    /// BodyId 即此数组下标
    handles: Vec<RigidBodyHandle>,
}

impl RapierEngine {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            params: IntegrationParameters::default(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            gravity: to_vector(gravity),
            handles: Vec::new(),
        }
    }

    pub fn joint_count(&self) -> usize {
        self.impulse_joints.len()
    }

    #[inline]
    fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.handles.get(id.0).and_then(|h| self.bodies.get(*h))
    }

    #[inline]
    fn body_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        let handle = *self.handles.get(id.0)?;
        self.bodies.get_mut(handle)
    }
}

impl PhysicsEngine for RapierEngine {
    fn add_body(&mut self, desc: &RigidBodyDesc) -> Result<BodyId> {
        if !shape_is_valid(&desc.shape) {
            return Err(MmdError::RigidBody(desc.name.clone(), format!("invalid shape {:?}", desc.shape)));
        }
        if !desc.transform.is_finite() {
            return Err(MmdError::RigidBody(desc.name.clone(), "non-finite transform".into()));
        }

        let builder = if desc.kinematic {
            RigidBodyBuilder::kinematic_position_based()
        } else {
            RigidBodyBuilder::dynamic()
        };
        let body = builder
            .position(to_isometry(desc.transform))
            .linear_damping(desc.linear_damping.max(0.0))
            .angular_damping(desc.angular_damping.max(0.0))
            .can_sleep(false)
            .build();
        let handle = self.bodies.insert(body);

        let collider = match desc.shape {
            BodyShape::Sphere { radius } => ColliderBuilder::ball(radius),
            BodyShape::Box { half_extents: h } => ColliderBuilder::cuboid(h.x, h.y, h.z),
            BodyShape::Capsule { radius, height } => ColliderBuilder::capsule_y(height * 0.5, radius),
        };
        let groups = InteractionGroups::new(
            Group::from_bits_truncate(1u32 << desc.group.min(15)),
            Group::from_bits_truncate(desc.group_mask as u32),
        );
        let collider = collider
            .mass(desc.mass.max(MIN_DYNAMIC_MASS))
            .friction(desc.friction)
            .restitution(desc.restitution)
            .collision_groups(groups)
            .build();
        self.colliders.insert_with_parent(collider, handle, &mut self.bodies);

        self.handles.push(handle);
        Ok(BodyId(self.handles.len() - 1))
    }

    fn add_joint(&mut self, desc: &JointDesc) -> Result<()> {
        let missing = || MmdError::RigidBody(desc.name.clone(), "joint references a missing body".into());
        let handle_a = *self.handles.get(desc.body_a.0).ok_or_else(missing)?;
        let handle_b = *self.handles.get(desc.body_b.0).ok_or_else(missing)?;
        let pos_a = *self.bodies.get(handle_a).ok_or_else(missing)?.position();
        let pos_b = *self.bodies.get(handle_b).ok_or_else(missing)?.position();

        let frame = to_isometry(desc.transform);
        let mut locked = JointAxesMask::empty();
        let mut builder = GenericJointBuilder::new(JointAxesMask::empty())
            .local_frame1(pos_a.inverse() * frame)
            .local_frame2(pos_b.inverse() * frame)
            .contacts_enabled(false);

        let axes = [
            (JointAxis::LinX, JointAxesMask::LIN_X, desc.linear_lower.x, desc.linear_upper.x),
            (JointAxis::LinY, JointAxesMask::LIN_Y, desc.linear_lower.y, desc.linear_upper.y),
            (JointAxis::LinZ, JointAxesMask::LIN_Z, desc.linear_lower.z, desc.linear_upper.z),
            (JointAxis::AngX, JointAxesMask::ANG_X, desc.angular_lower.x, desc.angular_upper.x),
            (JointAxis::AngY, JointAxesMask::ANG_Y, desc.angular_lower.y, desc.angular_upper.y),
            (JointAxis::AngZ, JointAxesMask::ANG_Z, desc.angular_lower.z, desc.angular_upper.z),
        ];
        for (axis, mask, lower, upper) in axes {
            if lower == upper {
                locked |= mask;
            } else if lower < upper {
                builder = builder.limits(axis, [lower, upper]);
            }
            // lower > upper 表示该轴自由
        }

        let joint = builder.locked_axes(locked).build();
        self.impulse_joints.insert(handle_a, handle_b, joint, true);
        Ok(())
    }

    fn body_count(&self) -> usize {
        self.handles.len()
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = to_vector(gravity);
    }

    fn set_kinematic(&mut self, id: BodyId, kinematic: bool) {
        let Some(rb) = self.body_mut(id) else { return };
        if kinematic {
            let pos = *rb.position();
            rb.set_body_type(RigidBodyType::KinematicPositionBased, true);
            rb.set_next_kinematic_position(pos);
        } else {
            rb.set_body_type(RigidBodyType::Dynamic, true);
        }
    }

    fn is_kinematic(&self, id: BodyId) -> Option<bool> {
        self.body(id).map(|rb| rb.is_kinematic())
    }

    fn transform(&self, id: BodyId) -> Option<Mat4> {
        self.body(id).map(|rb| from_isometry(rb.position()))
    }

    fn set_transform(&mut self, id: BodyId, transform: Mat4) {
        let Some(rb) = self.body_mut(id) else { return };
        let iso = to_isometry(transform);
        rb.set_position(iso, true);
        if rb.is_kinematic() {
            rb.set_next_kinematic_position(iso);
        }
    }

    fn move_kinematic(&mut self, id: BodyId, transform: Mat4) {
        if let Some(rb) = self.body_mut(id) {
            rb.set_next_kinematic_position(to_isometry(transform));
        }
    }

    fn state(&self, id: BodyId) -> Option<BodyState> {
        let rb = self.body(id)?;
        let (linear_factor, angular_factor) = locked_to_factors(rb.locked_axes());
        Some(BodyState {
            transform: from_isometry(rb.position()),
            linear_velocity: from_vector(rb.linvel()),
            angular_velocity: from_vector(rb.angvel()),
            force: from_vector(&rb.user_force()),
            torque: from_vector(&rb.user_torque()),
            linear_factor,
            angular_factor,
        })
    }

    fn apply_state(&mut self, id: BodyId, state: &BodyState) {
        let Some(rb) = self.body_mut(id) else { return };
        rb.set_locked_axes(factors_to_locked(Vec3::ONE, Vec3::ONE), false);
        rb.reset_forces(false);
        rb.reset_torques(false);
        rb.add_force(to_vector(state.force), true);
        rb.add_torque(to_vector(state.torque), true);
        rb.set_locked_axes(factors_to_locked(state.linear_factor, state.angular_factor), true);
        rb.set_linvel(to_vector(state.linear_velocity), true);
        rb.set_angvel(to_vector(state.angular_velocity), true);
    }

    fn set_velocities(&mut self, id: BodyId, linear: Vec3, angular: Vec3) {
        if let Some(rb) = self.body_mut(id) {
            rb.set_linvel(to_vector(linear), true);
            rb.set_angvel(to_vector(angular), true);
        }
    }

    fn clear_forces(&mut self, id: BodyId) {
        if let Some(rb) = self.body_mut(id) {
            rb.reset_forces(false);
            rb.reset_torques(false);
        }
    }

    fn step(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.params.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
        for (_, rb) in self.bodies.iter_mut() {
            rb.reset_forces(false);
            rb.reset_torques(false);
        }
    }
}
