//! Primitive capability trait and hit record.

use lux_math::{Aabb, Ray, Vec3};
use std::sync::Arc;

/// Record of a ray-primitive intersection.
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    /// Point of intersection
    pub p: Vec3,
    /// Surface normal at intersection (always points against the ray)
    pub normal: Vec3,
    /// Parameter t where the intersection occurs
    pub t: f32,
    /// Whether the ray hit the front face (outside) of the surface
    pub front_face: bool,
}

impl Hit {
    /// Create a hit with the normal left unset.
    pub fn new(p: Vec3, t: f32) -> Self {
        Self {
            p,
            normal: Vec3::ZERO,
            t,
            front_face: false,
        }
    }

    /// Set the face normal based on ray direction and outward normal.
    ///
    /// The normal is always stored pointing against the ray direction,
    /// so we need to track whether we hit the front or back face.
    pub fn set_face_normal(&mut self, ray: &Ray, outward_normal: Vec3) {
        self.front_face = ray.direction.dot(outward_normal) < 0.0;
        self.normal = if self.front_face {
            outward_normal
        } else {
            -outward_normal
        };
    }
}

/// Capability interface of anything the index can be built over.
///
/// The index never looks past this trait: it stores handles, reads the
/// world bounds once per build, and forwards ray queries to the two
/// intersection callbacks.
pub trait Primitive: Send + Sync {
    /// Exact world-space bounding box; called once per primitive per build.
    fn world_bounds(&self) -> Aabb;

    /// True if the ray hits this primitive inside `[tmin, tmax]`.
    /// Must not mutate the ray.
    fn intersects(&self, ray: &Ray) -> bool;

    /// Nearest intersection inside `[tmin, tmax]`, if any. On a hit the
    /// primitive narrows `ray.tmax` to the hit distance, so repeated
    /// calls converge on the closest surface.
    fn nearest_intersection(&self, ray: &mut Ray) -> Option<Hit>;
}

/// Shared, immutable handle to a primitive.
///
/// The index stores handles only and never owns primitive internals;
/// the owning scene keeps its own clones.
pub type PrimitiveHandle = Arc<dyn Primitive>;
