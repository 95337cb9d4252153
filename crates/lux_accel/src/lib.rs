//! Lux spatial index - ray/primitive intersection acceleration.
//!
//! The index answers exactly two questions for the light-transport
//! integrators: "does this ray hit anything" and "what is the nearest
//! hit". It is built once over a static, flattened primitive set and is
//! immutable (and therefore freely shared between render workers)
//! until the next rebuild.
//!
//! Primitives are opaque to the index: it sees only their world-space
//! bounds and the two intersection callbacks of the [`Primitive`] trait.

mod accelerator;
mod edge;
mod kdtree;
mod primitive;
mod sphere;

pub use accelerator::{Accelerator, LinearScan};
pub use kdtree::{BuildStats, KdTree, KdTreeConfig};
pub use primitive::{Hit, Primitive, PrimitiveHandle};
pub use sphere::Sphere;

/// Re-export the math types the index interface speaks.
pub use lux_math::{Aabb, Interval, Ray, Vec3};
