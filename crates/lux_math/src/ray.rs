//! Ray type for intersection queries.
//!
//! A ray is defined by an origin point, a direction vector, and the
//! parametric interval `[tmin, tmax]` in which hits are valid. Nearest-hit
//! queries shrink `tmax` as closer intersections are found, which is what
//! lets the spatial index prune nodes behind a known hit.

use glam::Vec3;

/// Default minimum parametric distance for new rays.
///
/// Keeps secondary rays from re-intersecting the surface they start on.
pub const RAY_EPSILON: f32 = 1e-4;

/// A ray with origin, direction, and a mutable parametric range.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Origin point of the ray
    pub origin: Vec3,
    /// Direction vector (not necessarily normalized)
    pub direction: Vec3,
    /// Minimum parametric distance for a valid hit
    pub tmin: f32,
    /// Maximum parametric distance; monotonically non-increasing
    /// during a nearest-hit query
    pub tmax: f32,
}

impl Ray {
    /// Create a new unbounded ray with the default epsilon as `tmin`.
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self::with_bounds(origin, direction, RAY_EPSILON, f32::INFINITY)
    }

    /// Create a ray with an explicit parametric range.
    #[inline]
    pub fn with_bounds(origin: Vec3, direction: Vec3, tmin: f32, tmax: f32) -> Self {
        Self {
            origin,
            direction,
            tmin,
            tmax,
        }
    }

    /// Compute a point along the ray at parameter t.
    /// P(t) = origin + t * direction
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + t * self.direction
    }
}
