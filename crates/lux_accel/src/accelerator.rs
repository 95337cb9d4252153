//! Accelerator interface and the brute-force reference implementation.

use crate::primitive::{Hit, PrimitiveHandle};
use lux_math::{Aabb, Ray};

/// Common interface of the ray-intersection indices.
///
/// Queries take `&self` and are safe to issue from many worker threads
/// at once. `rebuild` is the single write operation; the owning scene
/// must make sure no queries are in flight while it runs, the index
/// itself carries no synchronization.
pub trait Accelerator: Send + Sync {
    /// Bounding box of everything the index was built over.
    fn world_bounds(&self) -> Aabb;

    /// True as soon as any primitive reports a hit.
    fn any_hit(&self, ray: &Ray) -> bool;

    /// Nearest hit along the ray, narrowing `ray.tmax` as a side effect.
    fn nearest_hit(&self, ray: &mut Ray) -> Option<Hit>;

    /// Discard and reconstruct the index from the retained handles.
    fn rebuild(&mut self);
}

/// Linear scan over the primitive list.
///
/// No build phase and no memory overhead beyond the handle list. Far too
/// slow for real scenes, but it cannot be wrong, which makes it the
/// correctness oracle for the tree and a reasonable choice for scenes of
/// a handful of primitives.
pub struct LinearScan {
    primitives: Vec<PrimitiveHandle>,
    bounds: Aabb,
}

impl LinearScan {
    /// Create a scan over the given handles.
    pub fn new(primitives: Vec<PrimitiveHandle>) -> Self {
        let mut scan = Self {
            primitives,
            bounds: Aabb::EMPTY,
        };
        scan.rebuild();
        scan
    }

    /// Number of primitives the scan was built over.
    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    /// True if the scan holds no primitives.
    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }
}

impl Accelerator for LinearScan {
    fn world_bounds(&self) -> Aabb {
        self.bounds
    }

    fn any_hit(&self, ray: &Ray) -> bool {
        self.primitives.iter().any(|p| p.intersects(ray))
    }

    fn nearest_hit(&self, ray: &mut Ray) -> Option<Hit> {
        let mut nearest = None;
        for p in &self.primitives {
            // each hit narrows ray.tmax, so the last Some is the closest
            if let Some(hit) = p.nearest_intersection(ray) {
                nearest = Some(hit);
            }
        }
        nearest
    }

    fn rebuild(&mut self) {
        self.bounds = self
            .primitives
            .iter()
            .fold(Aabb::EMPTY, |acc, p| {
                Aabb::surrounding(&acc, &p.world_bounds())
            });
    }
}
