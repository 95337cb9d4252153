//! Sphere primitive.

use crate::primitive::{Hit, Primitive};
use lux_math::{Aabb, Interval, Ray, Vec3};

/// A sphere defined by center and radius.
#[derive(Debug, Clone, Copy)]
pub struct Sphere {
    center: Vec3,
    radius: f32,
    bbox: Aabb,
}

impl Sphere {
    /// Create a new sphere.
    pub fn new(center: Vec3, radius: f32) -> Self {
        let radius = radius.max(0.0);
        let rvec = Vec3::splat(radius);
        let bbox = Aabb::from_points(center - rvec, center + rvec);

        Self {
            center,
            radius,
            bbox,
        }
    }

    /// Smallest root of the ray/sphere quadratic strictly inside
    /// `(tmin, tmax)`, if any.
    fn hit_root(&self, ray: &Ray) -> Option<f32> {
        let oc = self.center - ray.origin;
        let a = ray.direction.length_squared();
        let h = ray.direction.dot(oc);
        let c = oc.length_squared() - self.radius * self.radius;

        let discriminant = h * h - a * c;
        if discriminant < 0.0 {
            return None;
        }

        let sqrtd = discriminant.sqrt();
        let range = Interval::new(ray.tmin, ray.tmax);

        // Find the nearest root in the acceptable range
        let mut root = (h - sqrtd) / a;
        if !range.surrounds(root) {
            root = (h + sqrtd) / a;
            if !range.surrounds(root) {
                return None;
            }
        }

        Some(root)
    }
}

impl Primitive for Sphere {
    fn world_bounds(&self) -> Aabb {
        self.bbox
    }

    fn intersects(&self, ray: &Ray) -> bool {
        self.hit_root(ray).is_some()
    }

    fn nearest_intersection(&self, ray: &mut Ray) -> Option<Hit> {
        let t = self.hit_root(ray)?;
        ray.tmax = t;

        let p = ray.at(t);
        let outward_normal = (p - self.center) / self.radius;
        let mut hit = Hit::new(p, t);
        hit.set_face_normal(ray, outward_normal);
        Some(hit)
    }
}
