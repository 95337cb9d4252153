use crate::{Interval, Ray, Vec3};

/// Axis-Aligned Bounding Box for spatial acceleration structures.
///
/// An AABB is defined by three intervals (one per axis) that bound a 3D
/// volume. Bounds are kept exact: a primitive that is flat on an axis is
/// represented by a zero-width interval, never padded.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub x: Interval,
    pub y: Interval,
    pub z: Interval,
}

impl Aabb {
    /// Create a new AABB from three intervals.
    pub fn new(x: Interval, y: Interval, z: Interval) -> Self {
        Self { x, y, z }
    }

    /// Create an AABB from two corner points.
    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        let x = Interval::new(a.x.min(b.x), a.x.max(b.x));
        let y = Interval::new(a.y.min(b.y), a.y.max(b.y));
        let z = Interval::new(a.z.min(b.z), a.z.max(b.z));
        Self { x, y, z }
    }

    /// Create an AABB that surrounds two other AABBs.
    ///
    /// [`Aabb::EMPTY`] is the identity element of this operation.
    pub fn surrounding(box0: &Aabb, box1: &Aabb) -> Self {
        Self {
            x: Interval::surrounding(&box0.x, &box1.x),
            y: Interval::surrounding(&box0.y, &box1.y),
            z: Interval::surrounding(&box0.z, &box1.z),
        }
    }

    /// Get the interval for a specific axis (0=X, 1=Y, 2=Z).
    pub fn axis_interval(&self, n: usize) -> Interval {
        match n {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// The minimum corner of the box.
    pub fn min(&self) -> Vec3 {
        Vec3::new(self.x.min, self.y.min, self.z.min)
    }

    /// The maximum corner of the box.
    pub fn max(&self) -> Vec3 {
        Vec3::new(self.x.max, self.y.max, self.z.max)
    }

    /// Vector from the minimum to the maximum corner.
    pub fn diagonal(&self) -> Vec3 {
        self.max() - self.min()
    }

    /// Returns the center point of the bounding box.
    pub fn centroid(&self) -> Vec3 {
        (self.min() + self.max()) * 0.5
    }

    /// True if the box contains nothing (some axis has min > max).
    pub fn is_empty(&self) -> bool {
        self.x.min > self.x.max || self.y.min > self.y.max || self.z.min > self.z.max
    }

    /// True if any bound coordinate is NaN.
    pub fn has_nan(&self) -> bool {
        self.min().is_nan() || self.max().is_nan()
    }

    /// Returns the index (0=X, 1=Y, 2=Z) of the axis with the longest extent.
    pub fn longest_axis(&self) -> usize {
        let x_size = self.x.size();
        let y_size = self.y.size();
        let z_size = self.z.size();

        if x_size > y_size && x_size > z_size {
            0
        } else if y_size > z_size {
            1
        } else {
            2
        }
    }

    /// Total surface area of the box; zero for an empty box.
    pub fn surface_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.diagonal();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Cut the box at `t` along `axis`, returning the below and above halves.
    ///
    /// `t` must lie within the box's extent on that axis.
    pub fn split(&self, axis: usize, t: f32) -> (Aabb, Aabb) {
        debug_assert!(axis < 3, "axis not in range");
        debug_assert!(
            self.axis_interval(axis).contains(t),
            "split position outside the box"
        );

        let mut below = *self;
        let mut above = *self;
        match axis {
            0 => {
                below.x.max = t;
                above.x.min = t;
            }
            1 => {
                below.y.max = t;
                above.y.min = t;
            }
            _ => {
                below.z.max = t;
                above.z.min = t;
            }
        }
        (below, above)
    }

    /// Intersect a ray with this AABB using the slab method.
    ///
    /// Returns the parametric interval in which the ray overlaps the box,
    /// clipped to the ray's own `[tmin, tmax]`, or `None` on a miss.
    /// Zero-width slabs are hittable: the interval may collapse to a point.
    pub fn hit_interval(&self, r: &Ray) -> Option<Interval> {
        let mut tmin = r.tmin;
        let mut tmax = r.tmax;

        for axis in 0..3 {
            let ax = self.axis_interval(axis);
            let adinv = 1.0 / r.direction[axis];
            let t0 = (ax.min - r.origin[axis]) * adinv;
            let t1 = (ax.max - r.origin[axis]) * adinv;

            // NaN comparisons are false, so a degenerate slab term
            // leaves the interval untouched rather than poisoning it
            if adinv < 0.0 {
                if t1 > tmin {
                    tmin = t1;
                }
                if t0 < tmax {
                    tmax = t0;
                }
            } else {
                if t0 > tmin {
                    tmin = t0;
                }
                if t1 < tmax {
                    tmax = t1;
                }
            }

            if tmin > tmax {
                return None;
            }
        }

        Some(Interval::new(tmin, tmax))
    }

    /// An empty box; identity for [`Aabb::surrounding`].
    pub const EMPTY: Aabb = Aabb {
        x: Interval::EMPTY,
        y: Interval::EMPTY,
        z: Interval::EMPTY,
    };

    /// A box that contains everything.
    pub const UNIVERSE: Aabb = Aabb {
        x: Interval::UNIVERSE,
        y: Interval::UNIVERSE,
        z: Interval::UNIVERSE,
    };
}
