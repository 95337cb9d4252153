//! SAH kd-tree over primitive bounding boxes.
//!
//! The tree is built once, single-threaded, from a static primitive set
//! and then serves any-hit and nearest-hit queries concurrently from the
//! render workers. Nodes live in one flat array (the below child sits
//! implicitly at `node + 1`, the above child at a stored offset), the
//! primitive indices of all leaves in a second one, so traversal touches
//! memory sequentially and allocates nothing but its small stack.
//!
//! Split planes are chosen by the surface-area heuristic: sweep the
//! sorted bound edges of an axis, estimate the expected intersection
//! cost on both sides of each candidate plane, and keep the cheapest.

use crate::accelerator::Accelerator;
use crate::edge::{axis_edges, EdgeKind};
use crate::primitive::{Hit, PrimitiveHandle};
use lux_math::{Aabb, Ray, Vec3};

/// Build-time knobs of the tree.
///
/// The costs are model constants of the surface-area heuristic, not
/// physics; the defaults work well for typical scenes.
#[derive(Debug, Clone)]
pub struct KdTreeConfig {
    /// Estimated cost of one primitive intersection test.
    pub isect_cost: f32,
    /// Estimated cost of stepping through one interior node.
    pub traversal_cost: f32,
    /// Cost discount in [0, 1] for splits that cut off empty space.
    pub empty_bonus: f32,
    /// Leaf threshold: nodes with this many primitives or fewer stop splitting.
    pub max_prims: usize,
    /// Maximum tree depth; 0 derives `8 + 1.4 * log2(n)`, floored at 5.
    pub max_depth: usize,
}

impl Default for KdTreeConfig {
    fn default() -> Self {
        Self {
            isect_cost: 80.0,
            traversal_cost: 1.0,
            empty_bonus: 0.5,
            max_prims: 1,
            max_depth: 0,
        }
    }
}

/// Counters collected while building, reported via `log::debug!` and
/// kept around for inspection.
#[derive(Debug, Default, Clone)]
pub struct BuildStats {
    /// Interior nodes written.
    pub interior_nodes: usize,
    /// Leaf nodes written.
    pub leaves: usize,
    /// Leaves holding no primitives (empty space cut off by a split).
    pub empty_leaves: usize,
    /// Primitives excluded for NaN bounds.
    pub skipped: usize,
    /// Deepest leaf, counted from the root.
    pub max_leaf_depth: usize,
    /// Largest primitive count in a single leaf.
    pub max_leaf_prims: usize,
    /// Total primitive references across all leaves (straddlers counted
    /// once per leaf they appear in).
    pub sum_leaf_prims: usize,
}

impl BuildStats {
    fn record_interior(&mut self) {
        self.interior_nodes += 1;
    }

    fn record_leaf(&mut self, depth: usize, n: usize) {
        self.leaves += 1;
        if n == 0 {
            self.empty_leaves += 1;
        }
        self.max_leaf_depth = self.max_leaf_depth.max(depth);
        self.max_leaf_prims = self.max_leaf_prims.max(n);
        self.sum_leaf_prims += n;
    }

    /// Average primitive count over all leaves, empty ones included.
    pub fn avg_leaf_prims(&self) -> f32 {
        if self.leaves == 0 {
            0.0
        } else {
            self.sum_leaf_prims as f32 / self.leaves as f32
        }
    }
}

const TAG_LEAF: u32 = 3;
const TAG_SHIFT: u32 = 30;
const OFFSET_MASK: u32 = (1 << TAG_SHIFT) - 1;

/// One tree node in two machine words.
///
/// `header` packs a 2-bit tag (the split axis, or 3 for a leaf) with a
/// 30-bit offset: the above-child node index for interior nodes, the
/// first slot in the primitive-index array for leaves. `payload` holds
/// the split position's float bits (interior) or the primitive count
/// (leaf).
#[derive(Debug, Clone, Copy)]
struct KdNode {
    header: u32,
    payload: u32,
}

impl KdNode {
    fn leaf(first_index: usize, count: usize) -> Self {
        debug_assert!(first_index as u64 <= OFFSET_MASK as u64);
        Self {
            header: (TAG_LEAF << TAG_SHIFT) | first_index as u32,
            payload: count as u32,
        }
    }

    /// Interior node; the above-child offset is patched in once the
    /// below subtree has been written.
    fn interior(axis: usize, split: f32) -> Self {
        Self {
            header: (axis as u32) << TAG_SHIFT,
            payload: split.to_bits(),
        }
    }

    fn is_leaf(self) -> bool {
        self.header >> TAG_SHIFT == TAG_LEAF
    }

    fn split_axis(self) -> usize {
        (self.header >> TAG_SHIFT) as usize
    }

    fn split_pos(self) -> f32 {
        f32::from_bits(self.payload)
    }

    fn offset(self) -> usize {
        (self.header & OFFSET_MASK) as usize
    }

    fn prim_count(self) -> usize {
        self.payload as usize
    }

    fn set_above_child(&mut self, above: usize) {
        debug_assert!(above as u64 <= OFFSET_MASK as u64);
        self.header = (self.header & !OFFSET_MASK) | above as u32;
    }
}

/// The split a SAH sweep settled on.
struct SplitChoice {
    axis: usize,
    t: f32,
    cost: f32,
    /// Side that planar-at-the-plane primitives were credited to.
    planar_below: bool,
}

/// Pending traversal step: a node and the parametric interval in which
/// the ray overlaps it.
#[derive(Clone, Copy)]
struct TodoEntry {
    node: usize,
    t_min: f32,
    t_max: f32,
}

/// SAH kd-tree index over a set of primitive handles.
pub struct KdTree {
    config: KdTreeConfig,
    primitives: Vec<PrimitiveHandle>,
    nodes: Vec<KdNode>,
    prim_indices: Vec<u32>,
    bounds: Aabb,
    max_depth: usize,
    stats: BuildStats,
}

impl KdTree {
    /// Build the index over the given handles.
    ///
    /// The tree keeps clones of the handles but never looks past the
    /// [`crate::Primitive`] capability trait. Primitives whose bounds
    /// contain NaN are excluded with a warning; an empty (or entirely
    /// excluded) set yields an index that reports misses everywhere.
    pub fn build(primitives: Vec<PrimitiveHandle>, config: KdTreeConfig) -> Self {
        let mut tree = Self {
            config,
            primitives,
            nodes: Vec::new(),
            prim_indices: Vec::new(),
            bounds: Aabb::EMPTY,
            max_depth: 0,
            stats: BuildStats::default(),
        };
        tree.build_impl();
        tree
    }

    /// Counters from the most recent build.
    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    fn build_impl(&mut self) {
        self.nodes.clear();
        self.prim_indices.clear();
        self.stats = BuildStats::default();
        self.bounds = Aabb::EMPTY;

        // Gather exact world bounds, dropping anything with NaN
        // coordinates so one corrupt primitive cannot abort the build.
        let mut prim_bounds = Vec::with_capacity(self.primitives.len());
        let mut prim_nums = Vec::with_capacity(self.primitives.len());
        for (i, prim) in self.primitives.iter().enumerate() {
            let b = prim.world_bounds();
            if b.has_nan() {
                log::warn!("kd-tree: skipping primitive {i} with NaN world bounds");
                self.stats.skipped += 1;
                prim_bounds.push(Aabb::EMPTY);
                continue;
            }
            self.bounds = Aabb::surrounding(&self.bounds, &b);
            prim_bounds.push(b);
            prim_nums.push(i as u32);
        }

        let n = prim_nums.len();
        self.max_depth = if self.config.max_depth > 0 {
            self.config.max_depth
        } else {
            derived_max_depth(n)
        };

        let root_bounds = self.bounds;
        let max_depth = self.max_depth;
        self.build_node(&root_bounds, &prim_bounds, prim_nums, max_depth, 0);

        log::debug!(
            "kd-tree built: {} prims ({} skipped), {} interior, {} leaves \
             ({} empty), max depth {}/{}, prims/leaf avg {:.2} max {}",
            n,
            self.stats.skipped,
            self.stats.interior_nodes,
            self.stats.leaves,
            self.stats.empty_leaves,
            self.stats.max_leaf_depth,
            self.max_depth,
            self.stats.avg_leaf_prims(),
            self.stats.max_leaf_prims,
        );
    }

    /// Recursively partition `prims` and append the subtree's nodes.
    ///
    /// `depth` counts down to zero; `bad_refines` counts consecutive
    /// accepted splits that cost more than leaving the node a leaf.
    fn build_node(
        &mut self,
        node_bounds: &Aabb,
        all_bounds: &[Aabb],
        prims: Vec<u32>,
        depth: usize,
        mut bad_refines: u32,
    ) {
        let n = prims.len();
        if n <= self.config.max_prims || depth == 0 {
            self.push_leaf(&prims, depth);
            return;
        }

        let split = match self.select_split(node_bounds, all_bounds, &prims) {
            Some(split) => split,
            None => {
                // no usable plane on any axis
                self.push_leaf(&prims, depth);
                return;
            }
        };

        let leaf_cost = self.config.isect_cost * n as f32;
        if split.cost > leaf_cost {
            bad_refines += 1;
        }
        if (split.cost > 4.0 * leaf_cost && n < 16) || bad_refines == 3 {
            self.push_leaf(&prims, depth);
            return;
        }

        // Classify against the chosen plane; straddlers go to both sides,
        // which is why the children's counts may sum to more than n.
        let mut below = Vec::new();
        let mut above = Vec::new();
        for &pn in &prims {
            let ax = all_bounds[pn as usize].axis_interval(split.axis);
            if ax.min == split.t && ax.max == split.t {
                if split.planar_below {
                    below.push(pn);
                } else {
                    above.push(pn);
                }
            } else {
                if ax.min < split.t {
                    below.push(pn);
                }
                if ax.max > split.t {
                    above.push(pn);
                }
            }
        }
        drop(prims);

        let (below_bounds, above_bounds) = node_bounds.split(split.axis, split.t);

        let node_index = self.nodes.len();
        self.nodes.push(KdNode::interior(split.axis, split.t));
        self.stats.record_interior();

        self.build_node(&below_bounds, all_bounds, below, depth - 1, bad_refines);
        let above_child = self.nodes.len();
        self.nodes[node_index].set_above_child(above_child);
        self.build_node(&above_bounds, all_bounds, above, depth - 1, bad_refines);
    }

    fn push_leaf(&mut self, prims: &[u32], depth_remaining: usize) {
        let first_index = self.prim_indices.len();
        self.prim_indices.extend_from_slice(prims);
        self.nodes.push(KdNode::leaf(first_index, prims.len()));
        self.stats
            .record_leaf(self.max_depth - depth_remaining, prims.len());
    }

    /// Sweep the bound edges of up to three axes for the cheapest split
    /// strictly inside `node_bounds`, starting with the longest axis.
    fn select_split(
        &self,
        node_bounds: &Aabb,
        all_bounds: &[Aabb],
        prims: &[u32],
    ) -> Option<SplitChoice> {
        let n = prims.len();
        let d = node_bounds.diagonal();
        let inv_total_sa = 1.0 / node_bounds.surface_area();

        let mut best: Option<SplitChoice> = None;
        let mut axis = node_bounds.longest_axis();

        for _ in 0..3 {
            let edges = axis_edges(all_bounds, prims, axis);
            let (other0, other1) = ((axis + 1) % 3, (axis + 2) % 3);
            // area of the two faces normal to the axis, and the length
            // term that scales with the cut position
            let cap = d[other0] * d[other1];
            let rim = d[other0] + d[other1];
            let ax = node_bounds.axis_interval(axis);

            let mut n_below = 0usize;
            let mut n_above = n;
            let mut i = 0;
            while i < edges.len() {
                let t = edges[i].t;

                // count the events sharing this plane, in kind-rank order
                let mut p_close = 0usize;
                let mut p_planar = 0usize;
                let mut p_open = 0usize;
                while i < edges.len() && edges[i].t == t && edges[i].kind == EdgeKind::Close {
                    p_close += 1;
                    i += 1;
                }
                while i < edges.len() && edges[i].t == t && edges[i].kind == EdgeKind::Planar {
                    p_planar += 1;
                    i += 1;
                }
                while i < edges.len() && edges[i].t == t && edges[i].kind == EdgeKind::Open {
                    p_open += 1;
                    i += 1;
                }

                n_above -= p_close + p_planar;

                if t > ax.min && t < ax.max {
                    let d_below = t - ax.min;
                    let d_above = ax.max - t;
                    let p_below = 2.0 * (cap + d_below * rim) * inv_total_sa;
                    let p_above = 2.0 * (cap + d_above * rim) * inv_total_sa;

                    // planar prims are credited to the thinner cell, ties below
                    let planar_below = d_below <= d_above;
                    let nl = n_below + if planar_below { p_planar } else { 0 };
                    let na = n_above + if planar_below { 0 } else { p_planar };

                    let eb = if (nl == 0 && d_below > 0.0) || (na == 0 && d_above > 0.0) {
                        self.config.empty_bonus
                    } else {
                        0.0
                    };
                    let cost = self.config.traversal_cost
                        + self.config.isect_cost
                            * (1.0 - eb)
                            * (p_below * nl as f32 + p_above * na as f32);

                    // a degenerate node has zero surface area, which turns
                    // every cost into NaN; those candidates must lose so
                    // the node falls back to a leaf
                    if cost.is_finite() && best.as_ref().map_or(true, |b| cost < b.cost) {
                        best = Some(SplitChoice {
                            axis,
                            t,
                            cost,
                            planar_below,
                        });
                    }
                }

                n_below += p_open + p_planar;
            }
            debug_assert!(
                n_below == n && n_above == 0,
                "edge sweep did not account for every primitive"
            );

            if best.is_some() {
                break;
            }
            axis = (axis + 1) % 3;
        }

        best
    }
}

impl Accelerator for KdTree {
    fn world_bounds(&self) -> Aabb {
        self.bounds
    }

    fn any_hit(&self, ray: &Ray) -> bool {
        let root = match self.bounds.hit_interval(ray) {
            Some(interval) => interval,
            None => return false,
        };
        let mut t_min = root.min;
        let mut t_max = root.max;

        let inv_dir = Vec3::new(
            1.0 / ray.direction.x,
            1.0 / ray.direction.y,
            1.0 / ray.direction.z,
        );
        let mut todo: Vec<TodoEntry> = Vec::with_capacity(self.max_depth + 2);
        let mut node_index = 0usize;

        loop {
            let node = self.nodes[node_index];
            if node.is_leaf() {
                let first = node.offset();
                for &pn in &self.prim_indices[first..first + node.prim_count()] {
                    if self.primitives[pn as usize].intersects(ray) {
                        return true;
                    }
                }
                match todo.pop() {
                    Some(entry) => {
                        node_index = entry.node;
                        t_min = entry.t_min;
                        t_max = entry.t_max;
                    }
                    None => return false,
                }
            } else {
                let axis = node.split_axis();
                let split = node.split_pos();
                let t_plane = (split - ray.origin[axis]) * inv_dir[axis];

                let below_first = ray.origin[axis] < split
                    || (ray.origin[axis] == split && ray.direction[axis] <= 0.0);
                let (first, second) = if below_first {
                    (node_index + 1, node.offset())
                } else {
                    (node.offset(), node_index + 1)
                };

                if t_plane > t_max || t_plane <= 0.0 {
                    node_index = first;
                } else if t_plane < t_min {
                    node_index = second;
                } else {
                    todo.push(TodoEntry {
                        node: second,
                        t_min: t_plane,
                        t_max,
                    });
                    node_index = first;
                    t_max = t_plane;
                }
            }
        }
    }

    fn nearest_hit(&self, ray: &mut Ray) -> Option<Hit> {
        let root = self.bounds.hit_interval(ray)?;
        let mut t_min = root.min;
        let mut t_max = root.max;

        let inv_dir = Vec3::new(
            1.0 / ray.direction.x,
            1.0 / ray.direction.y,
            1.0 / ray.direction.z,
        );
        let mut todo: Vec<TodoEntry> = Vec::with_capacity(self.max_depth + 2);
        let mut nearest: Option<Hit> = None;
        let mut node_index = 0usize;

        loop {
            // nothing past this interval can beat the hit we already have
            if ray.tmax < t_min {
                break;
            }

            let node = self.nodes[node_index];
            if node.is_leaf() {
                let first = node.offset();
                for &pn in &self.prim_indices[first..first + node.prim_count()] {
                    // each hit narrows ray.tmax, so the last Some wins
                    if let Some(hit) = self.primitives[pn as usize].nearest_intersection(ray) {
                        nearest = Some(hit);
                    }
                }
                match todo.pop() {
                    Some(entry) => {
                        node_index = entry.node;
                        t_min = entry.t_min;
                        t_max = entry.t_max;
                    }
                    None => break,
                }
            } else {
                let axis = node.split_axis();
                let split = node.split_pos();
                let t_plane = (split - ray.origin[axis]) * inv_dir[axis];

                let below_first = ray.origin[axis] < split
                    || (ray.origin[axis] == split && ray.direction[axis] <= 0.0);
                let (first, second) = if below_first {
                    (node_index + 1, node.offset())
                } else {
                    (node.offset(), node_index + 1)
                };

                if t_plane > t_max || t_plane <= 0.0 {
                    node_index = first;
                } else if t_plane < t_min {
                    node_index = second;
                } else {
                    todo.push(TodoEntry {
                        node: second,
                        t_min: t_plane,
                        t_max,
                    });
                    node_index = first;
                    t_max = t_plane;
                }
            }
        }

        nearest
    }

    fn rebuild(&mut self) {
        self.build_impl();
    }
}

/// Depth cap for an n-primitive tree: `8 + 1.4 * log2(n)`, floored at 5.
fn derived_max_depth(n: usize) -> usize {
    // log2(0) is -inf, so the floor also covers the empty set
    (8.0 + 1.4 * (n as f32).log2()).round().max(5.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::LinearScan;
    use crate::primitive::Primitive;
    use crate::Sphere;
    use lux_math::Interval;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rayon::prelude::*;
    use std::sync::{Arc, Mutex};

    fn sphere(center: Vec3, radius: f32) -> PrimitiveHandle {
        Arc::new(Sphere::new(center, radius))
    }

    /// Axis-aligned box primitive; its surface is its bounding box.
    struct BoxPrim {
        bbox: Aabb,
    }

    impl BoxPrim {
        fn new(min: Vec3, max: Vec3) -> Self {
            Self {
                bbox: Aabb::from_points(min, max),
            }
        }
    }

    impl Primitive for BoxPrim {
        fn world_bounds(&self) -> Aabb {
            self.bbox
        }

        fn intersects(&self, ray: &Ray) -> bool {
            self.bbox.hit_interval(ray).is_some()
        }

        fn nearest_intersection(&self, ray: &mut Ray) -> Option<Hit> {
            let range = self.bbox.hit_interval(ray)?;
            let t = if range.min > ray.tmin {
                range.min
            } else {
                range.max
            };
            if t >= ray.tmax {
                return None;
            }
            ray.tmax = t;
            Some(Hit::new(ray.at(t), t))
        }
    }

    /// Primitive whose bounds are corrupt; must be skipped, not fatal.
    struct NanPrim;

    impl Primitive for NanPrim {
        fn world_bounds(&self) -> Aabb {
            Aabb::new(
                Interval::new(f32::NAN, f32::NAN),
                Interval::new(0.0, 1.0),
                Interval::new(0.0, 1.0),
            )
        }

        fn intersects(&self, _ray: &Ray) -> bool {
            false
        }

        fn nearest_intersection(&self, _ray: &mut Ray) -> Option<Hit> {
            None
        }
    }

    /// Wraps a sphere and records `ray.tmax` on entry to every
    /// nearest-intersection call, to observe the traversal's pruning.
    struct TmaxProbe {
        inner: Sphere,
        seen: Arc<Mutex<Vec<f32>>>,
    }

    impl Primitive for TmaxProbe {
        fn world_bounds(&self) -> Aabb {
            self.inner.world_bounds()
        }

        fn intersects(&self, ray: &Ray) -> bool {
            self.inner.intersects(ray)
        }

        fn nearest_intersection(&self, ray: &mut Ray) -> Option<Hit> {
            self.seen.lock().unwrap().push(ray.tmax);
            self.inner.nearest_intersection(ray)
        }
    }

    fn random_sphere_scene(rng: &mut StdRng, count: usize) -> Vec<PrimitiveHandle> {
        (0..count)
            .map(|_| {
                let center = Vec3::new(
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                );
                sphere(center, rng.gen_range(0.2..1.0))
            })
            .collect()
    }

    fn random_ray(rng: &mut StdRng) -> Ray {
        let origin = Vec3::new(
            rng.gen_range(-15.0..15.0),
            rng.gen_range(-15.0..15.0),
            rng.gen_range(-15.0..15.0),
        );
        let direction = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        )
        .normalize_or_zero();
        if direction == Vec3::ZERO {
            Ray::new(origin, Vec3::X)
        } else {
            Ray::new(origin, direction)
        }
    }

    #[test]
    fn test_empty_build() {
        let tree = KdTree::build(vec![], KdTreeConfig::default());

        assert!(tree.world_bounds().is_empty());
        assert!(!tree.any_hit(&Ray::new(Vec3::ZERO, Vec3::Z)));

        let mut ray = Ray::new(Vec3::ZERO, Vec3::Z);
        assert!(tree.nearest_hit(&mut ray).is_none());
        assert_eq!(ray.tmax, f32::INFINITY);
    }

    #[test]
    fn test_two_spheres_scenario() {
        // Unit spheres at (0, -5, 0) and (0, 5, 0)
        let tree = KdTree::build(
            vec![
                sphere(Vec3::new(0.0, -5.0, 0.0), 1.0),
                sphere(Vec3::new(0.0, 5.0, 0.0), 1.0),
            ],
            KdTreeConfig::default(),
        );

        // From (0, -5, -10) toward the near sphere: surface at distance 9
        let mut ray = Ray::new(Vec3::new(0.0, -5.0, -10.0), Vec3::new(0.0, 0.0, 1.0));
        let hit = tree.nearest_hit(&mut ray).expect("should hit near sphere");
        assert!((hit.t - 9.0).abs() < 1e-3);
        assert!(tree.any_hit(&Ray::new(
            Vec3::new(0.0, -5.0, -10.0),
            Vec3::new(0.0, 0.0, 1.0)
        )));

        // Pointing away from the whole scene
        let away = Ray::new(Vec3::new(100.0, 100.0, 100.0), Vec3::new(1.0, 1.0, 1.0));
        assert!(!tree.any_hit(&away));
    }

    #[test]
    fn test_nearest_hit_narrows_tmax() {
        let tree = KdTree::build(
            vec![sphere(Vec3::new(0.0, 0.0, -10.0), 1.0)],
            KdTreeConfig::default(),
        );

        let mut ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        let hit = tree.nearest_hit(&mut ray).expect("should hit");
        assert!((hit.t - 9.0).abs() < 1e-4);
        assert_eq!(ray.tmax, hit.t);
    }

    #[test]
    fn test_matches_linear_scan() {
        let mut rng = StdRng::seed_from_u64(42);
        let scene = random_sphere_scene(&mut rng, 64);

        let tree = KdTree::build(scene.clone(), KdTreeConfig::default());
        let oracle = LinearScan::new(scene);

        for _ in 0..200 {
            let ray = random_ray(&mut rng);

            assert_eq!(
                tree.any_hit(&ray),
                oracle.any_hit(&ray),
                "any_hit disagrees for {ray:?}"
            );

            let mut tree_ray = ray;
            let mut oracle_ray = ray;
            let tree_hit = tree.nearest_hit(&mut tree_ray);
            let oracle_hit = oracle.nearest_hit(&mut oracle_ray);

            match (tree_hit, oracle_hit) {
                (None, None) => {}
                (Some(a), Some(b)) => {
                    assert!(
                        (a.t - b.t).abs() < 1e-3,
                        "nearest_hit distance disagrees for {ray:?}: {} vs {}",
                        a.t,
                        b.t
                    );
                }
                (a, b) => panic!("nearest_hit disagrees for {ray:?}: {a:?} vs {b:?}"),
            }
        }
    }

    #[test]
    fn test_idempotent_build() {
        let mut rng = StdRng::seed_from_u64(7);
        let scene = random_sphere_scene(&mut rng, 32);

        let tree_a = KdTree::build(scene.clone(), KdTreeConfig::default());
        let tree_b = KdTree::build(scene, KdTreeConfig::default());

        for _ in 0..100 {
            let ray = random_ray(&mut rng);
            assert_eq!(tree_a.any_hit(&ray), tree_b.any_hit(&ray));

            let mut ray_a = ray;
            let mut ray_b = ray;
            let hit_a = tree_a.nearest_hit(&mut ray_a);
            let hit_b = tree_b.nearest_hit(&mut ray_b);
            assert_eq!(hit_a.map(|h| h.t), hit_b.map(|h| h.t));
        }
    }

    #[test]
    fn test_rebuild_preserves_answers() {
        let mut rng = StdRng::seed_from_u64(11);
        let scene = random_sphere_scene(&mut rng, 24);
        let mut tree = KdTree::build(scene, KdTreeConfig::default());

        let rays: Vec<Ray> = (0..50).map(|_| random_ray(&mut rng)).collect();
        let before: Vec<bool> = rays.iter().map(|r| tree.any_hit(r)).collect();

        tree.rebuild();

        let after: Vec<bool> = rays.iter().map(|r| tree.any_hit(r)).collect();
        assert_eq!(before, after);
        assert!(!tree.world_bounds().is_empty());
    }

    #[test]
    fn test_straddling_primitive_found_from_both_sides() {
        // Two clusters force a split near the middle; the slab box
        // straddles any plane between them.
        let mut scene: Vec<PrimitiveHandle> = Vec::new();
        for i in 0..8 {
            let x = -10.0 + i as f32 * 0.5;
            scene.push(sphere(Vec3::new(x, 0.0, 0.0), 0.2));
            let x = 6.0 + i as f32 * 0.5;
            scene.push(sphere(Vec3::new(x, 0.0, 0.0), 0.2));
        }
        scene.push(Arc::new(BoxPrim::new(
            Vec3::new(-4.0, -0.5, -0.5),
            Vec3::new(4.0, 0.5, 0.5),
        )));

        let tree = KdTree::build(scene, KdTreeConfig::default());

        // Enter the scene from the left: the straddler's near face is at x=-4
        let mut from_left = Ray::new(Vec3::new(-20.0, 0.0, 0.0), Vec3::X);
        let hit = tree.nearest_hit(&mut from_left);
        assert!(hit.is_some());

        // And from the right: near face at x=4, distance 16
        let mut from_right = Ray::new(Vec3::new(20.0, 0.0, 0.0), -Vec3::X);
        let hit = tree.nearest_hit(&mut from_right).expect("should hit");
        assert!(hit.t <= 16.0 + 1e-3);
    }

    #[test]
    fn test_planar_primitive_is_hit() {
        // Zero-thickness rectangle at x = 0 among regular boxes
        let scene: Vec<PrimitiveHandle> = vec![
            Arc::new(BoxPrim::new(
                Vec3::new(0.0, -1.0, -1.0),
                Vec3::new(0.0, 1.0, 1.0),
            )),
            Arc::new(BoxPrim::new(
                Vec3::new(3.0, -1.0, -1.0),
                Vec3::new(4.0, 1.0, 1.0),
            )),
            Arc::new(BoxPrim::new(
                Vec3::new(-4.0, -1.0, -1.0),
                Vec3::new(-3.0, 1.0, 1.0),
            )),
        ];

        let tree = KdTree::build(scene, KdTreeConfig::default());

        let mut ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X);
        let hit = tree.nearest_hit(&mut ray).expect("planar box should hit");
        assert!((hit.t - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_sah_depth_and_leaf_occupancy() {
        // 4x4x4 grid of well separated unit boxes
        let mut scene: Vec<PrimitiveHandle> = Vec::new();
        for ix in 0..4 {
            for iy in 0..4 {
                for iz in 0..4 {
                    let min = Vec3::new(ix as f32 * 2.0, iy as f32 * 2.0, iz as f32 * 2.0);
                    scene.push(Arc::new(BoxPrim::new(min, min + Vec3::ONE)));
                }
            }
        }

        let tree = KdTree::build(scene, KdTreeConfig::default());
        let stats = tree.stats();

        // 8 + 1.4 * log2(64) = 16.4 -> 16
        assert_eq!(derived_max_depth(64), 16);
        assert!(stats.max_leaf_depth <= 16);
        assert!(
            stats.avg_leaf_prims() <= 4.0,
            "leaf bloat: avg {} prims/leaf",
            stats.avg_leaf_prims()
        );
    }

    #[test]
    fn test_nan_primitive_skipped() {
        let _ = env_logger::builder().is_test(true).try_init();

        let scene: Vec<PrimitiveHandle> = vec![
            Arc::new(NanPrim),
            sphere(Vec3::new(0.0, 0.0, -5.0), 1.0),
        ];
        let tree = KdTree::build(scene, KdTreeConfig::default());

        assert_eq!(tree.stats().skipped, 1);

        // The healthy primitive is still indexed
        let mut ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        let hit = tree.nearest_hit(&mut ray).expect("sphere survives");
        assert!((hit.t - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_all_degenerate_scene_reports_misses() {
        let scene: Vec<PrimitiveHandle> = vec![Arc::new(NanPrim), Arc::new(NanPrim)];
        let tree = KdTree::build(scene, KdTreeConfig::default());

        assert_eq!(tree.stats().skipped, 2);
        assert!(tree.world_bounds().is_empty());
        assert!(!tree.any_hit(&Ray::new(Vec3::ZERO, Vec3::Z)));

        let mut ray = Ray::new(Vec3::ZERO, Vec3::Z);
        assert!(tree.nearest_hit(&mut ray).is_none());
    }

    #[test]
    fn test_monotonic_tmax_during_nearest_hit() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        // Several spheres along one line so the ray crosses many leaves
        let scene: Vec<PrimitiveHandle> = (0..6)
            .map(|i| {
                Arc::new(TmaxProbe {
                    inner: Sphere::new(Vec3::new(0.0, 0.0, -3.0 * (i + 1) as f32), 0.5),
                    seen: Arc::clone(&seen),
                }) as PrimitiveHandle
            })
            .collect();

        let tree = KdTree::build(scene, KdTreeConfig::default());
        let mut ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        let hit = tree.nearest_hit(&mut ray).expect("should hit");
        assert!((hit.t - 2.5).abs() < 1e-4);

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        for pair in seen.windows(2) {
            assert!(
                pair[1] <= pair[0],
                "ray.tmax increased between leaf visits: {:?}",
                *seen
            );
        }
    }

    #[test]
    fn test_concurrent_queries_match_serial() {
        let mut rng = StdRng::seed_from_u64(99);
        let scene = random_sphere_scene(&mut rng, 48);
        let tree = KdTree::build(scene, KdTreeConfig::default());

        let rays: Vec<Ray> = (0..256).map(|_| random_ray(&mut rng)).collect();
        let serial: Vec<Option<f32>> = rays
            .iter()
            .map(|r| {
                let mut ray = *r;
                tree.nearest_hit(&mut ray).map(|h| h.t)
            })
            .collect();

        let parallel: Vec<Option<f32>> = rays
            .par_iter()
            .map(|r| {
                let mut ray = *r;
                tree.nearest_hit(&mut ray).map(|h| h.t)
            })
            .collect();

        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_collinear_points_fall_back_to_leaf() {
        // Zero-extent primitives on a line: the node bounds have zero
        // surface area, so no split plane can beat the leaf cost and
        // the builder must not manufacture interior nodes.
        let scene: Vec<PrimitiveHandle> = (0..4)
            .map(|i| {
                let p = Vec3::new(0.0, 0.0, i as f32);
                Arc::new(BoxPrim::new(p, p)) as PrimitiveHandle
            })
            .collect();

        let tree = KdTree::build(scene, KdTreeConfig::default());
        assert_eq!(tree.stats().interior_nodes, 0);
        assert_eq!(tree.stats().leaves, 1);

        // Queries through the degenerate set still work
        assert!(tree.any_hit(&Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z)));
        assert!(!tree.any_hit(&Ray::new(Vec3::new(1.0, 0.0, -5.0), Vec3::Z)));
    }

    #[test]
    fn test_derived_max_depth() {
        assert_eq!(derived_max_depth(0), 5);
        assert_eq!(derived_max_depth(1), 8);
        assert_eq!(derived_max_depth(64), 16);
        // floor of 5 even for tiny n is already covered; large n grows slowly
        assert!(derived_max_depth(1_000_000) < 40);
    }

    #[test]
    fn test_coarse_leaves_still_correct() {
        let mut rng = StdRng::seed_from_u64(5);
        let scene = random_sphere_scene(&mut rng, 40);

        let config = KdTreeConfig {
            max_prims: 8,
            ..KdTreeConfig::default()
        };
        let tree = KdTree::build(scene.clone(), config);
        let oracle = LinearScan::new(scene);

        // A coarser tree is still correct
        for _ in 0..100 {
            let ray = random_ray(&mut rng);
            assert_eq!(tree.any_hit(&ray), oracle.any_hit(&ray));
        }
    }
}
