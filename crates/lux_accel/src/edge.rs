//! Split events ("bound edges") feeding the SAH sweep.
//!
//! Each primitive contributes events on every axis: an `Open` where its
//! box begins and a `Close` where it ends, or a single `Planar` event if
//! it is flat on that axis. The builder sorts these and sweeps them
//! left-to-right to count primitives on either side of each candidate
//! split plane.

use lux_math::Aabb;
use std::cmp::Ordering;

/// Kind of a split event.
///
/// The ordering at equal positions is load-bearing: a box closing at a
/// plane must leave the upper side before a box opening there enters the
/// lower one, with planar boxes counted in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeKind {
    Close,
    Planar,
    Open,
}

/// One split event: primitive `prim`'s bounds touch `t` on the swept axis.
#[derive(Debug, Clone, Copy)]
pub struct BoundEdge {
    pub t: f32,
    pub prim: u32,
    pub kind: EdgeKind,
}

impl BoundEdge {
    fn new(t: f32, prim: u32, kind: EdgeKind) -> Self {
        Self { t, prim, kind }
    }
}

impl PartialEq for BoundEdge {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BoundEdge {}

impl PartialOrd for BoundEdge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BoundEdge {
    fn cmp(&self, other: &Self) -> Ordering {
        // total_cmp keeps the order deterministic; NaN positions are
        // excluded before events are built
        self.t
            .total_cmp(&other.t)
            .then(self.kind.cmp(&other.kind))
    }
}

/// Build the sorted event list for `axis` over the given primitives.
///
/// `all_bounds` is indexed by primitive number; `prims` selects the
/// subset belonging to the node being split. A primitive flat on the
/// axis yields one `Planar` event, anything else an `Open` at its lower
/// bound and a `Close` at its upper bound, so the list holds between
/// `n` and `2n` events.
pub fn axis_edges(all_bounds: &[Aabb], prims: &[u32], axis: usize) -> Vec<BoundEdge> {
    let mut edges = Vec::with_capacity(prims.len() * 2);

    for &pn in prims {
        let ax = all_bounds[pn as usize].axis_interval(axis);
        if ax.size() == 0.0 {
            edges.push(BoundEdge::new(ax.min, pn, EdgeKind::Planar));
        } else {
            edges.push(BoundEdge::new(ax.min, pn, EdgeKind::Open));
            edges.push(BoundEdge::new(ax.max, pn, EdgeKind::Close));
        }
    }

    edges.sort_unstable();
    edges
}
