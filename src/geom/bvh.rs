use super::{BBox, Point3, Vec3};

#[derive(Debug, Clone, Copy)]
struct BvhNode {
    bbox: BBox,
    left: u32,
    right: u32,
    start: u32,
    count: u32,
}

impl BvhNode {
    const fn leaf(bbox: BBox, start: u32, count: u32) -> Self {
        Self {
            bbox,
            left: u32::MAX,
            right: u32::MAX,
            start,
            count,
        }
    }

    const fn inner(bbox: BBox, left: u32, right: u32) -> Self {
        Self {
            bbox,
            left,
            right,
            start: 0,
            count: 0,
        }
    }

    const fn is_leaf(self) -> bool {
        self.count != 0
    }
}

/// Limits that stop the recursive median split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhLimits {
    /// A node with at most this many primitives becomes a leaf.
    pub leaf_size: usize,
    /// A node whose longest side is below this extent becomes a leaf.
    pub min_node_extent: f64,
}

impl Default for BvhLimits {
    fn default() -> Self {
        Self {
            leaf_size: 8,
            min_node_extent: 0.0,
        }
    }
}

/// Bounding volume hierarchy over primitive bounding boxes.
///
/// Primitives are referenced by their index in the slice given to [`Bvh::build`]; the tree
/// never owns the primitives themselves.
#[derive(Debug, Clone)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    prim_indices: Vec<u32>,
}

impl Bvh {
    /// Builds a hierarchy by recursive median splits along the widest centroid axis.
    #[must_use]
    pub fn build(bboxes: &[BBox], limits: BvhLimits) -> Option<Self> {
        if bboxes.is_empty() || bboxes.len() > u32::MAX as usize {
            return None;
        }

        let leaf_size = limits.leaf_size.clamp(1, 256);
        let mut bvh = Self {
            nodes: Vec::with_capacity(bboxes.len().saturating_mul(2)),
            prim_indices: (0..bboxes.len() as u32).collect(),
        };
        bvh.build_node(bboxes, 0, bboxes.len(), leaf_size, limits.min_node_extent);
        Some(bvh)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn bounds(&self) -> Option<BBox> {
        self.nodes.first().map(|node| node.bbox)
    }

    fn build_node(
        &mut self,
        bboxes: &[BBox],
        start: usize,
        end: usize,
        leaf_size: usize,
        min_extent: f64,
    ) -> u32 {
        let node_index = self.nodes.len() as u32;
        let bbox = self.range_bbox(bboxes, start, end);
        self.nodes.push(BvhNode::leaf(bbox, start as u32, (end - start) as u32));

        let count = end - start;
        let size = bbox.size();
        let longest = size.x.max(size.y).max(size.z);
        if count <= leaf_size || longest < min_extent {
            return node_index;
        }

        let axis = self.centroid_bounds(bboxes, start, end).widest_axis();
        let mid = start + count / 2;
        self.prim_indices[start..end].select_nth_unstable_by(mid - start, |a, b| {
            let ca = bboxes[*a as usize].center().to_vec3()[axis];
            let cb = bboxes[*b as usize].center().to_vec3()[axis];
            ca.total_cmp(&cb)
        });

        let left = self.build_node(bboxes, start, mid, leaf_size, min_extent);
        let right = self.build_node(bboxes, mid, end, leaf_size, min_extent);
        self.nodes[node_index as usize] = BvhNode::inner(bbox, left, right);
        node_index
    }

    fn range_bbox(&self, bboxes: &[BBox], start: usize, end: usize) -> BBox {
        self.prim_indices[start + 1..end]
            .iter()
            .fold(bboxes[self.prim_indices[start] as usize], |acc, &idx| {
                acc.union(bboxes[idx as usize])
            })
    }

    fn centroid_bounds(&self, bboxes: &[BBox], start: usize, end: usize) -> BBox {
        let first = bboxes[self.prim_indices[start] as usize].center();
        self.prim_indices[start + 1..end]
            .iter()
            .fold(BBox::new(first, first), |acc, &idx| {
                acc.expand_point(bboxes[idx as usize].center())
            })
    }

    /// Finds the primitive with the smallest ray parameter in `[0, t_max]`.
    ///
    /// `hit` returns the ray parameter at which the primitive is crossed (or `None`); once a
    /// hit is found, subtrees beyond it are skipped.
    pub fn closest_ray_hit<F>(
        &self,
        origin: Point3,
        dir: Vec3,
        t_max: f64,
        mut hit: F,
    ) -> Option<(usize, f64)>
    where
        F: FnMut(usize) -> Option<f64>,
    {
        let mut best: Option<(usize, f64)> = None;
        let mut limit = t_max;
        let mut stack = vec![0u32];

        while let Some(node_idx) = stack.pop() {
            let Some(node) = self.nodes.get(node_idx as usize).copied() else {
                continue;
            };
            if !ray_intersects_bbox(origin, dir, node.bbox, 0.0, limit) {
                continue;
            }

            if node.is_leaf() {
                let start = node.start as usize;
                let end = start + node.count as usize;
                for &prim in &self.prim_indices[start..end] {
                    if let Some(t) = hit(prim as usize) {
                        if t >= 0.0 && t <= limit {
                            limit = t;
                            best = Some((prim as usize, t));
                        }
                    }
                }
                continue;
            }

            stack.push(node.left);
            stack.push(node.right);
        }

        best
    }
}

fn ray_intersects_bbox(origin: Point3, dir: Vec3, bbox: BBox, t_min: f64, t_max: f64) -> bool {
    let mut tmin = t_min;
    let mut tmax = t_max;
    let o = origin.to_vec3();
    let lo = bbox.min.to_vec3();
    let hi = bbox.max.to_vec3();

    for axis in 0..3 {
        let (o, d) = (o[axis], dir[axis]);
        if !o.is_finite() || !d.is_finite() {
            return false;
        }

        if d.abs() <= 1e-15 {
            if o < lo[axis] || o > hi[axis] {
                return false;
            }
            continue;
        }

        let inv_d = 1.0 / d;
        let mut t0 = (lo[axis] - o) * inv_d;
        let mut t1 = (hi[axis] - o) * inv_d;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }

        tmin = tmin.max(t0);
        tmax = tmax.min(t1);
        if tmax < tmin {
            return false;
        }
    }

    true
}
