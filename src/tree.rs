use glam::Vec3A;

use crate::{ray_triangle_intersect, Aabb, Axis, Ray, RayFlags};

/// One slot of the flattened tree. The same `left_first` storage holds the
/// first child slot (internal) or the first face slot (leaf); `face_count`
/// is the sole discriminant, zero meaning internal.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Node {
    pub aabb: Aabb,
    pub(crate) left_first: u32,
    pub face_count: u32,
}

impl Node {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.face_count > 0
    }

    #[inline]
    pub fn left_child(&self) -> u32 {
        debug_assert!(!self.is_leaf());
        self.left_first
    }

    #[inline]
    pub fn right_child(&self) -> u32 {
        self.left_child() + 1
    }

    #[inline]
    pub fn first_face(&self) -> u32 {
        debug_assert!(self.is_leaf());
        self.left_first
    }

    #[inline]
    fn setup_faces(&mut self, first_face: u32, face_count: u32) {
        self.left_first = first_face;
        self.face_count = face_count;
    }

    #[inline]
    fn setup_children(&mut self, left_child: u32) {
        self.left_first = left_child;
        self.face_count = 0;
    }
}

/// Result of a ray query. `face` is the face's position in the buffers the
/// tree was built from, stable across the reordering done during the build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub face: u32,
    pub distance: f32,
}

/// Bounding-volume hierarchy over a triangle soup. Owns its vertex and
/// index buffers; immutable once built, safe to query from many threads.
#[derive(Debug, Clone, Default)]
pub struct MeshTree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) vertices: Vec<Vec3A>,
    pub(crate) indices: Vec<u32>,
    pub(crate) face_order: Vec<u32>,
}

/// Per-face build scratch, dropped once the node array is final
struct FaceBounds {
    aabb: Vec<Aabb>,
    centroid: Vec<Vec3A>,
}

impl FaceBounds {
    fn compute(vertices: &[Vec3A], indices: &[u32]) -> Self {
        let face_count = indices.len() / 3;
        let mut aabb = Vec::with_capacity(face_count);
        let mut centroid = Vec::with_capacity(face_count);
        for face in indices.chunks_exact(3) {
            let v0 = vertices[face[0] as usize];
            let v1 = vertices[face[1] as usize];
            let v2 = vertices[face[2] as usize];
            let mut bounds = Aabb::default();
            bounds.grow(v0);
            bounds.grow(v1);
            bounds.grow(v2);
            aabb.push(bounds);
            centroid.push((v0 + v1 + v2) / 3.0);
        }
        Self { aabb, centroid }
    }
}

impl MeshTree {
    /// Leaves hold at most this many faces
    const LEAF_FACES: usize = 4;

    /// Max traversal stack size (enough for any tree this crate can address)
    pub(crate) const MAX_STACK_SIZE: usize = 64;

    /// Ranges this deep become leaves whatever their face count, keeping
    /// every root-to-leaf path within the traversal stack
    const MAX_DEPTH: usize = 60;

    /// Build a tree over `indices.len() / 3` triangles. `indices` must hold
    /// whole index triples and every index must address `vertices`.
    pub fn build(vertices: Vec<Vec3A>, indices: Vec<u32>) -> Self {
        assert!(
            indices.len() % 3 == 0,
            "index buffer must hold whole triangles"
        );

        let face_count = indices.len() / 3;
        let mut face_order: Vec<u32> = (0..face_count as u32).collect();

        if face_count == 0 {
            return Self {
                nodes: Vec::new(),
                vertices,
                indices,
                face_order,
            };
        }

        let scratch = FaceBounds::compute(&vertices, &indices);

        let mut nodes = Vec::with_capacity(2 * face_count);
        nodes.push(Node::default());
        Self::subdivide(&mut nodes, 0, &mut face_order, 0, face_count, 0, &scratch);

        // make each leaf's faces contiguous in the persisted index buffer
        let mut ordered = Vec::with_capacity(indices.len());
        for &face in &face_order {
            let i = face as usize * 3;
            ordered.extend_from_slice(&indices[i..i + 3]);
        }

        log::debug!(
            "built tree: {} faces, {} nodes",
            face_count,
            nodes.len()
        );

        Self {
            nodes,
            vertices,
            indices: ordered,
            face_order,
        }
    }

    fn subdivide(
        nodes: &mut Vec<Node>,
        slot: usize,
        face_order: &mut [u32],
        first: usize,
        count: usize,
        depth: usize,
        scratch: &FaceBounds,
    ) {
        let mut bounds = Aabb::default();
        for &face in &face_order[first..first + count] {
            bounds.grow_aabb(&scratch.aabb[face as usize]);
        }
        nodes[slot].aabb = bounds;

        if count <= Self::LEAF_FACES || depth >= Self::MAX_DEPTH {
            nodes[slot].setup_faces(first as u32, count as u32);
            return;
        }

        let axis = Axis::longest(bounds.size());
        face_order[first..first + count]
            .sort_unstable_by(|&a, &b| {
                scratch.centroid[a as usize][axis].total_cmp(&scratch.centroid[b as usize][axis])
            });

        let split = Self::find_split(&face_order[first..first + count], axis, scratch)
            // all face centres share one plane on this axis, split at the
            // midpoint so both halves strictly shrink
            .unwrap_or(count / 2);

        let left_child = nodes.len();
        nodes.push(Node::default());
        nodes.push(Node::default());
        nodes[slot].setup_children(left_child as u32);

        Self::subdivide(nodes, left_child, face_order, first, split, depth + 1, scratch);
        Self::subdivide(
            nodes,
            left_child + 1,
            face_order,
            first + split,
            count - split,
            depth + 1,
            scratch,
        );
    }

    /// Sweep the candidate split planes of a centre-sorted face range and
    /// pick the one minimising `left_count * left_area + right_count *
    /// right_area`. Returns `None` when no plane separates the centres.
    fn find_split(faces: &[u32], axis: Axis, scratch: &FaceBounds) -> Option<usize> {
        let count = faces.len();

        // suffix areas, right_area[i] covers faces i..count
        let mut right_area = vec![0.0_f32; count];
        let mut right_box = Aabb::default();
        for i in (1..count).rev() {
            right_box.grow_aabb(&scratch.aabb[faces[i] as usize]);
            right_area[i] = right_box.surface_area();
        }

        let mut best: Option<(f32, usize)> = None;
        let mut left_box = Aabb::default();
        for i in 1..count {
            left_box.grow_aabb(&scratch.aabb[faces[i - 1] as usize]);

            // only planes where the sorted centres actually advance separate
            // the two halves
            let prev = scratch.centroid[faces[i - 1] as usize][axis];
            let here = scratch.centroid[faces[i] as usize][axis];
            if prev >= here {
                continue;
            }

            let cost = i as f32 * left_box.surface_area()
                + (count - i) as f32 * right_area[i];
            // overflowed areas give infinite costs, which rank no better
            // than not splitting at all
            if !cost.is_finite() {
                continue;
            }
            if best.map_or(true, |(best_cost, _)| cost < best_cost) {
                best = Some((cost, i));
            }
        }

        best.map(|(_, split)| split)
    }

    /// Closest (or with [`RayFlags::EARLY_EXIT`], first) triangle
    /// intersection along `ray`. Without early exit the result is the
    /// globally nearest hit no matter how the tree is shaped.
    pub fn intersect_ray(&self, ray: &Ray, flags: RayFlags) -> Option<RayHit> {
        if self.nodes.is_empty() {
            return None;
        }

        let early_exit = flags.contains(RayFlags::EARLY_EXIT);
        let ignore_backface = flags.contains(RayFlags::IGNORE_BACKFACE);

        // working copy: its distance shrinks to the best hit so far, which
        // lets the slab test prune boxes that start past it
        let mut ray = *ray;
        let mut best: Option<RayHit> = None;

        let mut node = &self.nodes[0];
        if node.aabb.ray_intersect(&ray).is_infinite() {
            return None;
        }

        let mut stack: [Option<&Node>; Self::MAX_STACK_SIZE] =
            [None; Self::MAX_STACK_SIZE];
        let mut stack_ptr = 0_usize;

        loop {
            if node.is_leaf() {
                for slot in node.first_face()..node.first_face() + node.face_count {
                    let i = slot as usize * 3;
                    let v0 = self.vertices[self.indices[i] as usize];
                    let v1 = self.vertices[self.indices[i + 1] as usize];
                    let v2 = self.vertices[self.indices[i + 2] as usize];
                    if let Some(t) = ray_triangle_intersect(&ray, v0, v1, v2, ignore_backface) {
                        ray.distance = t;
                        best = Some(RayHit {
                            face: self.face_order[slot as usize],
                            distance: t,
                        });
                        if early_exit {
                            return best;
                        }
                    }
                }
            } else {
                let child1 = &self.nodes[node.left_child() as usize];
                let child2 = &self.nodes[node.right_child() as usize];

                let mut dist1 = child1.aabb.ray_intersect(&ray);
                let mut dist2 = child2.aabb.ray_intersect(&ray);

                let mut child1 = child1;
                let mut child2 = child2;

                if dist1 > dist2 {
                    (dist1, dist2) = (dist2, dist1);
                    (child1, child2) = (child2, child1);
                }

                if dist1.is_finite() {
                    node = child1;
                    if dist2.is_finite() {
                        stack[stack_ptr] = Some(child2);
                        stack_ptr += 1;
                    }
                    continue;
                }
            }

            if stack_ptr == 0 {
                break;
            }
            stack_ptr -= 1;
            node = stack[stack_ptr].take().unwrap();
        }

        best
    }

    /// Root bounds. Invalid (inverted) when the tree holds no faces
    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map_or_else(Aabb::default, |node| node.aabb)
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec3A] {
        &self.vertices
    }

    /// Index buffer in tree order (leaf faces contiguous)
    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Maps a face's tree-order slot back to its build-time position
    #[inline]
    pub fn face_order(&self) -> &[u32] {
        &self.face_order
    }

    pub(crate) fn from_parts(nodes: Vec<Node>, vertices: Vec<Vec3A>, indices: Vec<u32>) -> Self {
        let face_order = (0..indices.len() as u32 / 3).collect();
        Self {
            nodes,
            vertices,
            indices,
            face_order,
        }
    }
}
