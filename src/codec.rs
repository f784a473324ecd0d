use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3A;
use thiserror::Error;

use crate::{Aabb, MeshTree, Node};

/// Stream tag so stale or foreign cache files fail fast
pub const TREE_MAGIC: [u8; 4] = *b"MTRE";
pub const TREE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad magic, not a serialized tree")]
    BadMagic,
    #[error("unsupported tree format version {0}")]
    UnsupportedVersion(u32),
    #[error("index count {0} is not a multiple of 3")]
    RaggedIndexBuffer(u32),
    #[error("{0} faces but no nodes to reach them")]
    OrphanedFaces(u32),
    #[error("node {node} references child slot {child} outside {node_count} nodes")]
    ChildOutOfRange {
        node: u32,
        child: u32,
        node_count: u32,
    },
    #[error("node {node} references child slot {child} at or behind itself")]
    BackwardChild { node: u32, child: u32 },
    #[error("tree depth {depth} exceeds the traversal limit {limit}")]
    TooDeep { depth: u32, limit: u32 },
    #[error("node {node} claims faces {first}..{end} outside {face_count} faces")]
    FaceRangeOutOfRange {
        node: u32,
        first: u32,
        end: u64,
        face_count: u32,
    },
    #[error("vertex index {index} outside {vertex_count} vertices")]
    VertexOutOfRange { index: u32, vertex_count: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn write_vec3<W: Write>(writer: &mut W, v: Vec3A) -> std::io::Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)?;
    Ok(())
}

fn read_vec3<R: Read>(reader: &mut R) -> std::io::Result<Vec3A> {
    let x = reader.read_f32::<LittleEndian>()?;
    let y = reader.read_f32::<LittleEndian>()?;
    let z = reader.read_f32::<LittleEndian>()?;
    Ok(Vec3A::new(x, y, z))
}

/// Capacity hint cap so a hostile count fails on a short read instead of a
/// giant allocation
fn capacity(count: u32) -> usize {
    count.min(1 << 16) as usize
}

impl MeshTree {
    /// Write the tree in its cache form: nodes, vertices, then the
    /// tree-ordered index buffer, all little-endian, behind a magic/version
    /// tag. Build scratch (face order, per-face bounds) is not written; a
    /// read-back tree is query-ready as-is.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&TREE_MAGIC)?;
        writer.write_u32::<LittleEndian>(TREE_VERSION)?;

        writer.write_u32::<LittleEndian>(self.nodes.len() as u32)?;
        for node in &self.nodes {
            write_vec3(writer, node.aabb.min)?;
            write_vec3(writer, node.aabb.max)?;
            writer.write_u32::<LittleEndian>(node.left_first)?;
            writer.write_u32::<LittleEndian>(node.face_count)?;
        }

        writer.write_u32::<LittleEndian>(self.vertices.len() as u32)?;
        for &vertex in &self.vertices {
            write_vec3(writer, vertex)?;
        }

        writer.write_u32::<LittleEndian>(self.indices.len() as u32)?;
        for &index in &self.indices {
            writer.write_u32::<LittleEndian>(index)?;
        }

        Ok(())
    }

    /// Read a tree written by [`write_to`](MeshTree::write_to). Malformed
    /// streams are a [`CodecError`], never a partial tree: truncation
    /// surfaces as I/O errors and every node child slot, face range and
    /// vertex index is checked before the tree is handed out.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<MeshTree, CodecError> {
        let mut magic = [0_u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != TREE_MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != TREE_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let node_count = reader.read_u32::<LittleEndian>()?;
        let mut nodes = Vec::with_capacity(capacity(node_count));
        for _ in 0..node_count {
            let min = read_vec3(reader)?;
            let max = read_vec3(reader)?;
            let left_first = reader.read_u32::<LittleEndian>()?;
            let face_count = reader.read_u32::<LittleEndian>()?;
            nodes.push(Node {
                aabb: Aabb::new(min, max),
                left_first,
                face_count,
            });
        }

        let vertex_count = reader.read_u32::<LittleEndian>()?;
        let mut vertices = Vec::with_capacity(capacity(vertex_count));
        for _ in 0..vertex_count {
            vertices.push(read_vec3(reader)?);
        }

        let index_count = reader.read_u32::<LittleEndian>()?;
        if index_count % 3 != 0 {
            return Err(CodecError::RaggedIndexBuffer(index_count));
        }
        let mut indices = Vec::with_capacity(capacity(index_count));
        for _ in 0..index_count {
            let index = reader.read_u32::<LittleEndian>()?;
            if index >= vertex_count {
                return Err(CodecError::VertexOutOfRange {
                    index,
                    vertex_count,
                });
            }
            indices.push(index);
        }

        let face_count = index_count / 3;
        if node_count == 0 && face_count > 0 {
            return Err(CodecError::OrphanedFaces(face_count));
        }

        for (slot, node) in nodes.iter().enumerate() {
            if node.is_leaf() {
                let end = node.left_first as u64 + node.face_count as u64;
                if end > face_count as u64 {
                    return Err(CodecError::FaceRangeOutOfRange {
                        node: slot as u32,
                        first: node.left_first,
                        end,
                        face_count,
                    });
                }
            } else if node.left_first as u64 + 1 >= node_count as u64 {
                return Err(CodecError::ChildOutOfRange {
                    node: slot as u32,
                    child: node.left_first,
                    node_count,
                });
            } else if node.left_first as usize <= slot {
                // the builder always allocates children after their parent,
                // anything else is a cycle or shares slots between subtrees
                return Err(CodecError::BackwardChild {
                    node: slot as u32,
                    child: node.left_first,
                });
            }
        }

        // children only point forward, so one pass finds every node's depth
        // from the root; deeper paths than the traversal stack are hostile
        let limit = MeshTree::MAX_STACK_SIZE as u32;
        let mut depth = vec![0_u32; nodes.len()];
        for slot in 0..nodes.len() {
            if depth[slot] >= limit {
                return Err(CodecError::TooDeep {
                    depth: depth[slot],
                    limit,
                });
            }
            let node = &nodes[slot];
            if !node.is_leaf() {
                let child = node.left_first as usize;
                depth[child] = depth[child].max(depth[slot] + 1);
                depth[child + 1] = depth[child + 1].max(depth[slot] + 1);
            }
        }

        log::debug!(
            "read tree: {} faces, {} nodes, {} vertices",
            face_count,
            node_count,
            vertex_count
        );

        Ok(MeshTree::from_parts(nodes, vertices, indices))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)
            .expect("writing to a byte vector cannot fail");
        bytes
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<MeshTree, CodecError> {
        Self::read_from(&mut bytes)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use byteorder::{LittleEndian, WriteBytesExt};
    use glam::Vec3A;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use crate::{CodecError, MeshTree, Ray, RayFlags, TREE_MAGIC};

    fn random_tree(seed: u64, face_count: usize) -> MeshTree {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for _ in 0..face_count {
            let anchor = rng.gen::<Vec3A>() * 10.0 - Vec3A::splat(5.0);
            for _ in 0..3 {
                indices.push(vertices.len() as u32);
                vertices.push(anchor + rng.gen::<Vec3A>() * 2.0 - Vec3A::ONE);
            }
        }
        MeshTree::build(vertices, indices)
    }

    #[test]
    fn round_trip_is_exact() {
        let tree = random_tree(3, 256);
        let decoded = MeshTree::from_bytes(&tree.to_bytes()).unwrap();

        assert_eq!(decoded.nodes(), tree.nodes());
        assert_eq!(decoded.vertices(), tree.vertices());
        assert_eq!(decoded.indices(), tree.indices());
    }

    #[test]
    fn decoded_tree_is_query_ready() {
        let tree = random_tree(5, 256);
        let decoded = MeshTree::from_bytes(&tree.to_bytes()).unwrap();

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..50 {
            let origin = rng.gen::<Vec3A>() * 16.0 - Vec3A::splat(8.0);
            let direction = (rng.gen::<Vec3A>() * 2.0 - Vec3A::ONE).normalize_or_zero();
            if direction == Vec3A::ZERO {
                continue;
            }
            let ray = Ray::infinite_ray(origin, direction);

            let original = tree.intersect_ray(&ray, RayFlags::default());
            let reloaded = decoded.intersect_ray(&ray, RayFlags::default());
            assert_eq!(original.is_some(), reloaded.is_some());
            if let (Some(original), Some(reloaded)) = (original, reloaded) {
                assert_abs_diff_eq!(original.distance, reloaded.distance, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn empty_tree_round_trips() {
        let tree = MeshTree::build(Vec::new(), Vec::new());
        let decoded = MeshTree::from_bytes(&tree.to_bytes()).unwrap();
        assert_eq!(decoded.nodes().len(), 0);
        assert!(!decoded.bounds().is_valid());
    }

    #[test]
    fn truncation_is_rejected_everywhere() {
        let bytes = tree_bytes();
        for len in 0..bytes.len() {
            assert!(
                MeshTree::from_bytes(&bytes[..len]).is_err(),
                "prefix of {len} bytes decoded"
            );
        }
    }

    fn tree_bytes() -> Vec<u8> {
        random_tree(8, 16).to_bytes()
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = tree_bytes();
        bytes[0] ^= 0xff;
        assert!(matches!(
            MeshTree::from_bytes(&bytes),
            Err(CodecError::BadMagic)
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut bytes = tree_bytes();
        bytes[4..8].copy_from_slice(&9_u32.to_le_bytes());
        assert!(matches!(
            MeshTree::from_bytes(&bytes),
            Err(CodecError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn hostile_counts_are_rejected() {
        // claims four billion nodes, then ends
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&TREE_MAGIC);
        bytes.write_u32::<LittleEndian>(crate::TREE_VERSION).unwrap();
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
        assert!(matches!(
            MeshTree::from_bytes(&bytes),
            Err(CodecError::Io(_))
        ));
    }

    #[test]
    fn out_of_range_vertex_index_is_rejected() {
        let tree = random_tree(13, 8);
        let vertex_count = tree.vertices().len() as u32;
        let mut bytes = tree.to_bytes();
        let end = bytes.len();
        // last u32 of the stream is the final vertex index
        bytes[end - 4..].copy_from_slice(&vertex_count.to_le_bytes());
        assert!(matches!(
            MeshTree::from_bytes(&bytes),
            Err(CodecError::VertexOutOfRange { .. })
        ));
    }

    #[test]
    fn leaf_face_range_is_checked() {
        // single leaf claiming two faces, but only one face present
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&TREE_MAGIC);
        bytes.write_u32::<LittleEndian>(crate::TREE_VERSION).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        for _ in 0..6 {
            bytes.write_f32::<LittleEndian>(0.0).unwrap();
        }
        bytes.write_u32::<LittleEndian>(0).unwrap(); // first face
        bytes.write_u32::<LittleEndian>(2).unwrap(); // face count
        bytes.write_u32::<LittleEndian>(3).unwrap(); // vertices
        for _ in 0..9 {
            bytes.write_f32::<LittleEndian>(0.0).unwrap();
        }
        bytes.write_u32::<LittleEndian>(3).unwrap(); // indices
        for index in 0..3 {
            bytes.write_u32::<LittleEndian>(index).unwrap();
        }
        assert!(matches!(
            MeshTree::from_bytes(&bytes),
            Err(CodecError::FaceRangeOutOfRange { .. })
        ));
    }

    #[test]
    fn internal_child_slot_is_checked() {
        // single internal node pointing past the node array, no faces
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&TREE_MAGIC);
        bytes.write_u32::<LittleEndian>(crate::TREE_VERSION).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        for _ in 0..6 {
            bytes.write_f32::<LittleEndian>(0.0).unwrap();
        }
        bytes.write_u32::<LittleEndian>(5).unwrap(); // first child
        bytes.write_u32::<LittleEndian>(0).unwrap(); // internal
        bytes.write_u32::<LittleEndian>(0).unwrap(); // vertices
        bytes.write_u32::<LittleEndian>(0).unwrap(); // indices
        assert!(matches!(
            MeshTree::from_bytes(&bytes),
            Err(CodecError::ChildOutOfRange { .. })
        ));
    }

    #[test]
    fn backward_child_slot_is_rejected() {
        // node 0 internal with itself as first child, a one-node cycle
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&TREE_MAGIC);
        bytes.write_u32::<LittleEndian>(crate::TREE_VERSION).unwrap();
        bytes.write_u32::<LittleEndian>(2).unwrap();
        for _ in 0..6 {
            bytes.write_f32::<LittleEndian>(0.0).unwrap();
        }
        bytes.write_u32::<LittleEndian>(0).unwrap(); // first child = itself
        bytes.write_u32::<LittleEndian>(0).unwrap(); // internal
        for _ in 0..6 {
            bytes.write_f32::<LittleEndian>(0.0).unwrap();
        }
        bytes.write_u32::<LittleEndian>(0).unwrap(); // leaf, first face
        bytes.write_u32::<LittleEndian>(1).unwrap(); // one face
        bytes.write_u32::<LittleEndian>(3).unwrap(); // vertices
        for _ in 0..9 {
            bytes.write_f32::<LittleEndian>(0.0).unwrap();
        }
        bytes.write_u32::<LittleEndian>(3).unwrap(); // indices
        for index in 0..3 {
            bytes.write_u32::<LittleEndian>(index).unwrap();
        }
        assert!(matches!(
            MeshTree::from_bytes(&bytes),
            Err(CodecError::BackwardChild { node: 0, child: 0 })
        ));
    }

    #[test]
    fn chain_deeper_than_stack_is_rejected() {
        // 200 nodes forming a forward chain of internals, one leaf per level:
        // structurally consistent slot by slot, but 100 levels deep
        let node_count = 200_u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&TREE_MAGIC);
        bytes.write_u32::<LittleEndian>(crate::TREE_VERSION).unwrap();
        bytes.write_u32::<LittleEndian>(node_count).unwrap();
        for slot in 0..node_count {
            for _ in 0..6 {
                bytes.write_f32::<LittleEndian>(0.0).unwrap();
            }
            if slot % 2 == 0 && slot < node_count - 2 {
                bytes.write_u32::<LittleEndian>(slot + 1).unwrap();
                bytes.write_u32::<LittleEndian>(0).unwrap(); // internal
            } else {
                bytes.write_u32::<LittleEndian>(0).unwrap();
                bytes.write_u32::<LittleEndian>(1).unwrap(); // leaf, face 0
            }
        }
        bytes.write_u32::<LittleEndian>(3).unwrap(); // vertices
        for _ in 0..9 {
            bytes.write_f32::<LittleEndian>(0.0).unwrap();
        }
        bytes.write_u32::<LittleEndian>(3).unwrap(); // indices
        for index in 0..3 {
            bytes.write_u32::<LittleEndian>(index).unwrap();
        }
        assert!(matches!(
            MeshTree::from_bytes(&bytes),
            Err(CodecError::TooDeep { .. })
        ));
    }

    #[test]
    fn ragged_index_buffer_is_rejected() {
        let tree = random_tree(21, 4);
        let bytes = tree.to_bytes();
        // rewrite the index count to something that is not a triple
        let index_count = tree.indices().len() as u32;
        let count_pos = bytes.len() - 4 * index_count as usize - 4;
        let mut bytes = bytes;
        bytes[count_pos..count_pos + 4].copy_from_slice(&(index_count - 1).to_le_bytes());
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            MeshTree::from_bytes(&bytes),
            Err(CodecError::RaggedIndexBuffer(_))
        ));
    }
}
