use glam::Vec3A;

use crate::Ray;

/// Epsilon used for ray intersections
pub const RAY_INTERSECT_EPSILON: f32 = 0.0001;

/// Intersect a triangle with a ray (Moller-Trumbore). Returns the hit
/// parameter along the ray, or `None` when the ray is parallel to the
/// triangle, hits outside the edges, behind the origin, or past
/// `ray.distance`. With `ignore_backface` the triangle only counts when its
/// winding faces the ray. Threshold cases resolve to `None`.
pub fn ray_triangle_intersect(
    ray: &Ray,
    v0: Vec3A,
    v1: Vec3A,
    v2: Vec3A,
    ignore_backface: bool,
) -> Option<f32> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = ray.direction.cross(edge2);
    let det = edge1.dot(h);

    if ignore_backface {
        if det < RAY_INTERSECT_EPSILON {
            // parallel or facing away
            return None;
        }
    } else if det > -RAY_INTERSECT_EPSILON && det < RAY_INTERSECT_EPSILON {
        // ray parallel to triangle
        return None;
    }

    let f = 1.0 / det;
    let s = ray.origin - v0;
    let u = f * s.dot(h);
    if u < 0.0 || u > 1.0 {
        return None;
    }
    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = f * edge2.dot(q);
    if t > RAY_INTERSECT_EPSILON && t <= ray.distance {
        Some(t)
    } else {
        None
    }
}
