use glam::{Mat4, Vec3A};

use crate::Ray;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3A,
    pub max: Vec3A,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Vec3A::splat(f32::INFINITY),
            max: Vec3A::splat(-f32::INFINITY),
        }
    }
}

impl Aabb {
    #[inline]
    pub fn new(min: Vec3A, max: Vec3A) -> Self {
        Self { min, max }
    }

    /// Grow the box to contain a new point
    #[inline]
    pub fn grow(&mut self, point: Vec3A) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grow the box to contain another box
    #[inline]
    pub fn grow_aabb(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// If the box is valid (min <= max)
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    #[inline]
    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    /// Full edge lengths (max - min)
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Half edge lengths
    #[inline]
    pub fn extents(&self) -> Vec3A {
        self.size() * 0.5
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        let s = self.size();
        s.x * s.y * s.z
    }

    #[inline]
    pub fn surface_area(&self) -> f32 {
        let s = self.size();
        2.0 * (s.x * s.y + s.y * s.z + s.z * s.x)
    }

    /// Axis-aligned enclosure of the 8 transformed corners. Conservative,
    /// not a tight re-fit of the contained geometry.
    pub fn transform(&self, matrix: &Mat4) -> Aabb {
        let mut out = Aabb::default();
        for i in 0..8 {
            let corner = Vec3A::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.grow(matrix.transform_point3a(corner));
        }
        out
    }

    /// Slab test. Returns the entry parameter along the ray, or infinity on
    /// a miss. Boxes behind the origin or past `ray.distance` count as
    /// misses, so a shrinking ray distance prunes during traversal.
    #[inline]
    pub fn ray_intersect(&self, ray: &Ray) -> f32 {
        let t1 = (self.min - ray.origin) * ray.inv_direction;
        let t2 = (self.max - ray.origin) * ray.inv_direction;
        let t_min = t1.min(t2).max_element();
        let t_max = t1.max(t2).min_element();
        if t_max >= t_min && t_min < ray.distance && t_max > 0.0 {
            t_min
        } else {
            f32::INFINITY
        }
    }
}
