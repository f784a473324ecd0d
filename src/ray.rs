use std::ops::{BitOr, BitOrAssign};

use glam::Vec3A;

/// Ray object. Might be a proper ray (distance = infinity) or a line segment
/// (distance is finite).
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3A,
    pub direction: Vec3A,
    /// Reciprocal direction, cached for the slab test
    pub inv_direction: Vec3A,
    pub distance: f32,
}

impl Default for Ray {
    fn default() -> Self {
        Self::new(Vec3A::ZERO, Vec3A::X, 1.0)
    }
}

impl Ray {
    #[inline]
    pub fn new(origin: Vec3A, direction: Vec3A, distance: f32) -> Self {
        Self {
            origin,
            direction,
            inv_direction: direction.recip(),
            distance,
        }
    }

    /// Create a ray with infinite length (a proper ray)
    #[inline]
    pub fn infinite_ray(origin: Vec3A, direction: Vec3A) -> Self {
        Self::new(origin, direction, f32::INFINITY)
    }

    /// Ray from `origin` towards `destination`, clipped at the destination.
    /// A zero-length segment stays finite (unit direction, zero distance)
    /// and can never report a hit.
    #[inline]
    pub fn towards(origin: Vec3A, destination: Vec3A) -> Self {
        let delta = destination - origin;
        let distance = delta.length();
        if distance > 0.0 {
            Self::new(origin, delta / distance, distance)
        } else {
            Self::new(origin, Vec3A::X, 0.0)
        }
    }
}

/// Query flags, independently combinable with `|`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayFlags(u8);

impl RayFlags {
    /// Return the first accepted hit instead of the closest one
    pub const EARLY_EXIT: RayFlags = RayFlags(1);
    /// Skip triangles whose winding faces away from the ray
    pub const IGNORE_BACKFACE: RayFlags = RayFlags(1 << 1);

    #[inline]
    pub fn contains(self, other: RayFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RayFlags {
    type Output = RayFlags;

    #[inline]
    fn bitor(self, rhs: RayFlags) -> RayFlags {
        RayFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for RayFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: RayFlags) {
        self.0 |= rhs.0;
    }
}
