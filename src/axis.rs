extern crate glam;

use std::ops::{Index, IndexMut};

use strum::{EnumIter, IntoEnumIterator};

/// 3D Axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    /// Axis along which `extent` is largest
    #[inline]
    pub fn longest(extent: glam::Vec3A) -> Axis {
        Axis::iter()
            .reduce(|best, axis| if extent[axis] > extent[best] { axis } else { best })
            .unwrap()
    }
}

impl Index<Axis> for glam::Vec3A {
    type Output = f32;

    fn index(&self, axis: Axis) -> &Self::Output {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl IndexMut<Axis> for glam::Vec3A {
    fn index_mut(&mut self, axis: Axis) -> &mut Self::Output {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::Axis;

    #[test]
    fn longest_axis() {
        assert_eq!(Axis::longest(Vec3A::new(3.0, 1.0, 2.0)), Axis::X);
        assert_eq!(Axis::longest(Vec3A::new(1.0, 3.0, 2.0)), Axis::Y);
        assert_eq!(Axis::longest(Vec3A::new(1.0, 2.0, 3.0)), Axis::Z);
        // ties resolve to the earlier axis
        assert_eq!(Axis::longest(Vec3A::splat(1.0)), Axis::X);
    }
}
