pub mod axis;
pub use axis::*;

pub mod aabb;
pub use aabb::*;

pub mod ray;
pub use ray::*;

pub mod intersect;
pub use intersect::*;

pub mod tree;
pub use tree::*;

pub mod codec;
pub use codec::*;
