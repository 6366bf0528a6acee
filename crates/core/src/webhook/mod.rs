pub mod extract;
pub mod normalize;
