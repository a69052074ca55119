pub mod geometry;
pub mod screenshot;
pub mod som_grid;
