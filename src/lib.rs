pub mod forest;
pub mod geometry;
pub mod logging;
pub mod relocalisation;
pub mod system;
pub mod tracking;
