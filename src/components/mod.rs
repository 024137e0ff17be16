pub mod aligner;
pub mod backends;
pub mod bounds;
pub mod change;
pub mod ensemble;
pub mod file;
pub mod grid;
pub mod mask;
pub mod transforms;

pub use bounds::PixelBounds;
pub use file::File;
pub use transforms::GridTransform;
