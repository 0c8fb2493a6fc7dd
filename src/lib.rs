pub mod utils;
pub mod gpu;
pub mod render;

pub use gpu::*;
pub use utils::handle::{Handle, Pool};
