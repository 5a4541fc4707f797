pub mod binaries;
pub mod layouts;
pub mod project;
pub mod signatures;
pub mod util;

pub use binaries::*;
pub use layouts::*;
pub use project::*;
pub use signatures::*;
pub use util::*;
