pub mod analyze;
pub mod architectures;
pub mod results;
pub mod util;
pub mod workspace;

pub use analyze::*;
pub use architectures::*;
pub use results::*;
pub use util::*;
pub use workspace::*;
