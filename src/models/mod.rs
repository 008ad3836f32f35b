pub mod outcome;
pub mod payload;
pub mod proxy;

pub use outcome::*;
pub use payload::*;
pub use proxy::*;
