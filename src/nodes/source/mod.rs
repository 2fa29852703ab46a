mod constant;
mod sine;

pub use constant::*;
pub use sine::*;
