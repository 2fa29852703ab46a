mod destination;
mod recorder;

pub use destination::*;
pub use recorder::*;
