pub mod candidate;
pub mod record;

pub use candidate::*;
pub use record::*;
