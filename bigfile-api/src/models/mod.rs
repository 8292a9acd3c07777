pub mod envelope;
pub mod upload;

pub use envelope::Envelope;
pub use upload::*;
