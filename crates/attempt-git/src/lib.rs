pub mod error;
pub mod memory;
pub mod service;
pub mod status;

pub use error::*;
pub use memory::*;
pub use service::*;
pub use status::*;
