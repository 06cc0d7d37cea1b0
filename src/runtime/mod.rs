pub mod bus;
pub mod types;


pub use bus::Runtime;
pub use types::*;
