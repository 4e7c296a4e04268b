pub mod error;
pub mod identifier;
pub mod value;

pub use error::{Result, RouterError};
pub use identifier::{Identified, Identifier, Role, ShardKey};
pub use value::Value;
