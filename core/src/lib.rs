mod error;
mod field;
mod keyed;
mod sanitize;
mod table;

pub use error::*;
pub use field::*;
pub use keyed::*;
pub use sanitize::*;
pub use table::*;

pub static CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
