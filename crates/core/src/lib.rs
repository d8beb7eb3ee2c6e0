pub mod error;
pub mod models;
pub mod series;
pub mod traits;

pub use error::*;
pub use models::*;
pub use series::*;
pub use traits::*;
