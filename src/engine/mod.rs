pub mod docker;
pub mod traits;
