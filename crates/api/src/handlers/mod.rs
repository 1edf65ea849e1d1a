pub mod certificates;
pub mod runs;
pub mod workflows;

pub use super::AppState;
