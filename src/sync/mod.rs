pub mod classify;
pub mod engine;
pub mod extract;
pub mod merge;
pub mod report;

pub use classify::*;
pub use engine::*;
pub use extract::*;
pub use merge::*;
pub use report::*;
