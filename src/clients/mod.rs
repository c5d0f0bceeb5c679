pub mod classifier;
pub mod notifier;

pub use classifier::*;
pub use notifier::*;
