pub mod tsv;

pub use tsv::*;
