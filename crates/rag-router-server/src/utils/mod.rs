pub mod error;
pub mod runtime;
pub mod similarity;

pub use similarity::cosine_similarity;
