pub mod garments;
pub mod generation;
pub mod job_store;
pub mod pipeline;
pub mod rate_limiter;
pub mod retry;
pub mod transport;
pub mod tryon_engine;
