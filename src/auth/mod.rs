pub mod pipeline;
pub mod worlds;

pub use pipeline::{AuthPipeline, Credentials, Endpoints, GameEntry};
