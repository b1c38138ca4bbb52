pub mod publisher;
pub mod relay;
