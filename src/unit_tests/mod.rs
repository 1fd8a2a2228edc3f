pub mod config_compiler;
pub mod engine;
pub mod rollout;
pub mod synthesis;
