mod client;
mod engine;

pub use client::DockerClient;
pub use engine::{ContainerEngine, DockerEngine, EngineConfig};
