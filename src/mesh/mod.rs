mod client;
pub mod entries;
mod http_client;
#[cfg(test)]
pub mod memory;

pub use client::{MeshClient, MeshError, WatchResult};
pub use http_client::HttpMeshClient;
