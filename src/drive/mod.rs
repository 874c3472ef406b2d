// 远程网盘模块

pub mod client;
pub mod service;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use client::DriveClient;
pub use service::{ByteStream, DriveError, RemoteObjectService};
pub use types::*;
