#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use loco_control_plane_core as core;
pub use loco_control_plane_deploy as deploy;
pub use loco_control_plane_grpc as grpc;
pub use loco_control_plane_k8s_api as k8s;
pub use loco_control_plane_k8s_logs as logs;
pub use loco_control_plane_upstream as upstream;

mod args;
mod log;

pub use self::args::Args;
