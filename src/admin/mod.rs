/// Gateway admin API access - Gateway
mod client;
mod types;

pub use client::{AdminApi, AdminClient};
pub use types::{Consumer, GatewayRoute, Upstream, UpstreamTls};
