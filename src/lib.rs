pub mod adapter;
pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod routing;
pub mod server;
pub mod stream;
pub mod translate;
pub mod transport;

mod util;

pub use config::{ConfigSource, ResolvedConfig, StaticConfigSource, YamlConfigSource};
pub use error::GatewayError;
pub use gateway::{CallOptions, Gateway, GatewayOutcome};
pub use util::normalize_endpoint;
