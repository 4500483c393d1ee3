pub mod network;

pub use network::{Network, NetworkBuilder, TransitDataProvider};

pub mod access_egress;

pub use access_egress::AccessEgress;

pub mod pareto;
pub mod multicriteria;
pub mod transfer;

pub mod context;

pub use context::{RaptorRequest, SearchParams, ViaLocation};

pub mod raptor;
pub mod path;

pub use path::RaptorPath;

pub mod direct;
pub mod aggregator;
pub mod timers;
pub mod config;

pub use config::RaptorConfig;

pub mod service;

pub use service::{RaptorError, RaptorResponse, RaptorService};

pub mod utils;
