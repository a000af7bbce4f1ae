//! Dispatch service and HTTP bridge for nyft
//!
//! - [`dispatch`]: answers find requests on `drivers.find` (queue group `manager`)
//!   by fanning them out to driver agents and relaying the first offer
//! - [`http`]: `POST /v1/rides` translated into a find request

pub mod dispatch;
pub mod http;

pub use dispatch::{DispatchConfig, DispatchService};
pub use http::BridgeState;
