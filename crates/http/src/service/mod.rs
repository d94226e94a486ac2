//! Connection service state: the per-connection half of the service layer.
//!
//! - [`ConnectionService`]: one per connection, drives the exchange phases
//! - [`ExchangePhase`]: where the current exchange stands
//! - [`ResponsePipeline`]: the fixed chain of response interceptors
//! - [`ReuseStrategy`]: the keep-alive decision
//! - [`ServiceContext`]: what all connection services share

mod config;
mod context;
mod date;
mod phase;
mod pipeline;
mod reuse;
mod state;

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use context::ServiceContext;
pub use date::DateService;
pub use phase::ExchangePhase;
pub use pipeline::{
    ResponseConnControl, ResponseContent, ResponseContext, ResponseDate, ResponseInterceptor, ResponsePipeline, ResponseServer,
};
pub use reuse::{DefaultReuseStrategy, ReuseStrategy};
pub use state::ConnectionService;
