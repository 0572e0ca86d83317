pub mod dispatch;
mod error;
pub mod factory;
pub mod net;
pub mod options;
pub mod sync;
pub mod task;
pub mod timer;
pub mod tls;

pub use error::TransportError;

#[cfg(any(test, feature = "fixture"))]
pub use xconnect_derive::test_async;

#[cfg(any(test, feature = "fixture"))]
pub use xconnect_derive::test;

#[cfg(feature = "subscriber")]
pub mod subscriber {
    use tracing_subscriber::EnvFilter;

    pub fn init_logger() {
        init_tracer(None);
    }

    pub fn init_tracer(level: Option<tracing::Level>) {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level.unwrap_or(tracing::Level::DEBUG))
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }
}

/// re-export tracing
pub mod tracing {

    pub use ::tracing::*;
}
