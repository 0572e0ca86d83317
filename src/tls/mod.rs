mod context;
mod error;
mod session;

pub use context::{TlsContext, TlsMaterial, TlsRole};
pub use error::TlsError;
pub use session::{DecryptOutcome, StepOutcome, TlsSession};

pub(crate) use context::ContextInner;
pub(crate) use error::classify;
