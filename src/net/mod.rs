//! Transport layer: the I/O loop, TLS adapter, protocol probe, and the
//! per-connection plumbing that ties them together.

pub mod connection;
pub mod io_loop;
pub mod probe;
pub mod tls;

pub use connection::{Connection, ConnectionOwner, EnqueueOutcome, SendError};
pub use io_loop::{IoLoop, PollOutcome, ReadyEvent, Token};
pub use probe::{
    classify, http_not_implemented, http_redirect, nmdc_redirect_banner, tls_require_redirect, ProbeVerdict,
    PROBE_PEEK_SIZE,
};
pub use tls::{TlsAdapter, TlsError, TlsState};
