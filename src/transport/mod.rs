mod http_transport;
mod xinghuo;

pub use http_transport::{sanitize_upstream_error, HttpTransport, UPSTREAM_ERROR_MAX_BYTES};
pub use xinghuo::{UpstreamSession, XinghuoClient};
