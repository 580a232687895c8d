pub mod anthropic;
pub mod transport;

pub use anthropic::{ApiClient, QueryResponse};
pub use transport::{HttpTransport, OutboundRequest, ReqwestTransport, TransportResponse};
