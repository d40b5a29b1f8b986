//! Request construction and wire-level plumbing for the commerce API.

pub mod collection;
pub mod fault;
pub mod request;
pub mod transport;

pub use fault::Fault;
pub use request::{BuiltUrl, HttpMethod, QueryParams, RequestBuilder, ResourceRequest};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
