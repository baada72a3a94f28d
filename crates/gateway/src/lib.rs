//! Transport to the push gateway: TLS connections bound to a client
//! certificate, and the binary error channel the gateway answers on.

pub mod certificate;
pub mod connection;
pub mod error;
pub mod error_tuple;

pub use certificate::Certificate;
pub use connection::{Connector, GatewayConnection, GatewayConnector, TlsGatewayConnection};
pub use error::GatewayError;
pub use error_tuple::{ERROR_TUPLE_BYTES, ErrorTuple, describe_status};
