pub mod archive_index;
pub mod config;
pub mod error;
pub mod request;

pub use archive_index::{ArchiveIndex, ArchiveIndexHandle};
pub use config::{Cli, ClientConfigViaProxyAuth, Config, HttpsInterception, OntoFormat, OntoPrecedence, OntoVersion};
pub use error::ArchivoError;
pub use request::{Method, OwnedRequest, RequestView, UpstreamResponse};
