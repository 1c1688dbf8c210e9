pub mod client_ext;
pub mod fs;

pub use crate::client_ext::couchdb::ClientCouchExt as CouchDb;
pub use crate::fs::read_tickers;
