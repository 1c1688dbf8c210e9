pub mod couchdb;
