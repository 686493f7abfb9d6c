pub mod auth;
pub mod booking;
pub mod config;
pub mod directory;
pub mod identity;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod window;
pub mod wire;
