pub mod capture;
pub mod config;
pub mod credentials;
pub mod lifecycle;
pub mod renewal;
pub mod replay;
pub mod scheduler;
pub mod signer;
pub mod store;
pub mod terminal;
pub mod transport;
