pub mod capture;
pub mod setup;
pub mod tasks;
