pub mod anomaly;
pub mod config;
pub mod db;
pub mod decode;
pub mod errors;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod publish;
pub mod resolve;
pub mod rest;
pub mod storage;
pub mod store;
pub mod transport;
