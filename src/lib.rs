pub mod api;
pub mod channels;
pub mod clients;
pub mod config;
pub mod domain;
pub mod error;
pub mod models;
pub mod ports;
pub mod service;
pub mod utils;
pub mod worker;
