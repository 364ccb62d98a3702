pub mod annotation;
pub mod app;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod idmapping;
pub mod output;
pub mod pipeline;
pub mod roc;
pub mod store;
pub mod table;
pub mod uniprot;
