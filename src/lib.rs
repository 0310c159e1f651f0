pub mod config;
pub mod consumer;
pub mod db;
pub mod entries;
pub mod finalizer;
pub mod jobstore;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod records;
pub mod scheduler;
