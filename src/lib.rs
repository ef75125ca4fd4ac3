pub mod aggregate;
pub mod config;
pub mod deflate;
pub mod panel;
pub mod period;
pub mod record;
pub mod rules;
pub mod store;
pub mod variation;
pub mod wave;
