pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod routes;
pub mod state;
