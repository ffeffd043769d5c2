pub mod app;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod model;
pub mod normalize;
pub mod omdb;
pub mod snapshot;
pub mod store;
pub mod tmdb;
