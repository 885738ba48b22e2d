pub mod cache;
pub mod groom;
pub mod keygen;
pub mod model;
pub mod routes;
pub mod server;
pub mod state;
pub mod store;
pub mod upload;
