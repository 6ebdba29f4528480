//! HTTP server: router, shared state and the serve loop

mod router;
#[allow(clippy::module_inception)]
mod server;

pub use router::{AppState, create_router};
pub use server::Server;
