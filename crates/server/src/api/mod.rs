pub mod error;
pub mod fate;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use error::ErrorResponse;
pub use routes::create_router;
