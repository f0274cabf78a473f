pub mod handlers;
pub mod server;

pub use handlers::ApiState;
pub use server::ApiServer;
