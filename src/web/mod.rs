mod handlers;
mod routes;
mod signaling_ws;
mod ws;

pub use routes::create_router;
pub use signaling_ws::signaling_ws_handler;
pub use ws::ws_handler;
