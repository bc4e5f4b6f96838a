mod replay;
mod server;

pub use replay::{load_bars, read_bars};
pub use server::{parse_client_message, router, serve, AppState};
