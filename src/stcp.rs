pub mod client;
pub mod defs;
pub mod link;
pub mod segment;
pub mod send_buffer;
pub mod server;
