pub mod config;
pub mod defs;
pub mod frame;
pub mod impair;
pub mod sip;
pub mod son;
pub mod stcp;
pub mod topology;
