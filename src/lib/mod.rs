pub mod accumulator;
pub mod cli;
pub mod codec;
pub mod logger;
pub mod parser;
pub mod registry;
pub mod server;
pub mod session;
pub mod sink;
