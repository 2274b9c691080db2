pub mod classify;
pub mod parser;
pub mod pipeline;
pub mod resolve;
pub mod symbols;
