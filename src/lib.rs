// Buy Monitor
// Watches Uniswap V2 pairs of a set of ERC-20 tokens for buys, flags
// pump-and-dump / accumulation patterns and fans alerts out to chat groups

pub mod admin;
pub mod chain;
pub mod classifier;
pub mod config;
pub mod db;
pub mod dedup;
pub mod dispatch;
pub mod parser;
pub mod patterns;
pub mod providers;
pub mod registry;
pub mod scanner;
pub mod types;

pub use db::Database;
