pub mod ai;
pub mod app;
pub mod backend;
pub mod config;
pub mod encryption;
pub mod keys;
pub mod retry;
pub mod session;
pub mod storage;
pub mod sync;
