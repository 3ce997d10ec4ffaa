mod app;
mod metrics;
mod store;

// for main.rs
pub use app::run;

pub use store::LevelDbStore;
