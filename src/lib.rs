pub mod config;
pub mod load;
pub mod schema;
pub mod warehouse;

pub use config::{Args, LoadConfig};
pub use load::{run_load, LoadSummary};
