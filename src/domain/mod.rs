pub mod models;
pub mod reassembly;
pub mod settings;
