pub mod config;
pub mod policy;

pub use config::CapstanConfig;
pub use policy::StepPolicy;
