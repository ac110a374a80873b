pub mod instance;
pub mod plan;
pub mod session;
