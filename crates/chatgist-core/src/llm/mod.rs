pub mod provider;
pub mod retry;
pub mod rotation;
