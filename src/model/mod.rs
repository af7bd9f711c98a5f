pub mod capability;
pub mod result;
