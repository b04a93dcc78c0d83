pub mod deploy;
pub mod package;
pub mod status;
pub mod validate;
