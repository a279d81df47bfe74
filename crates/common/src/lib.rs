// coedit-common: wire protocol and shared types for the coedit relay

pub mod protocol;
pub mod types;
