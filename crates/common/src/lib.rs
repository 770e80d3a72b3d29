// commune-common: shared types and the wire protocol for the Commune workspace

pub mod protocol;
pub mod types;
