//! Infrastructure adapters: telemetry bootstrap, bundled assets, the HTTP
//! fetch proxy, and in-memory host implementations.

pub mod assets;
pub mod memory;
pub mod proxy;
pub mod telemetry;
