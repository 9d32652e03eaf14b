pub mod abi;
pub mod audio;
pub mod backend;
pub mod callbacks;
pub mod core_host;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod input;
pub mod runtime;
pub mod save;
pub mod throttle;
pub mod vfs;

pub use core_host::{CoreApi, CoreHost, SymbolSource, SystemInfo};
pub use error::{LoadError, RuntimeError, StoreError};
pub use runtime::{Backends, DriverRuntime, DriverState, RuntimeConfig, ShutdownHandle};
