/*!
 * tether daemon
 * Bluetooth device naming, listing and pairing with fallback mechanisms
 */

pub mod audit;
pub mod config;
pub mod debounce;
pub mod error;
pub mod identity;
pub mod ipc;
pub mod mechanism;
pub mod names;
pub mod orchestrator;
pub mod reconcile;
pub mod service;

pub use config::DaemonConfig;
pub use identity::DeviceIdentity;
pub use service::DeviceService;
