pub mod archive;
pub mod events;
pub mod layout;
pub mod metrics;
pub mod settings;
pub mod storage;
pub mod store;
pub mod watch;
