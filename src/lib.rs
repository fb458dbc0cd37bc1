pub mod errors;
pub mod executor;
pub mod global;
pub mod logger;
pub mod metrics;
pub mod oracle;
pub mod rpc;
pub mod session;
pub mod wallets;
