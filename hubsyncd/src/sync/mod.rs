pub mod backoff;
pub mod cleanup;
pub mod engine;
pub mod executor;
pub mod idle;
pub mod ledger;
pub mod local_watcher;
pub mod paths;
pub mod reconcile;
pub mod remote;
pub mod scanner;
pub mod stability;
#[cfg(test)]
pub(crate) mod testing;
pub mod transfer;
