pub mod backup;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod sync;
pub mod watcher;
