pub mod codec;
pub mod pool;
pub mod session;

pub use pool::{PoolError, Worker, WorkerId, WorkerPool};
pub use session::{FastcgiError, FastcgiSession, SessionPhase};
