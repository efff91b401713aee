mod chunk_coordinator;
mod job_coordinator;
mod pipeline_executor;
mod worker_registry;

pub use chunk_coordinator::{ChunkCoordinator, ChunkError};
pub use job_coordinator::{
    CoordinatorError, JobCoordinator, JobUpdate, JobView, ORPHAN_ERROR, VolatileJobState,
    VolatileUpdate,
};
pub use pipeline_executor::PipelineExecutor;
pub use worker_registry::{WorkerRegistry, kill_worker, terminate_worker};
