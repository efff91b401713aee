mod memory_job_store;
mod pg_job_store;

pub use memory_job_store::MemoryJobStore;
pub use pg_job_store::PgJobStore;
