mod chunk;
mod job;
mod job_id;
mod job_status;
pub mod progress;
mod transcript;

pub use chunk::{ChunkState, ChunkStatus, plan_chunks};
pub use job::{FileMeta, Job, JobConfig, JobResult};
pub use job_id::{JobId, OwnerId};
pub use job_status::JobStatus;
pub use progress::{ProgressSnapshot, percentage};
pub use transcript::{Segment, SpeakerTurn, assign_speakers};
