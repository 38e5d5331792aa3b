//! Job model and durable job store.

mod cancel;
pub mod model;
mod store;

pub use cancel::CancellationToken;
pub use model::{
    ExtractOutput, ExtractParams, Job, JobOutput, JobParams, JobStatus, JobType,
    PublishSubtitlesOutput, PublishSubtitlesParams, SearchAttempt, SearchSubtitlesOutput,
    SearchSubtitlesParams, SupToSrtOutput, SupToSrtParams, SyncOptions, SyncSubtitlesOutput,
    SyncSubtitlesParams, TranslateOutput, TranslateParams,
};
pub use store::{JobScan, JobStore, UndecodableJob};
