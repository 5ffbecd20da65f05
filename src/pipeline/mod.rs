//! Pipeline components: queues, worker pool, receiver, log aggregation, shutdown.

pub mod cancel;
pub mod coordinator;
pub mod logs;
pub mod pool;
pub mod protocol;
pub mod queues;
pub mod receiver;
pub mod shutdown;
pub mod tally;
pub mod wire_path;
pub mod worker;

pub use cancel::CancelToken;
pub use coordinator::{build_skeleton, run};
pub use logs::{CaptureSink, FacadeSink, LogHandle, LogSink, aggregate, spawn_log_aggregator};
pub use pool::{PoolChannels, WorkerPool, WorkerSpec};
pub use protocol::{
    ResultMessage, TaskFrame, WorkerFrame, encode_frame, read_frames, write_frame, write_line,
};
pub use queues::{Queues, create_queues};
pub use receiver::{
    DrainHandle, DrainInputs, Drainer, ProcessDrainer, ThreadDrainer, drainer_for, receive,
    receiver_process_main,
};
pub use shutdown::{JoinReport, join_until, wait_or_kill};
pub use tally::{DrainState, Tally, drain};
pub use worker::{WorkerExit, WorkerStats, run_worker, worker_process_main};
