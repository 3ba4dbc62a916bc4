pub mod client;
pub mod poller;

pub use client::{EvmRpcClient, LogSource, RawLog};
pub use poller::{LogPoller, PollBatch};
