#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod errors;
pub use errors::{SchedulerError, SchedulerResult};

mod scheduler;
pub use scheduler::{Schedule, BLOCK_INTERVAL};

mod shuffle;
pub use shuffle::shuffle;
