#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod account;
pub use account::Account;

pub mod constants;

mod errors;
pub use errors::{StateError, StateResult};

mod stage;
pub use stage::Stage;

mod state;
pub use state::State;
