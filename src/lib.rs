//! `mediamove` - transactional rename/relocate engine for media libraries.
//!
//! The core is three pieces: [`validate::Validator`] pre-flights each
//! planned operation, [`transaction::TransactionManager`] records a batch of
//! operations durably as it is applied, and [`rollback::RollbackEngine`]
//! reverses a recorded batch. Applying the moves themselves is left to the
//! caller; [`engine`] is the one shipped with the `mediamove` binary.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fsops;
pub mod journal;
pub mod model;
pub mod reporter;
pub mod resolve;
pub mod rollback;
pub mod space;
pub mod transaction;
pub mod validate;

pub use error::{Result, TxnError};
pub use model::{Operation, OperationKind, OperationStatus, Transaction, TransactionStatus};
pub use rollback::{RollbackEngine, RollbackReport};
pub use transaction::TransactionManager;
pub use validate::Validator;
