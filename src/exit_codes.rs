/// Process exit codes.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    /// The command could not run, e.g. an unreadable manifest or log.
    pub const OPERATIONAL_FAILURE: i32 = 1;
    /// The plan failed validation; nothing was touched.
    pub const VALIDATION_FAILURE: i32 = 2;
    /// Execution failed and the transaction was rolled back (or needs to be).
    pub const TRANSACTIONAL_FAILURE: i32 = 3;
    /// A rollback ran but some operations could not be reversed.
    pub const PARTIAL_ROLLBACK: i32 = 4;
}
