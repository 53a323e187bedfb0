use anyhow::{Context, Result};
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};

use crate::cli::{ApplyArgs, GlobalArgs, RollbackArgs, ShowArgs, ValidateArgs};
use crate::config::Settings;
use crate::error::TxnError;
use crate::events::Event;
use crate::exit_codes::exit;
use crate::fsops;
use crate::model::{self, Operation, OperationKind, OperationStatus, Plan, TransactionMode};
use crate::reporter::Reporter;
use crate::resolve;
use crate::rollback::{RollbackEngine, RollbackReport};
use crate::transaction::TransactionManager;

fn load_settings(global: &GlobalArgs) -> Result<Settings> {
    Ok(Settings::load(global.config.as_deref())?.with_log_dir(global.log_dir.clone()))
}

fn load_plan(manifest: &Path, root: Option<PathBuf>) -> Result<(Plan, Vec<Operation>)> {
    let mut plan = model::load_plan(manifest).context("failed to load manifest")?;
    if let Some(root) = root {
        plan.root = root;
    }
    plan.validate()?;
    let operations = resolve::resolve_plan(&plan)?;
    Ok((plan, operations))
}

/// Check the whole plan without touching the tree and report every failure;
/// true when the plan is clean.
fn check_plan(settings: &Settings, operations: &[Operation], reporter: &mut Reporter) -> bool {
    let errors = settings.validator().check_only().validate_plan(operations);
    for (index, err) in &errors {
        reporter.record(Event::ValidationFailed {
            index: *index,
            destination: err.operation.destination.clone(),
            reason: err.reason.to_string(),
        });
    }
    errors.is_empty()
}

pub fn validate(global: &GlobalArgs, args: ValidateArgs) -> Result<i32> {
    let mut reporter = Reporter::new(global.json);
    let settings = load_settings(global)?;
    let (_plan, operations) = load_plan(&args.manifest, args.root)?;

    if !check_plan(&settings, &operations, &mut reporter) {
        return Ok(exit::VALIDATION_FAILURE);
    }
    reporter.record(Event::PlanValidated {
        operations: operations.len(),
    });
    Ok(exit::SUCCESS)
}

pub fn apply(global: &GlobalArgs, args: ApplyArgs) -> Result<i32> {
    let mut reporter = Reporter::new(global.json);
    let settings = load_settings(global)?;
    let (plan, operations) = load_plan(&args.manifest, args.root)?;

    // Any failure blocks the batch before a transaction exists.
    if !check_plan(&settings, &operations, &mut reporter) {
        return Ok(exit::VALIDATION_FAILURE);
    }
    if args.dry_run {
        for (index, op) in operations.iter().enumerate() {
            reporter.record(Event::OpPlanned {
                index,
                kind: op.kind.to_string(),
                src: op.source().map(Path::to_path_buf),
                dst: op.destination.clone(),
            });
        }
        return Ok(exit::SUCCESS);
    }

    let validator = settings.validator();
    let manager = settings.manager()?;
    let mut txn = manager.begin()?;
    reporter.record(Event::TxnStarted {
        transaction_id: txn.id.clone(),
    });

    let total = operations.len();
    let mut failures = 0;
    for (index, op) in operations.into_iter().enumerate() {
        reporter.record(Event::OpStarted { index });

        // Re-check right before executing: the tree may have changed since
        // the plan was checked, and missing parents are created here.
        if let Err(e) = validator.validate_operation(&op) {
            let mut rejected = op.with_status(OperationStatus::Failed);
            rejected.error = Some(e.reason.to_string());
            manager.add_operation(&mut txn, rejected)?;
            reporter.record(Event::ValidationFailed {
                index,
                destination: e.operation.destination.clone(),
                reason: e.reason.to_string(),
            });
            failures += 1;
            if plan.transaction == TransactionMode::All {
                return abort(&manager, &mut txn, &plan.root, format!("operation {index}: {e}"), &mut reporter);
            }
            continue;
        }

        // Write-ahead: the intent is on disk before the filesystem changes.
        let op = op.with_status(OperationStatus::InProgress);
        manager.add_operation(&mut txn, op.clone())?;
        match execute(&op) {
            Ok(bytes_copied) => {
                let dst = op.destination.clone();
                manager.update_operation(&mut txn, index, op.with_status(OperationStatus::Completed))?;
                reporter.record(Event::OpCompleted {
                    index,
                    bytes_copied,
                    dst,
                });
            }
            Err(e) => {
                let mut failed = op.with_status(OperationStatus::Failed);
                failed.error = Some(e.to_string());
                manager.update_operation(&mut txn, index, failed)?;
                reporter.record(Event::OpFailed {
                    index,
                    error: e.to_string(),
                });
                failures += 1;
                if plan.transaction == TransactionMode::All {
                    return abort(&manager, &mut txn, &plan.root, format!("operation {index}: {e}"), &mut reporter);
                }
            }
        }
    }

    if failures > 0 {
        let summary = format!("{failures} of {total} operations failed");
        manager.fail(&mut txn, &summary)?;
        reporter.record(Event::TxnFailed {
            transaction_id: txn.id.clone(),
            error: summary,
        });
        return Ok(exit::TRANSACTIONAL_FAILURE);
    }

    manager.complete(&mut txn)?;
    reporter.record(Event::TxnCommitted {
        transaction_id: txn.id.clone(),
    });
    if !global.json {
        println!("{}", reporter.summary());
    }
    Ok(exit::SUCCESS)
}

/// Fail the transaction and immediately reverse what was applied.
fn abort(
    manager: &TransactionManager,
    txn: &mut model::Transaction,
    root: &Path,
    error: String,
    reporter: &mut Reporter,
) -> Result<i32> {
    manager.fail(txn, &error)?;
    reporter.record(Event::TxnFailed {
        transaction_id: txn.id.clone(),
        error,
    });
    let engine = RollbackEngine::new(manager).with_boundary(root);
    match run_rollback(&engine, &txn.id, reporter)? {
        exit::SUCCESS => Ok(exit::TRANSACTIONAL_FAILURE),
        code => Ok(code),
    }
}

/// Perform the forward direction of one operation.
fn execute(op: &Operation) -> io::Result<u64> {
    match op.kind {
        OperationKind::Move | OperationKind::Rename => {
            if std::fs::symlink_metadata(&op.destination).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("destination already exists: {}", op.destination.display()),
                ));
            }
            fsops::mv(&op.source, &op.destination)
        }
        OperationKind::CreateDirectory => fsops::mkdir(&op.destination).map(|()| 0),
        OperationKind::CreateFile => fsops::touch(&op.destination).map(|()| 0),
        OperationKind::Unknown => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unknown operation type",
        )),
    }
}

pub fn rollback(global: &GlobalArgs, args: RollbackArgs) -> Result<i32> {
    let mut reporter = Reporter::new(global.json);
    let manager = load_settings(global)?.manager()?;
    let mut engine = RollbackEngine::new(&manager);
    if let Some(boundary) = args.boundary {
        engine = engine.with_boundary(boundary);
    }
    run_rollback(&engine, &args.id, &mut reporter)
}

fn run_rollback(engine: &RollbackEngine<'_>, id: &str, reporter: &mut Reporter) -> Result<i32> {
    reporter.record(Event::RollbackStarted {
        transaction_id: id.to_string(),
    });
    let report_reversed = |report: &RollbackReport, reporter: &mut Reporter| {
        for reversed in &report.reversed {
            reporter.record(Event::OpReversed {
                index: reversed.index,
                outcome: reversed.outcome.to_string(),
            });
        }
    };
    match engine.rollback(id) {
        Ok(report) => {
            report_reversed(&report, reporter);
            reporter.record(Event::RollbackCompleted {
                transaction_id: id.to_string(),
                failures: 0,
            });
            Ok(exit::SUCCESS)
        }
        Err(TxnError::Rollback(err)) => {
            report_reversed(&err.report, reporter);
            for failure in &err.failures {
                reporter.record(Event::ReversalFailed {
                    index: failure.index(),
                    error: failure.to_string(),
                });
            }
            reporter.record(Event::RollbackCompleted {
                transaction_id: id.to_string(),
                failures: err.failures.len(),
            });
            Ok(exit::PARTIAL_ROLLBACK)
        }
        Err(e) => Err(e).with_context(|| format!("cannot roll back transaction {id}")),
    }
}

pub fn list(global: &GlobalArgs) -> Result<i32> {
    let manager = load_settings(global)?.manager()?;
    let now = Utc::now();
    for id in manager.list()? {
        let txn = match manager.load(&id) {
            Ok(txn) => txn,
            Err(e) => {
                tracing::warn!(%id, error = %e, "skipping unreadable transaction record");
                continue;
            }
        };
        if global.json {
            let line = serde_json::json!({
                "id": txn.id,
                "status": txn.status,
                "timestamp": txn.timestamp,
                "operations": txn.operations.len(),
                "weak_id": txn.weak_id,
            });
            println!("{line}");
        } else {
            let age = (now - txn.timestamp).to_std().unwrap_or_default();
            let age = std::time::Duration::from_secs(age.as_secs());
            println!(
                "{}  {:<11}  {:>4} ops  {} ago",
                txn.id,
                txn.status,
                txn.operations.len(),
                humantime::format_duration(age)
            );
        }
    }
    Ok(exit::SUCCESS)
}

pub fn show(global: &GlobalArgs, args: ShowArgs) -> Result<i32> {
    let manager = load_settings(global)?.manager()?;
    let txn = manager
        .load(&args.id)
        .with_context(|| format!("cannot load transaction {}", args.id))?;
    println!("{}", serde_json::to_string_pretty(&txn)?);
    Ok(exit::SUCCESS)
}
