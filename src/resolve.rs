use anyhow::{Result, bail};
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

use crate::model::{Operation, Plan, PlanOperation};

/// Resolve a manifest path against `root` into a normalized absolute path.
///
/// The path does not have to exist. `..` segments are folded lexically.
pub fn resolve_path(root: &Path, path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        bail!("empty path in manifest");
    }
    Ok(path.absolutize_from(root)?.into_owned())
}

/// Turn manifest entries into pending operations with absolute paths.
pub fn resolve_plan(plan: &Plan) -> Result<Vec<Operation>> {
    plan.operations
        .iter()
        .map(|op| resolve_operation(&plan.root, op))
        .collect()
}

fn resolve_operation(root: &Path, op: &PlanOperation) -> Result<Operation> {
    let source = match &op.source {
        Some(src) => resolve_path(root, src)?,
        None => PathBuf::new(),
    };
    let destination = resolve_path(root, &op.destination)?;
    Ok(Operation::new(op.kind, source, destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OperationKind, TransactionMode};

    #[test]
    fn resolves_relative_and_absolute() {
        let plan = Plan {
            root: "/library".into(),
            transaction: TransactionMode::All,
            operations: vec![
                PlanOperation {
                    kind: OperationKind::Move,
                    source: Some("/downloads/movie.mkv".into()),
                    destination: "Movies/Movie (2023)/Movie (2023).mkv".into(),
                },
                PlanOperation {
                    kind: OperationKind::CreateDirectory,
                    source: None,
                    destination: "Shows/../Shows/Show".into(),
                },
            ],
        };
        let ops = resolve_plan(&plan).unwrap();
        assert_eq!(ops[0].source, PathBuf::from("/downloads/movie.mkv"));
        assert_eq!(
            ops[0].destination,
            PathBuf::from("/library/Movies/Movie (2023)/Movie (2023).mkv")
        );
        assert_eq!(ops[1].source(), None);
        assert_eq!(ops[1].destination, PathBuf::from("/library/Shows/Show"));
    }

    #[test]
    fn keeps_trailing_space_for_validation() {
        let op = PlanOperation {
            kind: OperationKind::CreateFile,
            source: None,
            destination: "movie.nfo ".into(),
        };
        let resolved = resolve_operation(Path::new("/library"), &op).unwrap();
        assert_eq!(resolved.destination, PathBuf::from("/library/movie.nfo "));
    }
}
