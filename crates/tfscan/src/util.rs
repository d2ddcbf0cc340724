use hcl::{Expression, Traversal, TraversalOperator};
use std::path::{Component, Path, PathBuf};

pub(crate) trait TraversalExt {
    /// Leading variable and attribute names of a traversal
    ///
    /// `aws_subnet.public[0].id` yields `["aws_subnet", "public"]`, the walk stops at the
    /// first operator that is not an attribute access.
    fn segments(&self) -> Vec<String>;
}

impl TraversalExt for Traversal {
    fn segments(&self) -> Vec<String> {
        let Expression::Variable(var) = &self.expr else {
            return vec![];
        };

        let mut path = vec![var.as_str().to_string()];
        for operator in &self.operators {
            let TraversalOperator::GetAttr(ident) = operator else {
                break;
            };

            path.push(ident.to_string());
        }

        path
    }
}

/// Report path of a file: relative to the scan root, `/`-separated, with a leading `/`
///
/// Falls back to the full path when the file is outside of the root.
pub fn report_path(file: &Path, root: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let rendered = normalize_separators(&relative.display().to_string());
    if rendered.starts_with('/') {
        rendered
    } else {
        format!("/{rendered}")
    }
}

/// Unify windows and unix path separators
///
/// Paths recorded while building the graph may use a different separator than the host.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Lexically resolve `.` and `..` components without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Common ancestor directory of a set of files
pub fn common_parent(files: &[PathBuf]) -> PathBuf {
    let mut iter = files.iter();
    let Some(first) = iter.next() else {
        return PathBuf::new();
    };

    let mut common: PathBuf = first.parent().map(Path::to_path_buf).unwrap_or_default();
    for file in iter {
        while !file.starts_with(&common) {
            if !common.pop() {
                return PathBuf::new();
            }
        }
    }
    common
}
