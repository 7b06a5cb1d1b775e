use std::path::{Path, PathBuf};

pub const INPUT_DIR: &str = "input";
pub const DESIRED_DIR: &str = "desired";
pub const ACTUAL_DIR: &str = "actual";
pub const PROGRAMS_RELATIVE_DIR: &str = "dist/CFML/progs";

/// Locates the `input/`, `desired/` and `actual/` files of one scenario
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureLayout {
    root: PathBuf,
}

impl FixtureLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn input(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.root.join(INPUT_DIR).join(file_name)
    }

    pub fn desired(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.root.join(DESIRED_DIR).join(file_name)
    }

    pub fn actual(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.root.join(ACTUAL_DIR).join(file_name)
    }
}

pub fn programs_dir(project_dir: impl AsRef<Path>) -> PathBuf {
    project_dir.as_ref().join(PROGRAMS_RELATIVE_DIR)
}

/// Forward-slash rendering for reports.
pub fn normalize_path(path: &Path) -> String {
    let mut normalized = path.to_string_lossy().replace('\\', "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::{FixtureLayout, normalize_path, programs_dir};
    use std::path::{Path, PathBuf};

    #[test]
    fn layout_resolves_role_directories() {
        let layout = FixtureLayout::new("tests/functional_tests/powder");
        assert_eq!(
            layout.input("pbso4_cw.json"),
            PathBuf::from("tests/functional_tests/powder/input/pbso4_cw.json")
        );
        assert_eq!(
            layout.desired("pbso4_cw.sub"),
            PathBuf::from("tests/functional_tests/powder/desired/pbso4_cw.sub")
        );
        assert_eq!(
            layout.actual("LiFePO4n_sum.bvs"),
            PathBuf::from("tests/functional_tests/powder/actual/LiFePO4n_sum.bvs")
        );
    }

    #[test]
    fn programs_live_under_dist() {
        assert_eq!(
            programs_dir("/work"),
            PathBuf::from("/work/dist/CFML/progs")
        );
    }

    #[test]
    fn normalize_path_strips_leading_current_dir() {
        assert_eq!(normalize_path(Path::new("./././a/b.sub")), "a/b.sub");
    }
}
