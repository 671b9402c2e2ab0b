//! Per-test working directories.

use std::fs;
use std::path::{Path, PathBuf};

use autotest_common::{AutotestError, Result};

/// The directory tree a single test runs in.
///
/// ```text
/// <resultdir>/<name>/
///     results/     keyvals and other test output
///     profiling/
///     debug/       error records, logs
///     tmp/
///     status       written by the parent after the test finishes
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDirs {
    pub testdir: PathBuf,
    pub resultsdir: PathBuf,
    pub profdir: PathBuf,
    pub debugdir: PathBuf,
    pub tmpdir: PathBuf,
}

impl TestDirs {
    fn layout(testdir: PathBuf) -> Self {
        Self {
            resultsdir: testdir.join("results"),
            profdir: testdir.join("profiling"),
            debugdir: testdir.join("debug"),
            tmpdir: testdir.join("tmp"),
            testdir,
        }
    }

    /// Create `resultdir/name` and its sub-directories.
    ///
    /// Fails if the test directory already exists, so two runs never share one.
    pub fn create(resultdir: &Path, name: &str) -> Result<Self> {
        let testdir = resultdir.join(name);
        if testdir.exists() {
            return Err(AutotestError::test_error(format!(
                "test directory {} already exists",
                testdir.display()
            )));
        }
        fs::create_dir_all(resultdir)?;
        fs::create_dir(&testdir)?;
        let dirs = Self::layout(testdir);
        for dir in [&dirs.resultsdir, &dirs.profdir, &dirs.debugdir, &dirs.tmpdir] {
            fs::create_dir(dir)?;
        }
        Ok(dirs)
    }

    /// Open an existing test directory. The path is made absolute so it survives a change of working directory.
    pub fn open(testdir: &Path) -> Result<Self> {
        if !testdir.is_dir() {
            return Err(AutotestError::test_error(format!(
                "test directory {} does not exist",
                testdir.display()
            )));
        }
        Ok(Self::layout(fs::canonicalize(testdir)?))
    }

    /// The test directory's last component, as used in job status logs.
    pub fn name(&self) -> String {
        self.testdir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_makes_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = TestDirs::create(tmp.path(), "dummy_Pass").unwrap();
        assert_eq!(dirs.testdir, tmp.path().join("dummy_Pass"));
        for dir in [&dirs.resultsdir, &dirs.profdir, &dirs.debugdir, &dirs.tmpdir] {
            assert!(dir.is_dir(), "{} missing", dir.display());
        }
        assert_eq!(dirs.name(), "dummy_Pass");
    }

    #[test]
    fn test_create_refuses_existing_testdir() {
        let tmp = tempfile::tempdir().unwrap();
        TestDirs::create(tmp.path(), "t").unwrap();
        let err = TestDirs::create(tmp.path(), "t").unwrap_err();
        assert!(matches!(err, AutotestError::TestError(ref m) if m.ends_with("already exists")));
    }

    #[test]
    fn test_create_makes_missing_resultdir() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = TestDirs::create(&tmp.path().join("a/b"), "t").unwrap();
        assert!(dirs.debugdir.is_dir());
    }

    #[test]
    fn test_open_is_absolute() {
        let tmp = tempfile::tempdir().unwrap();
        let created = TestDirs::create(tmp.path(), "t").unwrap();
        let opened = TestDirs::open(&created.testdir).unwrap();
        assert!(opened.testdir.is_absolute());
        assert_eq!(opened.debugdir, opened.testdir.join("debug"));
        assert!(TestDirs::open(&tmp.path().join("missing")).is_err());
    }
}
