//! This module contains the [`Workspace`] abstraction through which test
//! cases are persisted, along with an on-disk and an in-memory
//! implementation.

use std::{
    collections::BTreeMap,
    fmt::Debug,
    fs::{self, File, OpenOptions},
    io::{BufReader, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    constant::{TESTCASE_FILE_EXTENSION, WORKSPACE_DIRECTORY_PREFIX},
    error::{Error, Result},
    testcase::TestCase,
};

/// A dynamically dispatched [`Workspace`] that can be shared with the
/// scheduler's worker threads.
pub type DynWorkspace = Arc<dyn Workspace>;

/// The interface to a store of test-case artifacts.
pub trait Workspace
where
    Self: Debug + Send + Sync,
{
    /// Persists `testcase` as a single self-contained artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the artifact cannot be written, or if an artifact
    /// with the same name already exists.
    fn persist(&self, testcase: &TestCase) -> Result<()>;

    /// Loads the artifact called `name`, if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the artifact exists but cannot be read.
    fn load(&self, name: &str) -> Result<Option<TestCase>>;

    /// Gets the names of every artifact in the workspace, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the workspace cannot be listed.
    fn names(&self) -> Result<Vec<String>>;
}

/// A workspace that writes each test case to `<name>.testcase.json` in a
/// directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectoryWorkspace {
    root: PathBuf,
}

impl DirectoryWorkspace {
    /// Opens the workspace at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(Error::workspace)?;
        Ok(Self { root })
    }

    /// Creates a fresh, uniquely named workspace directory inside `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the directory cannot be created.
    pub fn create_in(parent: impl AsRef<Path>) -> Result<Self> {
        let name = format!("{WORKSPACE_DIRECTORY_PREFIX}{}", Uuid::new_v4().simple());
        Self::new(parent.as_ref().join(name))
    }

    /// Gets the directory of the workspace.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Gets the path of the artifact called `name`.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{TESTCASE_FILE_EXTENSION}"))
    }
}

impl Workspace for DirectoryWorkspace {
    fn persist(&self, testcase: &TestCase) -> Result<()> {
        let path = self.path_for(testcase.name());
        write_new(&path, |writer| {
            serde_json::to_writer_pretty(writer, testcase).map_err(Error::workspace)
        })?;

        tracing::debug!(path = %path.display(), "persisted test case");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<TestCase>> {
        let path = self.path_for(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::workspace(e)),
        };

        let testcase = serde_json::from_reader(BufReader::new(file)).map_err(Error::workspace)?;
        Ok(Some(testcase))
    }

    fn names(&self) -> Result<Vec<String>> {
        let suffix = format!(".{TESTCASE_FILE_EXTENSION}");
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(Error::workspace)? {
            let entry = entry.map_err(Error::workspace)?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(&suffix)) {
                names.push(name.to_string());
            }
        }
        names.sort();

        Ok(names)
    }
}

/// Creates the file at `path`, which must not exist yet, and fills it using
/// `write`.
///
/// If anything fails after the file was created, the file is removed again so
/// that no partial artifact is left behind.
fn write_new(path: &Path, write: impl FnOnce(&mut BufWriter<File>) -> Result<()>) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::workspace(format!("{}: {e}", path.display())))?;

    let mut writer = BufWriter::new(file);
    let written = write(&mut writer).and_then(|()| writer.flush().map_err(Error::workspace));
    drop(writer);

    if written.is_err() {
        if let Err(error) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), %error, "could not remove partial artifact");
        }
    }
    written
}

/// A workspace that keeps test cases in memory.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    artifacts: Mutex<BTreeMap<String, TestCase>>,
}

impl MemoryWorkspace {
    /// Creates an empty in-memory workspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of artifacts in the workspace.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    /// Checks if the workspace holds no artifacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }
}

impl Workspace for MemoryWorkspace {
    fn persist(&self, testcase: &TestCase) -> Result<()> {
        let mut artifacts = self.artifacts.lock();
        if artifacts.contains_key(testcase.name()) {
            return Err(Error::workspace(format!(
                "an artifact named {} already exists",
                testcase.name()
            )));
        }
        artifacts.insert(testcase.name().to_string(), testcase.clone());

        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<TestCase>> {
        Ok(self.artifacts.lock().get(name).cloned())
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.artifacts.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use crate::{error::Error, testcase::workspace::write_new};

    #[test]
    fn failed_writes_leave_no_file_behind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("broken.testcase.json");

        let result = write_new(&path, |writer| {
            writer.write_all(b"{\"name\":").map_err(Error::workspace)?;
            Err(Error::workspace("serialization failed"))
        });
        assert!(result.is_err());
        assert!(!path.exists());

        write_new(&path, |writer| writer.write_all(b"{}").map_err(Error::workspace))?;
        assert_eq!(std::fs::read_to_string(&path)?, "{}");
        assert!(write_new(&path, |_| Ok(())).is_err());

        Ok(())
    }
}
