//! Filesystem create, find, copy, rotate

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use glob::Pattern;
use log::debug;
use walkdir::WalkDir;

use crate::{
    bath,
    berms::{mode_of, set_mode},
    misc::{IoResultExt, PathError},
};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FsError {
    #[error("Invalid glob pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("Expected keep to be at least 2, got {0}")]
    InvalidKeep(usize),
    #[error("Expected {0:?} to be a file")]
    NotAFile(PathBuf),
    #[error("{} error(s) copying tree", .0.len())]
    CopyTree(Vec<CopyFailure>),
    #[error(transparent)]
    Io(#[from] PathError),
}

/// One entry that could not be copied
#[derive(Debug, thiserror::Error)]
#[error("Failed to copy {src:?} to {dst:?}: {source}")]
pub struct CopyFailure {
    pub src: PathBuf,
    pub dst: PathBuf,
    #[source]
    pub source: io::Error,
}

// ---------- DIRECTORIES -----------------

/// Create `dir` and any missing parents.
/// An existing directory is fine, an existing file is an error.
pub fn mkdir_p(dir: impl AsRef<Path>) -> Result<(), PathError> {
    let dir = dir.as_ref();
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).at("create directory", dir)?;
    debug!("Created directory: {}", dir.display());
    Ok(())
}

// ---------- FIND -----------------

fn compile(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Vec<Pattern>, FsError> {
    patterns
        .into_iter()
        .map(|p| {
            let p = p.as_ref();
            Pattern::new(p).map_err(|source| FsError::Pattern {
                pattern: p.to_string(),
                source,
            })
        })
        .collect()
}

/// Recursive search for entries whose base name matches a glob.
///
/// # Example
/// ```rust,no_run
/// use gap_bolts::bs::FindFiles;
///
/// let finder = FindFiles::new("src", ["*.rs"])?.ignored(["test_*"])?.max_depth(1);
/// for path in finder.iter() {
///     println!("{}", path.display());
/// }
/// # Ok::<(), gap_bolts::bs::FsError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FindFiles {
    root: PathBuf,
    patterns: Vec<Pattern>,
    ignored: Vec<Pattern>,
    include_dirs: bool,
    max_depth: Option<usize>,
}

impl FindFiles {
    pub fn new(
        root: impl Into<PathBuf>,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, FsError> {
        Ok(Self {
            root: root.into(),
            patterns: compile(patterns)?,
            ignored: Vec::new(),
            include_dirs: false,
            max_depth: None,
        })
    }

    /// Matches of these are skipped, their contents are still searched
    pub fn ignored(
        mut self,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, FsError> {
        self.ignored = compile(patterns)?;
        Ok(self)
    }

    pub fn include_dirs(mut self, include_dirs: bool) -> Self {
        self.include_dirs = include_dirs;
        self
    }

    /// 0 only searches the entries directly inside the root
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    fn is_match(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name)) && !self.ignored.iter().any(|p| p.matches(name))
    }

    /// Symlinks are listed but not followed; unreadable entries are skipped.
    pub fn iter(&self) -> impl Iterator<Item = PathBuf> + '_ {
        let mut walker = WalkDir::new(&self.root).min_depth(1).follow_links(false);
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth + 1);
        }

        walker
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry: {e}");
                    None
                }
            })
            .filter(|entry| self.include_dirs || !entry.file_type().is_dir())
            .filter(|entry| self.is_match(&entry.file_name().to_string_lossy()))
            .map(walkdir::DirEntry::into_path)
    }
}

/// Every file under `dir` whose name matches one of `patterns`
pub fn iter_find_files(
    dir: impl Into<PathBuf>,
    patterns: impl IntoIterator<Item = impl AsRef<str>>,
) -> Result<Vec<PathBuf>, FsError> {
    Ok(FindFiles::new(dir, patterns)?.iter().collect())
}

// ---------- COPY -----------------

type IgnoreFn<'a> = Box<dyn Fn(&Path, &[String]) -> HashSet<String> + 'a>;

/// Recursive copy into a destination that may already exist.
///
/// Every entry is attempted; failures are collected into [`FsError::CopyTree`].
#[derive(Default)]
pub struct CopyTree<'a> {
    symlinks: bool,
    ignore: Option<IgnoreFn<'a>>,
}

impl<'a> CopyTree<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recreate symlinks instead of copying what they point to
    pub fn symlinks(mut self, symlinks: bool) -> Self {
        self.symlinks = symlinks;
        self
    }

    /// Called with each source directory and its entry names; returns the names to skip
    pub fn ignore(mut self, f: impl Fn(&Path, &[String]) -> HashSet<String> + 'a) -> Self {
        self.ignore = Some(Box::new(f));
        self
    }

    pub fn copy(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(), FsError> {
        let mut errors = Vec::new();
        self.copy_dir(src.as_ref(), dst.as_ref(), &mut errors)?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FsError::CopyTree(errors))
        }
    }

    fn copy_dir(&self, src: &Path, dst: &Path, errors: &mut Vec<CopyFailure>) -> Result<(), PathError> {
        let mut names = fs::read_dir(src)
            .at("list", src)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()
            .at("list", src)?;
        names.sort();

        let ignored = match &self.ignore {
            Some(f) => f(src, &names),
            None => HashSet::new(),
        };
        mkdir_p(dst)?;

        for name in names.iter().filter(|n| !ignored.contains(*n)) {
            let src_path = src.join(name);
            let dst_path = dst.join(name);
            if let Err(source) = self.copy_entry(&src_path, &dst_path, errors) {
                errors.push(CopyFailure {
                    src: src_path,
                    dst: dst_path,
                    source,
                });
            }
        }

        let copied_perms = fs::metadata(src)
            .and_then(|meta| set_mode(dst, mode_of(&meta.permissions())).map_err(io::Error::from));
        if let Err(source) = copied_perms {
            errors.push(CopyFailure {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
                source,
            });
        }
        Ok(())
    }

    fn copy_entry(&self, src: &Path, dst: &Path, errors: &mut Vec<CopyFailure>) -> io::Result<()> {
        let meta = fs::symlink_metadata(src)?;
        if self.symlinks && meta.file_type().is_symlink() {
            let target = fs::read_link(src)?;
            symlink(&target, src, dst)
        } else if src.is_dir() {
            self.copy_dir(src, dst, errors).map_err(io::Error::from)
        } else {
            fs::copy(src, dst).map(|_| ())
        }
    }
}

#[cfg(unix)]
fn symlink(target: &Path, _src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(windows)]
fn symlink(target: &Path, src: &Path, dst: &Path) -> io::Result<()> {
    use std::os::windows::fs as windows_fs;
    if fs::metadata(src)?.is_dir() {
        windows_fs::symlink_dir(target, dst)
    } else {
        windows_fs::symlink_file(target, dst)
    }
}

#[cfg(not(any(unix, windows)))]
fn symlink(_target: &Path, _src: &Path, _dst: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported"))
}

/// [`CopyTree`] with default options
pub fn copy_tree(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(), FsError> {
    CopyTree::new().copy(src, dst)
}

// ---------- ROTATE -----------------

/// Shift `path` to `root.1.ext`, `root.1.ext` to `root.2.ext` and so on, keeping at most
/// `keep - 1` rotated copies. Afterwards `path` itself no longer exists.
/// Does nothing if `path` does not exist.
pub fn rotate_file(path: impl AsRef<Path>, keep: usize) -> Result<(), FsError> {
    let path = path.as_ref();
    if keep < 2 {
        return Err(FsError::InvalidKeep(keep));
    }
    if !path.exists() {
        return Ok(());
    }
    if !path.is_file() {
        return Err(FsError::NotAFile(path.to_path_buf()));
    }

    let name = bath::basename(path).ok_or_else(|| FsError::NotAFile(path.to_path_buf()))?;
    let [stem, ext] = bath::split_ext(&name);
    let rotated: Vec<PathBuf> = (1..keep)
        .map(|i| {
            let rotated_name = if ext.is_empty() {
                format!("{stem}.{i}")
            } else {
                format!("{stem}.{i}.{ext}")
            };
            path.with_file_name(rotated_name)
        })
        .collect();

    // rotated is never empty since keep >= 2
    if let Some(oldest) = rotated.last().filter(|p| p.exists()) {
        fs::remove_file(oldest).at("remove oldest rotation", oldest)?;
    }
    for pair in rotated.windows(2).rev() {
        if pair[0].exists() {
            fs::rename(&pair[0], &pair[1]).at("rotate", &pair[0])?;
        }
    }
    fs::rename(path, &rotated[0]).at("rotate", path)?;
    debug!("Rotated {path:?} keeping {keep}");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn touch(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn names(paths: impl IntoIterator<Item = PathBuf>, root: &Path) -> Vec<String> {
        let mut names: Vec<String> = paths
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn mkdir_p_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        mkdir_p(&nested).unwrap();
        mkdir_p(&nested).unwrap();
        assert!(nested.is_dir());

        let file = dir.path().join("file");
        touch(&file, "");
        assert!(mkdir_p(&file).is_err());
    }

    #[test]
    fn finds_files_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a.py"), "");
        touch(&root.join("b.txt"), "");
        touch(&root.join("pkg/c.py"), "");
        touch(&root.join("pkg/deep/test_d.py"), "");
        fs::create_dir_all(root.join("pkg.py")).unwrap();

        let found = iter_find_files(root, ["*.py"]).unwrap();
        assert_eq!(names(found, root), ["a.py", "pkg/c.py", "pkg/deep/test_d.py"]);

        let finder = FindFiles::new(root, ["*.py", "*.txt"])
            .unwrap()
            .ignored(["test_*"])
            .unwrap();
        assert_eq!(
            names(finder.iter(), root),
            ["a.py", "b.txt", "pkg/c.py"]
        );

        let finder = FindFiles::new(root, ["*.py"]).unwrap().max_depth(0);
        assert_eq!(names(finder.iter(), root), ["a.py"]);

        let finder = FindFiles::new(root, ["*.py"]).unwrap().include_dirs(true).max_depth(1);
        assert_eq!(names(finder.iter(), root), ["a.py", "pkg.py", "pkg/c.py"]);
    }

    #[test]
    fn rejects_bad_pattern() {
        assert!(matches!(
            FindFiles::new(".", ["[unclosed"]),
            Err(FsError::Pattern { .. })
        ));
    }

    #[test]
    fn copies_tree_into_existing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        touch(&src.join("a.txt"), "a");
        touch(&src.join("sub/b.txt"), "b");
        touch(&src.join("skip.log"), "x");
        touch(&dst.join("existing.txt"), "keep");

        CopyTree::new()
            .ignore(|_, names| names.iter().filter(|n| n.ends_with(".log")).cloned().collect())
            .copy(&src, &dst)
            .unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dst.join("sub/b.txt")).unwrap(), "b");
        assert_eq!(fs::read_to_string(dst.join("existing.txt")).unwrap(), "keep");
        assert!(!dst.join("skip.log").exists());
    }

    #[test]
    fn copy_tree_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = copy_tree(dir.path().join("nope"), dir.path().join("dst")).unwrap_err();
        assert!(matches!(err, FsError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[cfg(unix)]
    #[test]
    fn copy_tree_symlinks_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        touch(&src.join("real.txt"), "real");
        std::os::unix::fs::symlink("real.txt", src.join("link.txt")).unwrap();
        std::os::unix::fs::symlink("missing", src.join("dangling")).unwrap();

        let dst = dir.path().join("linked");
        CopyTree::new().symlinks(true).copy(&src, &dst).unwrap();
        assert!(fs::symlink_metadata(dst.join("link.txt")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(dst.join("dangling")).unwrap(), PathBuf::from("missing"));

        // following links, the dangling one cannot be copied but the rest still is
        let dst = dir.path().join("followed");
        let err = copy_tree(&src, &dst).unwrap_err();
        let FsError::CopyTree(failures) = err else {
            panic!("expected copy errors, got {err:?}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].src, src.join("dangling"));
        assert_eq!(fs::read_to_string(dst.join("link.txt")).unwrap(), "real");
        assert!(!fs::symlink_metadata(dst.join("link.txt")).unwrap().file_type().is_symlink());
    }

    #[test]
    fn rotates() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");

        for generation in 0..4 {
            touch(&log, &format!("gen{generation}"));
            rotate_file(&log, 3).unwrap();
            assert!(!log.exists());
        }

        let read = |name: &str| fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("app.1.log"), "gen3");
        assert_eq!(read("app.2.log"), "gen2");
        assert!(!dir.path().join("app.3.log").exists());
    }

    #[test]
    fn rotate_edge_cases() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("notes");
        rotate_file(&plain, 5).unwrap();

        touch(&plain, "n");
        rotate_file(&plain, 5).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("notes.1")).unwrap(), "n");

        assert!(matches!(rotate_file(&plain, 1), Err(FsError::InvalidKeep(1))));
        assert!(matches!(
            rotate_file(dir.path(), 3),
            Err(FsError::NotAFile(_))
        ));
    }
}
