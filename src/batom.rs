//! Atomic file replacement
//!
//! Content is written to a part file next to the destination, synced to disk and then
//! renamed over the destination. Observers of the destination path see either the old
//! file (or no file) or the complete new one, never a prefix of it.
//!
//! # Example
//! ```rust,no_run
//! use std::io::Write;
//! use gap_bolts::batom::AtomicSaver;
//!
//! AtomicSaver::new("/tmp/out.txt")?
//!     .file_perms(0o644)
//!     .save(|f| f.write_all(b"hello"))?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! Only one writer per part file is supported: the part file is created exclusively, so a
//! second session for the same destination fails unless `overwrite_part` is set, in which
//! case concurrent sessions race each other.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use cfg_if::cfg_if;
use log::{debug, warn};

use crate::{
    bath::{self, PathExt},
    berms::{FilePerms, mode_of, set_mode},
    misc::{IoResultExt, PathError},
};

/// Mode of a new part file when no permissions are given or inherited (before umask)
pub const DEFAULT_FILE_PERMS: u32 = 0o666;
pub const PART_SUFFIX: &str = ".part";

const NEWLINE: &[u8] = if cfg!(windows) { b"\r\n" } else { b"\n" };

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SaveError {
    #[error("Overwrite disabled and file already exists: {0:?}")]
    DestinationExists(PathBuf),
    #[error("Part file name must be a plain file name in the destination directory: {0:?}")]
    InvalidPartName(String),
    #[error("Failed to determine file name of {0:?}")]
    NoFileName(PathBuf),
    #[error(transparent)]
    Io(#[from] PathError),
}

impl SaveError {
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            SaveError::DestinationExists(_) => io::ErrorKind::AlreadyExists,
            SaveError::InvalidPartName(_) | SaveError::NoFileName(_) => {
                io::ErrorKind::InvalidInput
            }
            SaveError::Io(e) => e.kind(),
        }
    }
}

impl From<SaveError> for io::Error {
    fn from(e: SaveError) -> Self {
        io::Error::new(e.kind(), e)
    }
}

// ------------ CAPABILITIES -------------

/// What the platform guarantees when opening and renaming part files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenCaps {
    /// Handles are not inherited by child processes
    pub no_inherit: bool,
    /// Opening refuses to follow a symlink in the final component
    pub no_follow: bool,
    /// Rename replaces an existing destination in one step
    pub atomic_replace: bool,
    /// Hard links are available, needed to commit without clobbering
    pub hard_link: bool,
}

static OPEN_CAPS: LazyLock<OpenCaps> = LazyLock::new(|| {
    let caps = OpenCaps {
        no_inherit: cfg!(any(unix, windows)),
        no_follow: cfg!(unix),
        atomic_replace: cfg!(any(unix, windows)),
        hard_link: cfg!(any(unix, windows)),
    };
    debug!("Open capabilities: {caps:?}");
    caps
});

impl OpenCaps {
    /// Capabilities of the running platform, determined once
    pub fn probe() -> OpenCaps {
        *OPEN_CAPS
    }

    /// Assume nothing beyond plain create/rename
    pub fn minimal() -> OpenCaps {
        OpenCaps {
            no_inherit: false,
            no_follow: false,
            atomic_replace: false,
            hard_link: false,
        }
    }

    fn configure(&self, opts: &mut OpenOptions, mode: u32) {
        cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::fs::OpenOptionsExt;

                let mut flags = 0;
                if self.no_inherit {
                    flags |= libc::O_CLOEXEC;
                }
                if self.no_follow {
                    flags |= libc::O_NOFOLLOW;
                }
                opts.custom_flags(flags).mode(mode);
            } else {
                // std creates non-inheritable handles and has no creation mode here
                let _ = (opts, mode);
            }
        }
    }
}

impl Default for OpenCaps {
    fn default() -> Self {
        OpenCaps::probe()
    }
}

// ------------ RENAME -------------

/// Move `src` onto `dst` in a single step.
///
/// With `overwrite`, an existing `dst` is replaced. Without it, `dst` is hard linked then
/// `src` unlinked, so the call fails with [`io::ErrorKind::AlreadyExists`] instead of
/// clobbering a `dst` that exists.
pub fn atomic_rename(src: &Path, dst: &Path, overwrite: bool) -> Result<(), PathError> {
    rename_with(&OpenCaps::probe(), src, dst, overwrite)
}

fn rename_with(caps: &OpenCaps, src: &Path, dst: &Path, overwrite: bool) -> Result<(), PathError> {
    if overwrite {
        if caps.atomic_replace {
            return fs::rename(src, dst).at("rename part file onto", dst);
        }
        // plain rename first, replace only when the destination is in the way
        match fs::rename(src, dst) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Rename onto {dst:?} reported existing destination, replacing");
                fs::remove_file(dst).at("remove replaced file", dst)?;
                fs::rename(src, dst).at("rename part file onto", dst)
            }
            res => res.at("rename part file onto", dst),
        }
    } else if caps.hard_link {
        fs::hard_link(src, dst).at("link part file to", dst)?;
        fs::remove_file(src).at("remove linked part file", src)
    } else {
        if dst.symlink_metadata().is_ok() {
            return Err(PathError::new(
                "rename part file onto",
                dst,
                io::Error::from(io::ErrorKind::AlreadyExists),
            ));
        }
        fs::rename(src, dst).at("rename part file onto", dst)
    }
}

// ------------ SAVER -------------

/// Options for an atomic save of one destination path.
///
/// Invalid destinations and part file names are rejected on construction; the filesystem
/// is only touched by [`AtomicSaver::open`].
#[derive(Debug, Clone)]
pub struct AtomicSaver {
    dest_path: PathBuf,
    part_filename: String,
    overwrite: bool,
    file_perms: Option<u32>,
    overwrite_part: bool,
    rm_part_on_exc: bool,
    text_mode: bool,
    buffering: Option<usize>,
    caps: OpenCaps,
}

impl AtomicSaver {
    pub fn new(dest_path: impl AsRef<Path>) -> Result<Self, SaveError> {
        let dest_path = bath::absolute(dest_path.as_ref()).at("resolve", dest_path.as_ref())?;
        let Some(part_filename) = bath::basename(&dest_path).map(|name| format!("{name}{PART_SUFFIX}"))
        else {
            return Err(SaveError::NoFileName(dest_path));
        };

        Ok(Self {
            dest_path,
            part_filename,
            overwrite: true,
            file_perms: None,
            overwrite_part: false,
            rm_part_on_exc: true,
            text_mode: false,
            buffering: None,
            caps: OpenCaps::probe(),
        })
    }

    /// Replace an existing destination (default true)
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Mode of the new file, applied regardless of the umask.
    /// Without this, the mode of an existing destination is kept.
    pub fn file_perms(mut self, mode: u32) -> Self {
        self.file_perms = Some(mode);
        self
    }

    /// [`file_perms`](Self::file_perms) from `rwx` strings
    pub fn perms(self, perms: FilePerms) -> Self {
        self.file_perms(perms.mode())
    }

    /// Name of the part file, which always lives beside the destination
    pub fn part_filename(mut self, name: impl Into<String>) -> Result<Self, SaveError> {
        let name = name.into();
        if !bath::is_plain_file_name(&name) {
            return Err(SaveError::InvalidPartName(name));
        }
        self.part_filename = name;
        Ok(self)
    }

    /// Remove a stale part file instead of failing on it (default false)
    pub fn overwrite_part(mut self, overwrite_part: bool) -> Self {
        self.overwrite_part = overwrite_part;
        self
    }

    /// Remove the part file when the save fails (default true)
    pub fn remove_part_on_exception(mut self, remove: bool) -> Self {
        self.rm_part_on_exc = remove;
        self
    }

    /// Translate `\n` to the platform line ending while writing (default false)
    pub fn text_mode(mut self, text_mode: bool) -> Self {
        self.text_mode = text_mode;
        self
    }

    /// Write buffer capacity
    pub fn buffering(mut self, capacity: usize) -> Self {
        self.buffering = Some(capacity);
        self
    }

    pub fn capabilities(mut self, caps: OpenCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn dest_path(&self) -> &Path {
        &self.dest_path
    }

    pub fn part_path(&self) -> PathBuf {
        self.dest_path.sibling(&self.part_filename)
    }

    /// Start a session: create the part file and hand it out for writing.
    ///
    /// Fails without touching anything if the destination exists and overwriting is off.
    /// If setting the permissions fails, the part file is closed but left in place.
    pub fn open(&self) -> Result<AtomicFile, SaveError> {
        self.open_with(set_mode)
    }

    fn open_with(
        &self,
        chmod: impl FnOnce(&Path, u32) -> Result<(), PathError>,
    ) -> Result<AtomicFile, SaveError> {
        let part_path = self.part_path();

        if self.dest_path.symlink_metadata().is_ok() && !self.overwrite {
            return Err(SaveError::DestinationExists(self.dest_path.clone()));
        }
        if self.overwrite_part && part_path.symlink_metadata().is_ok() {
            debug!("Removing stale part file {part_path:?}");
            fs::remove_file(&part_path).at("remove stale part file", &part_path)?;
        }

        let (file_perms, do_chmod) = match self.file_perms {
            Some(perms) => (perms, true),
            None => match fs::metadata(&self.dest_path) {
                Ok(meta) => (mode_of(&meta.permissions()), true),
                // respect the umask
                Err(_) => (DEFAULT_FILE_PERMS, false),
            },
        };

        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create_new(true);
        self.caps.configure(&mut opts, file_perms);
        let file = opts.open(&part_path).at("create part file", &part_path)?;

        if do_chmod {
            if let Err(e) = chmod(&part_path, file_perms) {
                drop(file);
                return Err(e.into());
            }
        }

        debug!("Opened part file {part_path:?} for {:?}", self.dest_path);
        let writer = match self.buffering {
            Some(capacity) => BufWriter::with_capacity(capacity, file),
            None => BufWriter::new(file),
        };

        Ok(AtomicFile {
            writer: Some(writer),
            dest_path: self.dest_path.clone(),
            part_path,
            overwrite: self.overwrite,
            rm_part_on_exc: self.rm_part_on_exc,
            text_mode: self.text_mode,
            caps: self.caps,
        })
    }

    /// Run `f` against a fresh session, committing if it succeeds and discarding the part
    /// file (per `remove_part_on_exception`) if it fails. The error from `f` is returned
    /// unchanged.
    pub fn save<T, E>(&self, f: impl FnOnce(&mut AtomicFile) -> Result<T, E>) -> Result<T, E>
    where
        E: From<SaveError>,
    {
        let mut file = self.open()?;
        match f(&mut file) {
            Ok(val) => {
                file.commit()?;
                Ok(val)
            }
            Err(e) => {
                file.abort();
                Err(e)
            }
        }
    }
}

/// [`AtomicSaver::save`] with default options
pub fn atomic_save<T, E>(
    dest_path: impl AsRef<Path>,
    f: impl FnOnce(&mut AtomicFile) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<SaveError>,
{
    AtomicSaver::new(dest_path)?.save(f)
}

// ------------ SESSION -------------

/// An open part file.
///
/// [`AtomicFile::commit`] moves it into place. Dropping it uncommitted, including while
/// unwinding from a panic, behaves like [`AtomicFile::abort`].
#[derive(Debug)]
pub struct AtomicFile {
    writer: Option<BufWriter<File>>,
    dest_path: PathBuf,
    part_path: PathBuf,
    overwrite: bool,
    rm_part_on_exc: bool,
    text_mode: bool,
    caps: OpenCaps,
}

impl AtomicFile {
    pub fn dest_path(&self) -> &Path {
        &self.dest_path
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Flush and sync the part file, close it, then rename it onto the destination.
    ///
    /// On failure the destination is untouched and the part file is removed if configured.
    pub fn commit(mut self) -> Result<(), SaveError> {
        let res = self
            .close_synced()
            .and_then(|()| rename_with(&self.caps, &self.part_path, &self.dest_path, self.overwrite));

        match res {
            Ok(()) => {
                debug!("Committed {:?} to {:?}", self.part_path, self.dest_path);
                Ok(())
            }
            Err(e) => {
                self.remove_part();
                Err(e.into())
            }
        }
    }

    /// Close the part file and remove it if configured; errors are logged, not returned.
    pub fn abort(mut self) {
        self.discard();
    }

    fn close_synced(&mut self) -> Result<(), PathError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = writer
            .into_inner()
            .map_err(io::IntoInnerError::into_error)
            .at("flush part file", &self.part_path)?;
        file.sync_all().at("sync part file", &self.part_path)
    }

    fn discard(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                debug!("Ignoring flush failure on discarded {:?}: {e}", self.part_path);
            }
        }
        self.remove_part();
    }

    fn remove_part(&self) {
        if !self.rm_part_on_exc {
            return;
        }
        match fs::remove_file(&self.part_path) {
            Ok(()) => debug!("Removed part file {:?}", self.part_path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove part file {:?}: {e}", self.part_path),
        }
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("part file is closed"))
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let translate = self.text_mode && NEWLINE != b"\n";
        let writer = self.writer()?;
        if !translate {
            return writer.write(buf);
        }

        let mut lines = buf.split(|&b| b == b'\n');
        if let Some(first) = lines.next() {
            writer.write_all(first)?;
        }
        for line in lines {
            writer.write_all(NEWLINE)?;
            writer.write_all(line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.discard();
        }
    }
}
