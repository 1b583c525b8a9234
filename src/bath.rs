//! Path manipulation

use std::{
    borrow::Cow,
    env, io,
    path::{Component, Path, PathBuf},
};

/// Get the (lossy) basename of a path
/// None if path terminates in ..
pub fn basename(path: &Path) -> Option<Cow<'_, str>> {
    path.file_name().map(|name| name.to_string_lossy())
}

/// Split a file name around its last '.'
/// Leading dots belong to the stem, so hidden files have no extension.
pub fn split_ext(p: &str) -> [&str; 2] {
    let leading = p.len() - p.trim_start_matches('.').len();
    match p[leading..].rfind('.') {
        None => [p, ""],
        Some(idx) => [&p[..leading + idx], &p[leading + idx + 1..]],
    }
}

/// Resolve `path` against the current directory and normalize it.
pub fn absolute(path: impl AsRef<Path>) -> io::Result<PathBuf> {
    let path = path.as_ref();
    if path.is_absolute() {
        Ok(path.normalize())
    } else {
        Ok(path.abs(env::current_dir()?))
    }
}

/// Whether `name` is a single, plain path component (no separators, not `.` or `..`)
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(c)), None) if c == name
    )
}

#[easy_ext::ext(PathExt)]
pub impl<T: AsRef<Path>> T {
    /// Prepend base to current path then normalize.
    fn abs(&self, base: impl AsRef<Path>) -> PathBuf {
        let path = self.as_ref();
        let base = base.as_ref();

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
        .normalize()
    }

    /// Sibling path with the same parent and a different file name
    fn sibling(&self, file_name: &str) -> PathBuf {
        let path = self.as_ref();
        match path.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        }
    }

    /// clean path logically (so that all components are [`Component::Normal`])
    fn normalize(&self) -> PathBuf {
        let path = self.as_ref();
        let mut components = path.components().peekable();
        // keep the prefix
        let mut ret = if let Some(c @ Component::Prefix(..)) = components.peek().cloned() {
            components.next();
            PathBuf::from(c.as_os_str())
        } else {
            PathBuf::new()
        };

        for component in components {
            match component {
                Component::Prefix(..) => unreachable!(),
                Component::RootDir => {
                    ret.push(component.as_os_str());
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    ret.pop();
                }
                Component::Normal(c) => {
                    ret.push(c);
                }
            }
        }
        ret
    }
}
