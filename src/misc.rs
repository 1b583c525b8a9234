use std::{
    borrow::Cow,
    cell::OnceCell,
    fmt, io,
    path::{Path, PathBuf},
};

// ------------ IO ERRORS -------------

/// An [`io::Error`] tagged with what was being done and to which path
#[derive(Debug, thiserror::Error)]
#[error("Failed to {action} {path:?}: {source}")]
pub struct PathError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl PathError {
    pub fn new(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

impl From<PathError> for io::Error {
    fn from(e: PathError) -> Self {
        io::Error::new(e.kind(), e)
    }
}

#[easy_ext::ext(IoResultExt)]
pub impl<T> io::Result<T> {
    /// Convert Err(e) to a [`PathError`] reading 'Failed to {action} {path}: {e}'
    fn at(self, action: &'static str, path: impl AsRef<Path>) -> Result<T, PathError> {
        self.map_err(|e| PathError::new(action, path.as_ref(), e))
    }
}

// ------------ DEFERRED -------------

/// A value computed on first use.
///
/// By default the result is cached; [`DeferredValue::uncached`] recomputes on every access,
/// which suits values that change over time (timestamps, counters) but are expensive
/// enough that they should only be produced when actually rendered.
///
/// # Example
/// ```rust
/// use gap_bolts::misc::DeferredValue;
///
/// let answer = DeferredValue::new(|| 6 * 7);
/// assert_eq!(format!("answer={answer}"), "answer=42");
/// ```
pub struct DeferredValue<T, F = fn() -> T> {
    func: F,
    cache: bool,
    value: OnceCell<T>,
}

impl<T, F: Fn() -> T> DeferredValue<T, F> {
    pub fn new(func: F) -> Self {
        Self {
            func,
            cache: true,
            value: OnceCell::new(),
        }
    }

    pub fn uncached(func: F) -> Self {
        Self {
            func,
            cache: false,
            value: OnceCell::new(),
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cache
    }

    /// Borrowed from the cache when caching, freshly computed otherwise
    pub fn get_value(&self) -> Cow<'_, T>
    where
        T: Clone,
    {
        if self.cache {
            Cow::Borrowed(self.value.get_or_init(&self.func))
        } else {
            Cow::Owned((self.func)())
        }
    }

    fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if self.cache {
            f(self.value.get_or_init(&self.func))
        } else {
            f(&(self.func)())
        }
    }
}

impl<T: fmt::Display, F: Fn() -> T> fmt::Display for DeferredValue<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_value(|v| v.fmt(f))
    }
}

impl<T: fmt::Debug, F: Fn() -> T> fmt::Debug for DeferredValue<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_value(|v| f.debug_tuple("DeferredValue").field(v).finish())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn path_error_keeps_kind() {
        let err = std::fs::metadata("/definitely/not/here")
            .at("stat", "/definitely/not/here")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().starts_with("Failed to stat"));

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn deferred_caches_by_default() {
        let calls = Cell::new(0);
        let value = DeferredValue::new(|| {
            calls.set(calls.get() + 1);
            calls.get() * 10
        });
        assert_eq!(calls.get(), 0);
        assert_eq!(*value.get_value(), 10);
        assert_eq!(value.to_string(), "10");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn deferred_uncached_recomputes() {
        let calls = Cell::new(0);
        let value = DeferredValue::uncached(|| {
            calls.set(calls.get() + 1);
            calls.get()
        });
        assert_eq!(*value.get_value(), 1);
        assert_eq!(format!("{value}"), "2");
        assert_eq!(format!("{value:?}"), "DeferredValue(3)");
        assert!(!value.is_cached());
    }
}
