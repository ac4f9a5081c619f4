//! Shared-library handles for built native artifacts

use std::ffi::CString;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Native artifact could not be opened or bound
#[derive(Debug, Error)]
pub enum LoadError {
    /// The dynamic loader refused the file
    #[error("Cannot open native artifact {}: {reason}", .path.display())]
    NotFound { path: PathBuf, reason: String },

    /// A required export is missing
    #[error("Native artifact {} does not export `{symbol}`: {reason}", .path.display())]
    SymbolNotFound {
        symbol: String,
        path: PathBuf,
        reason: String,
    },

    /// Library was generated for a different number of features
    #[error("Native artifact {library} reads {found} features, expected {expected}")]
    FeatureCountMismatch {
        library: String,
        expected: usize,
        found: usize,
    },

    /// Path or symbol name holds an interior NUL byte
    #[error("Name contains a NUL byte: {0:?}")]
    InvalidName(String),
}

/// An open shared library, closed on drop
pub struct Library {
    raw: sys::Handle,
    path: PathBuf,
}

impl Library {
    /// Open the library at `path`, resolving all of its symbols up front.
    ///
    /// The loader caches libraries by path: opening a path that is already
    /// open returns the existing mapping even if the file was replaced, so
    /// a rebuilt artifact needs a path of its own.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let raw = sys::open(path).map_err(|reason| LoadError::NotFound {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(Self {
            raw,
            path: path.to_path_buf(),
        })
    }

    /// Address of the export `symbol`, as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the export's C signature,
    /// and must not be called after this library is dropped.
    pub unsafe fn get<F: Copy>(&self, symbol: &str) -> Result<F, LoadError> {
        debug_assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*mut std::ffi::c_void>()
        );
        let name = CString::new(symbol).map_err(|_| LoadError::InvalidName(symbol.to_string()))?;
        let address = sys::symbol(self.raw, &name).map_err(|reason| LoadError::SymbolNotFound {
            symbol: symbol.to_string(),
            path: self.path.clone(),
            reason,
        })?;
        Ok(std::mem::transmute_copy(&address))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        // SAFETY: `raw` came from a successful open and is closed once.
        unsafe { sys::close(self.raw) }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Library").field(&self.path).finish()
    }
}

// SAFETY: the handle is only read after opening; dlsym and GetProcAddress are
// thread-safe.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

#[cfg(unix)]
mod sys {
    use std::ffi::{c_void, CStr, CString};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    pub type Handle = *mut c_void;

    pub fn open(path: &Path) -> Result<Handle, String> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| "path contains a NUL byte".to_string())?;
        // SAFETY: `c_path` is NUL-terminated and outlives the call.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            Err(dl_error())
        } else {
            Ok(handle)
        }
    }

    pub fn symbol(handle: Handle, name: &CStr) -> Result<*mut c_void, String> {
        // SAFETY: `handle` is open; dlerror is cleared so a stale message is
        // not reported for this lookup.
        unsafe {
            libc::dlerror();
            let address = libc::dlsym(handle, name.as_ptr());
            if address.is_null() {
                Err(dl_error())
            } else {
                Ok(address)
            }
        }
    }

    pub unsafe fn close(handle: Handle) {
        libc::dlclose(handle);
    }

    fn dl_error() -> String {
        // SAFETY: dlerror returns NULL or a NUL-terminated thread-local message.
        unsafe {
            let message = libc::dlerror();
            if message.is_null() {
                "unknown dynamic loader error".to_string()
            } else {
                CStr::from_ptr(message).to_string_lossy().into_owned()
            }
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::ffi::{c_char, c_void, CStr};
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;

    pub type Handle = *mut c_void;

    extern "system" {
        fn LoadLibraryW(filename: *const u16) -> Handle;
        fn GetProcAddress(module: Handle, name: *const c_char) -> *mut c_void;
        fn FreeLibrary(module: Handle) -> i32;
        fn GetLastError() -> u32;
    }

    pub fn open(path: &Path) -> Result<Handle, String> {
        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
        // SAFETY: `wide` is NUL-terminated UTF-16 and outlives the call.
        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };
        if handle.is_null() {
            Err(last_error())
        } else {
            Ok(handle)
        }
    }

    pub fn symbol(handle: Handle, name: &CStr) -> Result<*mut c_void, String> {
        // SAFETY: `handle` is a loaded module and `name` is NUL-terminated.
        let address = unsafe { GetProcAddress(handle, name.as_ptr()) };
        if address.is_null() {
            Err(last_error())
        } else {
            Ok(address)
        }
    }

    pub unsafe fn close(handle: Handle) {
        FreeLibrary(handle);
    }

    fn last_error() -> String {
        // SAFETY: reads the calling thread's last-error value.
        format!("Windows error {}", unsafe { GetLastError() })
    }
}
