// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::CString,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    sync::Arc,
};

use libloading::Library;
use parking_lot::RwLock;

use crate::{sys, Engine, EngineContext, EngineSignaller, Error, Result, Signal};

/// Entry points resolved from a dynamically loaded liblokinet.
struct Symbols {
    ensure_config: sys::llarp_ensure_config,
    main_init: sys::llarp_main_init,
    main_setup: sys::llarp_main_setup,
    main_run: sys::llarp_main_run,
    main_signal: sys::llarp_main_signal,
    main_free: sys::llarp_main_free,
    // Keeps the function pointers above valid.
    _library: Library,
}

/// The native Lokinet engine.
#[derive(Clone)]
pub struct LibLokinet {
    symbols: Arc<Symbols>,
}

impl std::fmt::Debug for LibLokinet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibLokinet").finish_non_exhaustive()
    }
}

impl LibLokinet {
    /// Platform specific file name of the engine library, e.g. `liblokinet.so`.
    pub fn default_library_name() -> PathBuf {
        PathBuf::from(libloading::library_filename("lokinet"))
    }

    /// Loads the engine from the default library search path.
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_library_name())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading engine library from {}", path.display());

        // SAFETY: liblokinet has no library constructors with preconditions.
        let library = unsafe { Library::new(path) }.map_err(|source| Error::LoadLibrary {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: the symbol types match the declarations in llarp.h.
        let symbols = unsafe {
            Symbols {
                ensure_config: symbol(&library, "llarp_ensure_config")?,
                main_init: symbol(&library, "llarp_main_init")?,
                main_setup: symbol(&library, "llarp_main_setup")?,
                main_run: symbol(&library, "llarp_main_run")?,
                main_signal: symbol(&library, "llarp_main_signal")?,
                main_free: symbol(&library, "llarp_main_free")?,
                _library: library,
            }
        };

        Ok(Self {
            symbols: Arc::new(symbols),
        })
    }
}

unsafe fn symbol<T: Copy>(library: &Library, name: &'static str) -> Result<T> {
    let mut raw_name = name.as_bytes().to_vec();
    raw_name.push(0);
    library
        .get::<T>(&raw_name)
        .map(|symbol| *symbol)
        .map_err(|source| Error::MissingSymbol {
            symbol: name,
            source,
        })
}

pub(crate) fn path_to_cstring(path: &Path) -> Result<CString> {
    let path_str = path
        .to_str()
        .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?;
    CString::new(path_str).map_err(|_| Error::PathContainsNulByte(path.to_path_buf()))
}

impl Engine for LibLokinet {
    type Context = LibLokinetContext;

    fn ensure_config(
        &self,
        config_path: &Path,
        base_dir: Option<&Path>,
        overwrite: bool,
        as_router: bool,
    ) -> Result<()> {
        let fname = path_to_cstring(config_path)?;
        let basedir = base_dir.map(path_to_cstring).transpose()?;
        let basedir_ptr = basedir.as_ref().map(|x| x.as_ptr()).unwrap_or(ptr::null());

        // SAFETY: both strings outlive the call, basedir may be null.
        let ok = unsafe {
            (self.symbols.ensure_config)(fname.as_ptr(), basedir_ptr, overwrite, as_router)
        };
        if ok {
            Ok(())
        } else {
            Err(Error::EnsureConfig(config_path.to_path_buf()))
        }
    }

    fn main_init(&self, config_path: &Path, multithreaded: bool) -> Result<Self::Context> {
        let fname = path_to_cstring(config_path)?;

        // SAFETY: fname outlives the call.
        let raw = unsafe { (self.symbols.main_init)(fname.as_ptr(), multithreaded) };
        let raw = NonNull::new(raw).ok_or_else(|| Error::MainInit(config_path.to_path_buf()))?;

        Ok(LibLokinetContext {
            inner: Arc::new(ContextInner {
                raw: RwLock::new(Some(RawMain(raw))),
                symbols: self.symbols.clone(),
            }),
        })
    }
}

#[derive(Clone, Copy)]
struct RawMain(NonNull<sys::llarp_main>);

// SAFETY: llarp_main is only handed back to liblokinet, which synchronizes internally. Access to
// the pointer after free is prevented by the lock in ContextInner.
unsafe impl Send for RawMain {}
unsafe impl Sync for RawMain {}

struct ContextInner {
    raw: RwLock<Option<RawMain>>,
    symbols: Arc<Symbols>,
}

impl ContextInner {
    fn current(&self) -> Option<RawMain> {
        *self.raw.read()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.get_mut().take() {
            tracing::debug!("Freeing engine context");
            // SAFETY: the pointer came from llarp_main_init and is freed exactly once.
            unsafe { (self.symbols.main_free)(raw.0.as_ptr()) };
        }
    }
}

/// Engine context created by [`LibLokinet::main_init`]. Signallers only hold weak references, so
/// dropping the context frees it.
pub struct LibLokinetContext {
    inner: Arc<ContextInner>,
}

impl EngineContext for LibLokinetContext {
    type Signaller = ContextSignaller;

    fn setup(&mut self) -> Result<()> {
        let Some(raw) = self.inner.current() else {
            return Err(Error::Setup(-1));
        };
        // SAFETY: the context is alive while we hold &mut self.
        match unsafe { (self.inner.symbols.main_setup)(raw.0.as_ptr()) } {
            0 => Ok(()),
            code => Err(Error::Setup(code)),
        }
    }

    fn run(&mut self) -> Result<()> {
        let Some(raw) = self.inner.current() else {
            return Err(Error::Run(-1));
        };
        // SAFETY: the context is alive while we hold &mut self, signallers only take the read lock.
        match unsafe { (self.inner.symbols.main_run)(raw.0.as_ptr()) } {
            0 => Ok(()),
            code => Err(Error::Run(code)),
        }
    }

    fn signaller(&self) -> Self::Signaller {
        ContextSignaller {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Delivers signals to a [`LibLokinetContext`] from any thread.
#[derive(Clone)]
pub struct ContextSignaller {
    inner: std::sync::Weak<ContextInner>,
}

impl EngineSignaller for ContextSignaller {
    fn signal(&self, signal: Signal) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let guard = inner.raw.read();
        if let Some(raw) = *guard {
            tracing::debug!("Forwarding {} to engine", signal);
            // SAFETY: the read lock keeps the context from being freed during the call.
            unsafe { (inner.symbols.main_signal)(raw.0.as_ptr(), signal.as_raw()) };
        }
    }
}
