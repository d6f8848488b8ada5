//! Dynamic loading of internal clients via the `PATCHBAY_CLIENT` ABI
//! (spec.md §4.6, §9; `patchbay_plugin_abi`).

use std::ffi::{c_void, CString};

use libloading::{Library, Symbol};
use patchbay_plugin_abi::{ClientDeclaration, PATCHBAY_ABI_VERSION};

use crate::client::Dispatch;
use crate::error::EngineError;

/// `dlopen` + `dlsym("PATCHBAY_CLIENT")` + `initialize(init_string)`.
/// On success returns the `Dispatch::Internal` to register the client
/// with and the still-open library (the caller attaches it to the
/// `Client` via [`crate::client::Client::attach_plugin`] so it outlives
/// the function pointers and is `dlclose`d on removal).
pub fn load(
    object_path: &str,
    init_string: &str,
) -> Result<(Dispatch, Library, patchbay_plugin_abi::ClientFinishFn), EngineError> {
    let library = unsafe { Library::new(object_path) }
        .map_err(|e| EngineError::PluginLoad(object_path.to_string(), e))?;

    let declaration: ClientDeclaration = unsafe {
        let symbol: Symbol<*const ClientDeclaration> = library
            .get(b"PATCHBAY_CLIENT\0")
            .map_err(|e| EngineError::PluginLoad(object_path.to_string(), e))?;
        std::ptr::read(*symbol)
    };

    if declaration.abi_version != PATCHBAY_ABI_VERSION {
        return Err(EngineError::PluginInit(
            object_path.to_string(),
            declaration.abi_version as i32,
        ));
    }

    let cstr = CString::new(init_string).unwrap_or_default();
    let rc = (declaration.initialize)(cstr.as_ptr());
    if rc != 0 {
        return Err(EngineError::PluginInit(object_path.to_string(), rc));
    }

    let dispatch = Dispatch::Internal {
        process: declaration.process,
        arg: std::ptr::null_mut::<c_void>(),
        event_callback: None,
    };
    Ok((dispatch, library, declaration.finish))
}

/// Bind the loaded library's `finish` symbol onto `client`, so that
/// removal calls it before `dlclose` (spec.md §4.6).
pub fn attach(client: &mut crate::client::Client, library: Library, finish: patchbay_plugin_abi::ClientFinishFn) {
    client.attach_plugin(library, finish, std::ptr::null_mut());
}
