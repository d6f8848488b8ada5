//! ABI-stable interface for dynamically loaded internal clients.
//!
//! Mirrors the original engine's `dlopen`/`dlsym("jack_initialize")`/
//! `dlsym("jack_finish")` internal-client loading (spec.md §4.6, §9): a
//! client implemented as a shared object exports one symbol,
//! `PATCHBAY_CLIENT`, of type [`ClientDeclaration`], which the host resolves
//! and calls through instead of holding raw function pointers across the
//! dlopen boundary — those two function pointers are the entire ABI
//! surface, same as the plugin interface this is grounded on.

use std::ffi::c_void;
use std::os::raw::c_char;

/// Current ABI version. A client .so built against a different version is
/// refused at load time.
pub const PATCHBAY_ABI_VERSION: u32 = 1;

/// `jack_initialize`-equivalent: receives the init string from the
/// connect-request's `object_data` field, returns zero on success.
pub type ClientInitializeFn = extern "C" fn(init_string: *const c_char) -> i32;

/// `jack_finish`-equivalent: called once, during client removal, before
/// the library is `dlclose`d.
pub type ClientFinishFn = extern "C" fn(arg: *mut c_void);

/// `process`-equivalent: called once per cycle for an active client.
/// Non-zero return stops cycle processing (spec.md §4.4).
pub type ClientProcessFn = extern "C" fn(nframes: u32, arg: *mut c_void) -> i32;

/// Declaration a client shared object must export under the symbol name
/// `PATCHBAY_CLIENT`.
#[repr(C)]
pub struct ClientDeclaration {
    pub abi_version: u32,
    pub initialize: ClientInitializeFn,
    pub finish: ClientFinishFn,
    pub process: ClientProcessFn,
}

// Safety: every field is a version number or a plain `extern "C"` function
// pointer — neither carries thread affinity.
unsafe impl Send for ClientDeclaration {}
unsafe impl Sync for ClientDeclaration {}

/// Export a client implementation for dynamic loading.
///
/// Generates the `PATCHBAY_CLIENT` symbol the host's loader looks for.
///
/// ```ignore
/// use patchbay_plugin_abi::export_patchbay_client;
///
/// extern "C" fn init(_init_string: *const std::os::raw::c_char) -> i32 { 0 }
/// extern "C" fn finish(_arg: *mut std::ffi::c_void) {}
/// extern "C" fn process(nframes: u32, arg: *mut std::ffi::c_void) -> i32 {
///     // ... fill output buffers reachable via `arg` ...
///     0
/// }
///
/// export_patchbay_client!(init, finish, process);
/// ```
#[macro_export]
macro_rules! export_patchbay_client {
    ($init:expr, $finish:expr, $process:expr) => {
        #[no_mangle]
        pub static PATCHBAY_CLIENT: $crate::ClientDeclaration = $crate::ClientDeclaration {
            abi_version: $crate::PATCHBAY_ABI_VERSION,
            initialize: $init,
            finish: $finish,
            process: $process,
        };
    };
}
