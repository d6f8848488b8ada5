//! Per-port-type shared-memory buffer arena (spec.md §4.1).
//!
//! On first use a contiguous shared region of `nports x one_buffer_size`
//! is subdivided in address order into fixed-size buffers, each one
//! enqueued on the type's free-list. Output ports draw a buffer from the
//! free-list; input ports never own one — they alias their source's
//! buffer by offset (`crate::port`).

use parking_lot::Mutex;

use patchbay_ipc::shm::ShmRegion;

use crate::ids::PortTypeId;

/// A single fixed-size buffer's location within a type's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
}

/// Optional per-type mixdown: combines N connected sources into one
/// destination buffer in place. `None` means the type allows at most one
/// connection per input (spec.md invariant).
pub type MixdownFn = fn(dest: &mut [u8], sources: &[&[u8]]);

struct FreeList {
    region: ShmRegion,
    free: Vec<BufferInfo>,
    buffer_size: usize,
    /// The very first buffer ever carved from the very first port type is
    /// pulled out here once and never returned (spec.md §4.1: "silent
    /// buffer"). `None` for every type after the first.
    silent: Option<BufferInfo>,
}

pub struct PortType {
    pub type_id: PortTypeId,
    pub name: String,
    pub mixdown: Option<MixdownFn>,
    free_list: Mutex<FreeList>,
}

impl PortType {
    /// Build a type with no region yet; the region is materialized lazily
    /// by the first `grow_for` call, matching "on first use" in §4.1.
    pub fn new(type_id: PortTypeId, name: impl Into<String>, mixdown: Option<MixdownFn>) -> Self {
        Self {
            type_id,
            name: name.into(),
            mixdown,
            free_list: Mutex::new(FreeList {
                region: ShmRegion::create(&Self::shm_name(type_id), 0)
                    .expect("initial zero-length shm region"),
                free: Vec::new(),
                buffer_size: 0,
                silent: None,
            }),
        }
    }

    pub fn shm_name(type_id: PortTypeId) -> String {
        format!("/patchbay-porttype-{}", type_id.0)
    }

    pub fn region_name(&self) -> String {
        self.free_list.lock().region.name().to_string()
    }

    pub fn region_size(&self) -> usize {
        self.free_list.lock().region.len()
    }

    pub fn free_len(&self) -> usize {
        self.free_list.lock().free.len()
    }

    /// Take a buffer from the free list for a newly registered output
    /// port. `None` if the list is empty (spec.md §4.2: registration
    /// fails when buffer assignment fails).
    pub fn take_buffer(&self) -> Option<BufferInfo> {
        self.free_list.lock().free.pop()
    }

    pub fn return_buffer(&self, info: BufferInfo) {
        let mut fl = self.free_list.lock();
        if fl.silent != Some(info) {
            fl.free.push(info);
        }
    }

    /// The process-wide silent buffer, if this type produced it (only the
    /// first type ever does).
    pub fn silent_buffer(&self) -> Option<BufferInfo> {
        self.free_list.lock().silent
    }

    /// Ensure the region holds at least `capacity` buffers of
    /// `buffer_size_bytes` each, resizing and rebuilding the free-list
    /// under the free-list mutex if either has changed (spec.md §4.1:
    /// "resize in place and rebuild the free-list atomically").
    ///
    /// `extract_silent` is true exactly once, process-wide, for the very
    /// first port type's very first grow.
    pub fn grow_for(
        &self,
        capacity: usize,
        buffer_size_bytes: usize,
        extract_silent: bool,
    ) -> patchbay_ipc::error::Result<()> {
        let mut fl = self.free_list.lock();
        let needed = capacity * buffer_size_bytes;
        if fl.region.len() < needed || fl.buffer_size != buffer_size_bytes {
            // A type that already owns the silent buffer keeps owning it
            // across a resize — only the very first `grow_for` call for a
            // type that has never had one can newly claim it.
            let keep_silent = extract_silent || fl.silent.is_some();
            fl.region.resize(needed)?;
            fl.buffer_size = buffer_size_bytes;
            fl.free.clear();
            fl.silent = None;

            let mut offset = 0usize;
            if keep_silent && capacity > 0 {
                fl.silent = Some(BufferInfo { offset });
                unsafe {
                    fl.region.as_mut_slice()[offset..offset + buffer_size_bytes].fill(0);
                }
                offset += buffer_size_bytes;
            }
            while offset + buffer_size_bytes <= needed {
                fl.free.push(BufferInfo { offset });
                offset += buffer_size_bytes;
            }
        }
        Ok(())
    }

    /// Zero the silent buffer. Invariant: it is all zeros at every cycle
    /// boundary (spec.md §8) — callers re-zero defensively since nothing
    /// else should ever write to it, but a misbehaving internal client
    /// sharing the region could.
    pub fn rezero_silent(&self) {
        let mut fl = self.free_list.lock();
        if let Some(silent) = fl.silent {
            let size = fl.buffer_size;
            unsafe {
                fl.region.as_mut_slice()[silent.offset..silent.offset + size].fill(0);
            }
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.free_list.lock().buffer_size
    }

    /// Read-only view of one buffer's bytes.
    ///
    /// # Safety
    /// The caller must not race an unsynchronized writer of the same
    /// buffer; the graph mutex held by callers in `crate::engine` provides
    /// that discipline for in-use buffers.
    pub unsafe fn buffer_bytes(&self, info: BufferInfo) -> Vec<u8> {
        let fl = self.free_list.lock();
        let size = fl.buffer_size;
        fl.region.as_slice()[info.offset..info.offset + size].to_vec()
    }

    /// # Safety
    /// Same discipline as [`Self::buffer_bytes`].
    pub unsafe fn write_buffer(&self, info: BufferInfo, data: &[u8]) {
        let mut fl = self.free_list.lock();
        let size = fl.buffer_size;
        let n = data.len().min(size);
        fl.region.as_mut_slice()[info.offset..info.offset + n].copy_from_slice(&data[..n]);
    }
}

impl Drop for PortType {
    fn drop(&mut self) {
        let _ = ShmRegion::destroy(&Self::shm_name(self.type_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_type_extracts_silent_buffer_once() {
        let pt = PortType::new(PortTypeId(0), "audio", None);
        pt.grow_for(4, 16, true).unwrap();
        assert!(pt.silent_buffer().is_some());
        // silent buffer is never handed out by take_buffer
        assert_eq!(pt.free_len(), 3);
    }

    #[test]
    fn take_and_return_preserves_free_list_length() {
        let pt = PortType::new(PortTypeId(1), "midi", None);
        pt.grow_for(4, 16, false).unwrap();
        let before = pt.free_len();
        let buf = pt.take_buffer().unwrap();
        assert_eq!(pt.free_len(), before - 1);
        pt.return_buffer(buf);
        assert_eq!(pt.free_len(), before);
    }

    #[test]
    fn empty_free_list_fails_closed() {
        let pt = PortType::new(PortTypeId(2), "empty", None);
        pt.grow_for(1, 16, false).unwrap();
        pt.take_buffer().unwrap();
        assert!(pt.take_buffer().is_none());
    }
}
