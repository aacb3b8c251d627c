//! Narrow platform interface isolating the per-OS bits that call for
//! re-architecture ("Platform `#ifdef` blocks... isolate
//! behind a narrow `Platform` interface").
//!
//! Grounded on `examples/isgasho-rd`'s direct `libc`/`nix` usage, since
//! raw syscalls are a corner the rest of this codebase never touches.

/// Returns the OS page size, used to align Worker Agent buffers
/// together with `direct_io` alignment.
pub fn page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE is always safe to call and
    // returns a small positive constant on every supported platform.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        4096
    }
}

/// Alignment required for `direct_io` buffers and offsets: the larger
/// of the page size and the device's configured alignment.
pub fn alignment(min_alignment: usize) -> usize {
    page_size().max(min_alignment.max(1))
}

/// A heap buffer whose base address is aligned to a power-of-two
/// boundary, for `direct_io` transfers where the kernel rejects
/// misaligned buffers outright.
pub struct AlignedBuffer {
    ptr: std::ptr::NonNull<u8>,
    len: usize,
    layout: std::alloc::Layout,
}

// SAFETY: `AlignedBuffer` owns its allocation exclusively; no aliasing
// pointers escape it.
unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
    fn new(len: usize, align: usize) -> Self {
        let layout = std::alloc::Layout::from_size_align(len, align).expect("invalid buffer layout");
        // SAFETY: layout has non-zero size whenever `len > 0`; a
        // zero-length allocation is handled by `Layout::dangling`-style
        // zero-size-type rules, which `alloc_zeroed` honors by
        // returning a dangling-but-valid pointer.
        let ptr = if len == 0 {
            std::ptr::NonNull::dangling()
        } else {
            let raw = unsafe { std::alloc::alloc_zeroed(layout) };
            std::ptr::NonNull::new(raw).unwrap_or_else(|| std::alloc::handle_alloc_error(layout))
        };
        AlignedBuffer { ptr, len, layout }
    }
}

impl std::ops::Deref for AlignedBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl std::ops::DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if self.len != 0 {
            // SAFETY: `ptr`/`layout` are exactly what `alloc_zeroed` returned.
            unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}

/// Allocate a `len`-byte buffer aligned to `align` bytes, zero-filled.
pub fn aligned_buffer(len: usize, align: usize) -> AlignedBuffer {
    AlignedBuffer::new(len, align)
}

/// Extra `open(2)` flags beyond read/write/create, e.g. `O_DIRECT`.
/// Returns 0 when no extra flags apply (always true off Linux).
#[cfg(unix)]
pub fn extra_open_flags(direct_io: bool) -> libc::c_int {
    #[cfg(target_os = "linux")]
    {
        if direct_io {
            return libc::O_DIRECT;
        }
    }
    let _ = direct_io;
    0
}
