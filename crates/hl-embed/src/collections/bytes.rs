//! Byte buffers: the VM's raw `hl_bytes`/`Bytes` wire representation,
//! distinct from a VM string (see
//! [`crate::value::promote_bytes_to_string`] for the zero-cost coercion
//! between the two).

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::sys;
use crate::vm::VmShared;

/// A zeroed buffer of `size` bytes.
pub fn bytes_new(vm: &VmShared, size: usize) -> Result<Handle> {
    // SAFETY: `hl_alloc_bytes` returns a freshly allocated, zeroed buffer.
    let raw = unsafe { sys::hl_alloc_bytes(size as i32) };
    if raw.is_null() && size != 0 {
        return Err(Error::OutOfMemory);
    }
    Handle::wrap_borrowed(vm, raw as sys::VdynamicPtr).into_rooted()
}

/// Byte buffers carry no length field of their own at the raw-pointer
/// level — callers track the length separately (as the VM side does, in
/// the field that stores the buffer), so this reports the length the
/// caller supplies when wrapping a raw allocation rather than reading it
/// back out of the pointer.
pub fn bytes_length(handle: &Handle, known_len: usize) -> usize {
    if handle.is_null() {
        0
    } else {
        known_len
    }
}

/// Copies out a slice without taking ownership of the underlying VM
/// buffer.
pub fn bytes_read(handle: &Handle, offset: usize, len: usize) -> Result<Vec<u8>> {
    if handle.is_null() {
        return Err(Error::NullValue);
    }
    let base = handle.raw() as *const u8;
    // SAFETY: caller guarantees `offset + len` is within the buffer this
    // handle wraps; the handle's liveness (rooted or borrowed-in-frame)
    // keeps the underlying allocation from moving or being collected for
    // the duration of this call.
    let slice = unsafe { std::slice::from_raw_parts(base.add(offset), len) };
    Ok(slice.to_vec())
}

/// Writes `data` into the buffer at `offset`.
pub fn bytes_write(handle: &Handle, offset: usize, data: &[u8]) -> Result<()> {
    if handle.is_null() {
        return Err(Error::NullValue);
    }
    let base = handle.raw() as *mut u8;
    // SAFETY: see `bytes_read`; the destination range is caller-guaranteed
    // to lie within the buffer, and `data` is a distinct, non-overlapping
    // host-owned source.
    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(offset), data.len()) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fake;
    use crate::{VmConfig, VmInstance};

    fn vm() -> VmShared {
        fake::reset();
        VmInstance::create(VmConfig::new())
            .expect("create always succeeds")
            .shared()
    }

    #[test]
    fn new_buffer_is_zeroed() {
        let vm = vm();
        let handle = bytes_new(&vm, 4).unwrap();
        assert_eq!(bytes_read(&handle, 0, 4).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn write_then_read_round_trips() {
        let vm = vm();
        let handle = bytes_new(&vm, 4).unwrap();
        bytes_write(&handle, 1, &[9, 8]).unwrap();
        assert_eq!(bytes_read(&handle, 0, 4).unwrap(), vec![0, 9, 8, 0]);
    }

    #[test]
    fn null_handle_is_rejected() {
        let vm = vm();
        let null = Handle::null(&vm);
        assert!(matches!(bytes_read(&null, 0, 1), Err(Error::NullValue)));
        assert!(matches!(bytes_write(&null, 0, &[1]), Err(Error::NullValue)));
    }

    #[test]
    fn length_reports_zero_for_null() {
        let vm = vm();
        assert_eq!(bytes_length(&Handle::null(&vm), 10), 0);
    }
}
