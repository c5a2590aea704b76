use std::collections::HashMap;

use xxhash_rust::xxh3::Xxh3DefaultBuilder;

pub type Xxh3HashSet<K> = std::collections::HashSet<K, Xxh3DefaultBuilder>;
pub type Xxh3HashMap<K, V> = HashMap<K, V, Xxh3DefaultBuilder>;

/// `Vec::into_boxed_slice` takes CPU cycles to shrink itself to `.len()`;
/// this skips the shrink when the caller doesn't care about the spare
/// capacity being reclaimed.
#[inline]
#[must_use]
pub fn vec_into_boxed_slice_noshrink<T>(mut v: Vec<T>) -> Box<[T]> {
    let len = v.len();
    let ptr = v.as_mut_ptr();

    core::mem::forget(v);

    unsafe { Box::from_raw(core::ptr::slice_from_raw_parts_mut(ptr, len)) }
}

#[cfg(unix)]
#[must_use]
pub fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
#[must_use]
pub fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

/// Current time in seconds since the epoch, used for snapshot timestamps
/// and lease staleness checks.
#[must_use]
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
