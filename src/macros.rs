/// Helper macro for locking items, yielding `Result<MutexGuard<_>>`
///
/// ```rust, ignore
///  let mut heap = lock!(self.user_strings)?;
///  heap.add("text");
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().map_err(|_| crate::Error::LockError)
    };
}
