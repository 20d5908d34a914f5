/// Rounds the given size up to the heap's fixed 8-byte boundary.
///
/// # Examples
///
/// ```rust
/// use fixheap::align;
///
/// assert_eq!(align!(1), 8);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::ALIGNMENT - 1) & !($crate::ALIGNMENT - 1)
  };
}
