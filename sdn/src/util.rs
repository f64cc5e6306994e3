/// Shortcut for increment mod 2^16
///
/// # Examples
///
/// ```
/// let mut seqno = u16::MAX;
/// sdn::util::increment(&mut seqno);
/// assert_eq!(seqno, 0);
/// ```
pub fn increment(x: &mut u16) {
    *x = x.overflowing_add(1).0
}
