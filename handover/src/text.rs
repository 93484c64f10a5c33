//! Bounded copies of bootloader supplied strings.

use heapless::String;

/// Copy `bytes` into a string of capacity `N`.
///
/// Only the leading valid UTF-8 part is kept, and that part is cut at the
/// last character boundary that fits. Truncation is silent.
pub fn bounded<const N: usize>(bytes: &[u8]) -> String<N> {
    let text = match core::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => core::str::from_utf8(&bytes[..err.valid_up_to()]).unwrap_or_default(),
    };

    let mut end = text.len().min(N);
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    let mut out = String::new();
    // fits, `end <= N`
    let _ = out.push_str(&text[..end]);
    out
}
