//! Tick arithmetic.

use crate::kernel::Tick;

/// Ticks covering `nanos` at `frequency` Hz, rounded up and saturated.
pub fn nanos_to_ticks(nanos: u64, frequency: u32) -> Tick {
    let ticks = (nanos as u128 * frequency as u128 + 999_999_999) / 1_000_000_000;
    Tick::try_from(ticks).unwrap_or(Tick::MAX)
}

/// Nanoseconds spanned by `ticks` at `frequency` Hz.
pub fn ticks_to_nanos(ticks: Tick, frequency: u32) -> u64 {
    if frequency == 0 {
        return 0;
    }
    (ticks as u64 * 1_000_000_000) / frequency as u64
}

/// Whether tick `a` lies strictly ahead of tick `b` on the wrapping counter.
pub const fn is_after(a: Tick, b: Tick) -> bool {
    let distance = a.wrapping_sub(b);
    distance != 0 && distance <= Tick::MAX / 2
}
