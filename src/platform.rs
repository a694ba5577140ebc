use embedded_hal::digital::PinState;

/// Monotonic microsecond counter supplied by the platform.
///
/// The counter is expected to wrap at `u32::MAX` (Arduino `micros()`
/// semantics); all timestamp arithmetic in this crate uses wrapping
/// subtraction, so a wrap mid-measurement is handled transparently.
pub trait Clock {
    fn now_micros(&self) -> u32;
}

/// A digital output that can be written synchronously from interrupt
/// context.
///
/// The mode-select line must be switched from inside the shared-channel
/// edge handler, where ordinary HAL output latency would skew the pulse
/// timing being adjusted. Implementations should use the fastest register
/// write path the target offers; a test double can be a plain memory cell.
///
/// This is deliberately narrower than [`embedded_hal::digital::OutputPin`]:
/// it takes `&self`, because the edge handlers only ever hold a shared
/// reference to the capture core.
pub trait FastDigitalLine {
    fn write(&self, state: PinState);
}

impl<T: Clock> Clock for &T {
    fn now_micros(&self) -> u32 {
        (*self).now_micros()
    }
}

impl<T: FastDigitalLine> FastDigitalLine for &T {
    fn write(&self, state: PinState) {
        (*self).write(state)
    }
}
