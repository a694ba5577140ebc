/// Fewer edges than this in a window and the reading is discarded.
pub const MIN_WINDOW_PULSES: u32 = 3;

/// At this many edges and above, the window average is used instead of the
/// most recent period.
pub const AVERAGING_THRESHOLD_PULSES: u32 = 10;

/// A completed accumulation window on one channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClosedWindow {
    /// Rising edges counted since the window opened.
    pub pulses: u32,
    /// Microseconds between window open and the closing edge.
    pub elapsed_us: u32,
    /// Microseconds between the two most recent edges.
    pub last_interval_us: u32,
}

/// Converts a closed window into a single pulse width in microseconds.
///
/// `0` is the invalidity sentinel: it is not a physically achievable pulse
/// width and means "no trustworthy measurement in this window".
pub trait WidthEstimator {
    fn estimate(&self, window: ClosedWindow) -> u32;
}

/// The default estimator: a bias-variance ladder on the pulse count.
///
/// On sparse pulses the most recent period is more representative of
/// current conditions than an average that still contains pre-switch
/// samples; on dense pulses averaging suppresses jitter and gains
/// resolution. No IIR smoothing is applied on top.
#[derive(Copy, Clone, Debug, Default)]
pub struct Adaptive;

impl WidthEstimator for Adaptive {
    fn estimate(&self, window: ClosedWindow) -> u32 {
        if window.pulses < MIN_WINDOW_PULSES {
            0
        } else if window.pulses < AVERAGING_THRESHOLD_PULSES {
            window.last_interval_us
        } else {
            window.elapsed_us / window.pulses
        }
    }
}
