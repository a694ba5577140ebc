use core::sync::atomic::{AtomicBool, AtomicU32, Ordering::Relaxed};

use embedded_hal::digital::PinState;

use crate::estimator::{Adaptive, ClosedWindow, WidthEstimator};
use crate::platform::{Clock, FastDigitalLine};

/// Logical measurement mode of the shared (CF1) channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Current,
    Voltage,
}

impl Mode {
    pub fn opposite(self) -> Mode {
        match self {
            Mode::Current => Mode::Voltage,
            Mode::Voltage => Mode::Current,
        }
    }
}

/// Edge accumulation state for one channel.
///
/// All fields are written from interrupt context and read from the
/// foreground, so each is a single atomic word accessed with
/// copy-to-local-then-branch discipline on both sides.
struct ChannelWindow {
    first_edge_us: AtomicU32,
    last_edge_us: AtomicU32,
    pulses: AtomicU32,
}

impl ChannelWindow {
    const fn new() -> Self {
        Self {
            first_edge_us: AtomicU32::new(0),
            last_edge_us: AtomicU32::new(0),
            pulses: AtomicU32::new(0),
        }
    }

    fn restart(&self, now: u32) {
        self.first_edge_us.store(now, Relaxed);
        self.last_edge_us.store(now, Relaxed);
        self.pulses.store(0, Relaxed);
    }
}

/// Lock-free capture core shared between the foreground driver and the two
/// edge interrupt handlers.
///
/// The owning application places this wherever its interrupt registration
/// needs it (typically a `static`) and wires [`EdgeCapture::on_power_edge`]
/// and [`EdgeCapture::on_shared_edge`] to rising-edge interrupts on the CF
/// and CF1 pins. [`crate::Hlw8012Driver`] borrows the core and does
/// everything else.
pub struct EdgeCapture<Sel, Clk, E = Adaptive> {
    power: ChannelWindow,
    shared: ChannelWindow,
    power_width_us: AtomicU32,
    current_width_us: AtomicU32,
    voltage_width_us: AtomicU32,
    energy_pulses: AtomicU32,
    /// Physical level currently driven on the SEL pin.
    sel_level: AtomicBool,
    /// Physical level that selects CURRENT mode (wiring-dependent).
    current_level: AtomicBool,
    interrupts: AtomicBool,
    timeout_us: AtomicU32,
    sel: Sel,
    clock: Clk,
    estimator: E,
}

impl<Sel, Clk> EdgeCapture<Sel, Clk, Adaptive>
where
    Sel: FastDigitalLine,
    Clk: Clock,
{
    pub fn new(sel: Sel, clock: Clk) -> Self {
        Self::with_estimator(sel, clock, Adaptive)
    }
}

impl<Sel, Clk, E> EdgeCapture<Sel, Clk, E>
where
    Sel: FastDigitalLine,
    Clk: Clock,
    E: WidthEstimator,
{
    /// Builds a core with a substitute width estimator.
    pub fn with_estimator(sel: Sel, clock: Clk, estimator: E) -> Self {
        Self {
            power: ChannelWindow::new(),
            shared: ChannelWindow::new(),
            power_width_us: AtomicU32::new(0),
            current_width_us: AtomicU32::new(0),
            voltage_width_us: AtomicU32::new(0),
            energy_pulses: AtomicU32::new(0),
            sel_level: AtomicBool::new(false),
            current_level: AtomicBool::new(false),
            interrupts: AtomicBool::new(false),
            timeout_us: AtomicU32::new(0),
            sel,
            clock,
            estimator,
        }
    }

    pub(crate) fn configure(
        &self,
        current_mode_level: PinState,
        use_interrupts: bool,
        pulse_timeout_us: u32,
    ) {
        let current_level = current_mode_level == PinState::High;
        self.current_level.store(current_level, Relaxed);
        self.interrupts.store(use_interrupts, Relaxed);
        self.timeout_us.store(pulse_timeout_us, Relaxed);
        // Start in CURRENT mode, at whatever physical level the wiring
        // assigns to it.
        self.drive_sel(current_level);
    }

    /// Rising-edge handler for the power (CF) channel.
    ///
    /// Safe to call from interrupt context; touches only atomics and the
    /// microsecond clock.
    pub fn on_power_edge(&self) {
        let now = self.clock.now_micros();
        // Snapshot the previous edge before overwriting it, so a preempting
        // read sees either the old or the new value, never a torn pair.
        let last = self.power.last_edge_us.swap(now, Relaxed);
        let since_first = now.wrapping_sub(self.power.first_edge_us.load(Relaxed)) as i32;
        self.energy_pulses.fetch_add(1, Relaxed);

        // The power channel has no alternating-mode pressure, so it gets a
        // window twice as long as the shared channel's.
        let window_us = 2 * self.timeout_us.load(Relaxed);
        if since_first > window_us as i32 {
            let first = self.power.first_edge_us.swap(now, Relaxed);
            let count = self.power.pulses.swap(0, Relaxed);
            self.power_width_us
                .store(self.close_window(now, first, last, count, since_first), Relaxed);
        } else {
            self.power.pulses.fetch_add(1, Relaxed);
        }
    }

    /// Rising-edge handler for the shared (CF1) channel.
    ///
    /// When the averaging window elapses this also performs the automatic
    /// mode toggle, writing the SEL pin directly from interrupt context.
    pub fn on_shared_edge(&self) {
        let now = self.clock.now_micros();
        let last = self.shared.last_edge_us.swap(now, Relaxed);
        let since_first = now.wrapping_sub(self.shared.first_edge_us.load(Relaxed)) as i32;

        if since_first > self.timeout_us.load(Relaxed) as i32 {
            let first = self.shared.first_edge_us.swap(now, Relaxed);
            let count = self.shared.pulses.swap(0, Relaxed);

            // Flip modes for the next window; the width just gathered
            // belongs to the mode that was active while it accumulated.
            let level = self.sel_level.load(Relaxed);
            self.drive_sel(!level);

            let width = self.close_window(now, first, last, count, since_first);
            if level == self.current_level.load(Relaxed) {
                self.current_width_us.store(width, Relaxed);
            } else {
                self.voltage_width_us.store(width, Relaxed);
            }
        } else {
            self.shared.pulses.fetch_add(1, Relaxed);
        }
    }

    fn close_window(&self, now: u32, first: u32, last: u32, count: u32, elapsed: i32) -> u32 {
        // A window containing a single edge has no interval to measure.
        if last == first {
            return 0;
        }
        self.estimator.estimate(ClosedWindow {
            pulses: count,
            elapsed_us: elapsed as u32,
            last_interval_us: now.wrapping_sub(last),
        })
    }

    /// Lazy staleness check for the power channel, run on read.
    pub(crate) fn check_power_signal(&self) {
        let now = self.clock.now_micros();
        let since_last = now.wrapping_sub(self.power.last_edge_us.load(Relaxed)) as i32;
        if since_last > (2 * self.timeout_us.load(Relaxed)) as i32 {
            self.power.restart(now);
            self.power_width_us.store(0, Relaxed);
        }
    }

    /// Lazy staleness check for the shared channel, run on read.
    ///
    /// A silent channel invalidates whichever width the current mode was
    /// feeding and moves on to the other mode, so a dead signal in one mode
    /// cannot starve the other.
    pub(crate) fn check_shared_signal(&self) {
        let now = self.clock.now_micros();
        let since_last = now.wrapping_sub(self.shared.last_edge_us.load(Relaxed)) as i32;
        if since_last > self.timeout_us.load(Relaxed) as i32 {
            self.shared.restart(now);
            let level = self.sel_level.load(Relaxed);
            if level == self.current_level.load(Relaxed) {
                self.current_width_us.store(0, Relaxed);
            } else {
                self.voltage_width_us.store(0, Relaxed);
            }
            self.drive_sel(!level);
        }
    }

    /// Selects the shared channel's measurement mode.
    pub fn set_mode(&self, mode: Mode) {
        let current_level = self.current_level.load(Relaxed);
        let level = match mode {
            Mode::Current => current_level,
            Mode::Voltage => !current_level,
        };
        self.drive_sel(level);
        // Restarting the window keeps the staleness check from firing
        // immediately against edges that belonged to the previous mode.
        if self.interrupts.load(Relaxed) {
            self.shared.restart(self.clock.now_micros());
        }
    }

    pub fn mode(&self) -> Mode {
        if self.sel_level.load(Relaxed) == self.current_level.load(Relaxed) {
            Mode::Current
        } else {
            Mode::Voltage
        }
    }

    /// Flips the mode and returns the one now in effect.
    pub fn toggle_mode(&self) -> Mode {
        let mode = self.mode().opposite();
        self.set_mode(mode);
        mode
    }

    /// Every select-line transition funnels through here, whether triggered
    /// by an automatic window closure, a staleness check or an explicit
    /// mode request.
    fn drive_sel(&self, level: bool) {
        self.sel.write(if level { PinState::High } else { PinState::Low });
        self.sel_level.store(level, Relaxed);
    }

    pub(crate) fn power_width_us(&self) -> u32 {
        self.power_width_us.load(Relaxed)
    }

    pub(crate) fn current_width_us(&self) -> u32 {
        self.current_width_us.load(Relaxed)
    }

    pub(crate) fn voltage_width_us(&self) -> u32 {
        self.voltage_width_us.load(Relaxed)
    }

    pub(crate) fn set_power_width_us(&self, width: u32) {
        self.power_width_us.store(width, Relaxed);
    }

    pub(crate) fn set_current_width_us(&self, width: u32) {
        self.current_width_us.store(width, Relaxed);
    }

    pub(crate) fn set_voltage_width_us(&self, width: u32) {
        self.voltage_width_us.store(width, Relaxed);
    }

    /// Total CF pulses since the last [`EdgeCapture::reset_energy`].
    pub fn energy_pulse_count(&self) -> u32 {
        self.energy_pulses.load(Relaxed)
    }

    pub fn reset_energy(&self) {
        self.energy_pulses.store(0, Relaxed);
    }

    pub(crate) fn clock(&self) -> &Clk {
        &self.clock
    }
}
