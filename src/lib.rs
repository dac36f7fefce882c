//! # VL53L4CD sensor-array management
//!
//! Every VL53L4CD time-of-flight sensor powers up answering the same factory
//! default I2C address, so a board carrying several of them on one bus has to
//! bring them up one at a time: hold all XSHUT lines low, release one, move
//! that sensor to a unique address, verify it is really there, and only then
//! release the next. This crate implements that addressing pass, a one-shot
//! per-slot offset calibration, and the blocking start/poll/read/stop ranging
//! cycle that produces filtered distance readings.
//!
//! The crate is `no_std` and generic over `embedded-hal` 1.0 traits:
//! [`embedded_hal::i2c::I2c`] for the shared bus,
//! [`embedded_hal::digital::OutputPin`] for the enable lines and
//! [`embedded_hal::delay::DelayNs`] for every wait. Execution is strictly
//! single-threaded and blocking; slots are processed one after another, which
//! is what makes the shared bus safe without a lock.
//!
//! [`Vl53l4cd`] talks to the real sensor at register level. The coordinator
//! only sees it through the [`RangingSensor`] trait, so tests (and bring-up on
//! a bench without hardware) can substitute a deterministic fake.
//!
//! ```rust,no_run
//! use vl53l4cd_array::{ReportSink, SensorArray, SlotConfig, Vl53l4cd};
//!
//! struct Console;
//!
//! impl ReportSink for Console {
//!     fn distance(&mut self, label: &'static str, millimeters: u16) {
//!         println!("{label}\t-> Distance = {millimeters:5} mm");
//!     }
//!     fn not_detected(&mut self, slot: usize) {
//!         println!("VL53L4CD not detected at slot {slot}");
//!     }
//! }
//!
//! use embedded_hal_mock::eh1::delay::NoopDelay;
//!
//! let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
//! let enable = [(); 3].map(|()| embedded_hal_mock::eh1::digital::Mock::new(&[]));
//! let config = [
//!     SlotConfig { label: None, offset_mm: 0 }, // slot 0 stays parked
//!     SlotConfig { label: Some("LEFT"), offset_mm: -10 },
//!     SlotConfig { label: Some("RIGHT"), offset_mm: -12 },
//! ];
//!
//! let mut sink = Console;
//! let mut array = SensorArray::new(Vl53l4cd::new(i2c, NoopDelay), enable, NoopDelay, config);
//! array.assign_addresses(&mut sink);
//! array.apply_offsets();
//! loop {
//!     array.poll_once(&mut sink);
//! }
//! ```
#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(test)]
extern crate std;

mod fmt; // <-- must be first module!

mod array;
mod uld;

pub use array::{
    ReportSink, SensorArray, Slot, SlotConfig, SlotStatus, ADDRESS_STRIDE, SIX_SENSOR_LAYOUT,
};
pub use uld::{Register, Vl53l4cd};

/// Factory default bus address of the VL53L4CD, in the 8-bit convention the
/// ST ultra-light driver uses (the 7-bit address is `0x52 >> 1` = `0x29`).
pub const DEFAULT_ADDRESS: u8 = 0x52;

/// Value of the identification register of a genuine VL53L4CD.
pub const MODEL_ID: u16 = 0xEBAA;

/// One decoded ranging result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// Range status; `0` means the distance can be trusted.
    pub status: u8,
    /// Measured distance in millimeters.
    pub distance_mm: u16,
    /// Measurement precision (1 sigma) in millimeters.
    pub sigma_mm: u16,
    /// Return signal rate in kcps.
    pub signal_kcps: u16,
    /// Ambient light rate in kcps.
    pub ambient_kcps: u16,
}

impl Measurement {
    /// Whether the range status marks this distance as reliable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == 0
    }
}

/// The device operations the coordinator needs from a sensor on the shared
/// bus. Every call names the 8-bit bus address of the sensor it targets; the
/// coordinator is the only place that knows which slot owns which address.
///
/// [`Vl53l4cd`] is the register-level implementation for real hardware.
pub trait RangingSensor {
    /// Transport error type.
    type Error: core::fmt::Debug;

    /// Move the device currently answering at `current` to `new`.
    fn set_address(&mut self, current: u8, new: u8) -> Result<(), Self::Error>;

    /// Read the identification register, expected to equal [`MODEL_ID`] for a
    /// genuine device.
    fn sensor_id(&mut self, address: u8) -> Result<u16, Self::Error>;

    /// Run the one-time firmware bring-up sequence.
    fn init(&mut self, address: u8) -> Result<(), Self::Error>;

    /// Write the signed millimeter offset correction.
    fn set_offset(&mut self, address: u8, offset_mm: i16) -> Result<(), Self::Error>;

    /// Start continuous ranging.
    fn start_ranging(&mut self, address: u8) -> Result<(), Self::Error>;

    /// Stop ranging.
    fn stop_ranging(&mut self, address: u8) -> Result<(), Self::Error>;

    /// Whether a new measurement is waiting to be read.
    fn data_ready(&mut self, address: u8) -> Result<bool, Self::Error>;

    /// Clear the ranging interrupt; required before the next measurement can
    /// complete.
    fn clear_interrupt(&mut self, address: u8) -> Result<(), Self::Error>;

    /// Read and decode the latest result record.
    fn measurement(&mut self, address: u8) -> Result<Measurement, Self::Error>;
}

/// Error type for device-level operations.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E: core::fmt::Debug> {
    /// I2C communication error from the underlying bus.
    I2c(E),
    /// The sensor did not reach the expected state in time.
    Timeout,
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl<E: core::fmt::Debug> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::I2c(error)
    }
}
