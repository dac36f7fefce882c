//! Addressing, calibration and polling for a fixed set of sensor slots.
//!
//! A slot is one physical sensor position: an enable (XSHUT) line, an entry in
//! the static configuration table and, after the addressing pass, a unique bus
//! address. Slot 0 is deliberately parked at the factory default address and
//! never verified, calibrated or ranged: reusing the default address once more
//! than one device hangs off the bus disturbs the sensors that follow, so the
//! slot only exists to keep the address arithmetic uniform.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::RangingSensor;

/// Distance between two assigned bus addresses. Addresses are kept in the
/// 8-bit convention, so a stride of two is one 7-bit address per slot.
pub const ADDRESS_STRIDE: u8 = 2;

// Settle time after toggling an enable line or writing an offset.
const SETTLE_US: u32 = 3;
// Fixed wait used between the steps of a ranging session.
const POLL_INTERVAL_MS: u32 = 10;
// Every session polls for data exactly this many times.
const POLL_ROUNDS: u8 = 2;

/// Static per-slot configuration.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotConfig {
    /// Reporting name. Slots without a label still range; they are just never
    /// reported through the sink.
    pub label: Option<&'static str>,
    /// Fixed signed distance correction for mounting geometry, written once
    /// per addressing pass.
    pub offset_mm: i16,
}

/// Ready-made configuration for a six-sensor chassis ring: slot 0 parked at
/// the factory default address, slots 1..=6 labelled around the chassis with
/// empirically determined mounting offsets.
pub const SIX_SENSOR_LAYOUT: [SlotConfig; 7] = [
    SlotConfig { label: None, offset_mm: 0 },
    SlotConfig { label: Some("CENTER_LEFT"), offset_mm: -10 },
    SlotConfig { label: Some("FRONT_LEFT"), offset_mm: -12 },
    SlotConfig { label: Some("FRONT_RIGHT"), offset_mm: -10 },
    SlotConfig { label: Some("BACK_LEFT"), offset_mm: -10 },
    SlotConfig { label: Some("BACK_RIGHT"), offset_mm: -8 },
    SlotConfig { label: Some("CENTER_RIGHT"), offset_mm: -15 },
];

/// Outcome of the most recent addressing pass for one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotStatus {
    /// No addressing pass has run yet.
    #[default]
    Unaddressed,
    /// Parked at the factory default address; intentionally not brought up.
    Parked,
    /// Addressed, verified and brought up; the slot takes part in ranging.
    Ready,
    /// The device rejected its address or failed the identity check.
    NotDetected,
    /// The firmware bring-up sequence failed.
    InitFailed,
}

/// Runtime state of one slot.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot {
    address: u8,
    sensor_id: u16,
    status: SlotStatus,
    last_distance_mm: Option<u16>,
}

impl Slot {
    /// Bus address assigned to this slot.
    #[must_use]
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Identification value read back after addressing.
    #[must_use]
    pub fn sensor_id(&self) -> u16 {
        self.sensor_id
    }

    /// Outcome of the most recent addressing pass.
    #[must_use]
    pub fn status(&self) -> SlotStatus {
        self.status
    }

    /// Whether addressing, identity check and bring-up all succeeded.
    #[must_use]
    pub fn detected(&self) -> bool {
        self.status == SlotStatus::Ready
    }

    /// Most recent accepted distance, if any sample has been valid so far.
    #[must_use]
    pub fn last_distance_mm(&self) -> Option<u16> {
        self.last_distance_mm
    }
}

/// Where the array reports distances and addressing diagnostics.
///
/// Implementations are expected to be cheap and infallible; a UART printer,
/// an RTT channel or a test vector all fit.
pub trait ReportSink {
    /// A labelled slot produced a valid distance sample.
    fn distance(&mut self, label: &'static str, millimeters: u16);

    /// No genuine sensor answered at the address assigned to `slot`.
    fn not_detected(&mut self, slot: usize);
}

/// Coordinator for `N` sensor slots sharing one bus.
///
/// The three stages run strictly in order: [`assign_addresses`] gives every
/// slot a unique address, [`apply_offsets`] loads the calibration table, and
/// [`poll_once`] runs one ranging session per slot. A slot that fails during
/// addressing is skipped by the later stages until the next addressing pass;
/// nothing is retried.
///
/// [`assign_addresses`]: SensorArray::assign_addresses
/// [`apply_offsets`]: SensorArray::apply_offsets
/// [`poll_once`]: SensorArray::poll_once
pub struct SensorArray<S, X, D, const N: usize> {
    sensor: S,
    enable: [X; N],
    delay: D,
    config: [SlotConfig; N],
    slots: [Slot; N],
    base_address: u8,
    expected_id: u16,
}

impl<S, X, D, const N: usize> SensorArray<S, X, D, N>
where
    S: RangingSensor,
    X: OutputPin,
    D: DelayNs,
{
    /// Creates a coordinator over the given device driver, enable lines and
    /// configuration table. All slots start unaddressed.
    pub fn new(sensor: S, enable: [X; N], delay: D, config: [SlotConfig; N]) -> Self {
        Self {
            sensor,
            enable,
            delay,
            config,
            slots: [Slot::default(); N],
            base_address: crate::DEFAULT_ADDRESS,
            expected_id: crate::MODEL_ID,
        }
    }

    /// Overrides the factory default bus address the sensors power up with.
    #[must_use]
    pub fn with_base_address(mut self, address: u8) -> Self {
        self.base_address = address;
        self
    }

    /// Overrides the identification value a genuine sensor is expected to
    /// report.
    #[must_use]
    pub fn with_expected_id(mut self, id: u16) -> Self {
        self.expected_id = id;
        self
    }

    /// Runtime state of all slots.
    #[must_use]
    pub fn slots(&self) -> &[Slot; N] {
        &self.slots
    }

    /// Gives every slot a unique bus address.
    ///
    /// All enable lines are de-asserted first, then raised one at a time so
    /// that exactly one device answers at the factory default address while
    /// its new address (`base + slot * 2`) is programmed. Each non-zero slot
    /// is then verified against the expected identification value and taken
    /// through the firmware bring-up. A slot that fails any of these steps is
    /// reported once through the sink and left out of later stages; there is
    /// no retry.
    pub fn assign_addresses<R: ReportSink>(&mut self, sink: &mut R) {
        self.slots = [Slot::default(); N];

        for pin in &mut self.enable {
            let _ = pin.set_low();
        }
        self.delay.delay_us(SETTLE_US);

        for slot in 0..N {
            let _ = self.enable[slot].set_high();
            self.delay.delay_us(SETTLE_US);

            let address = self
                .base_address
                .wrapping_add(slot as u8 * ADDRESS_STRIDE);
            let assigned = self.sensor.set_address(self.base_address, address);
            let sensor_id = self.sensor.sensor_id(address).unwrap_or(0);

            self.slots[slot].address = address;
            self.slots[slot].sensor_id = sensor_id;

            if slot == 0 {
                // Parked at the factory default; never verified or ranged.
                self.slots[slot].status = SlotStatus::Parked;
                continue;
            }

            if assigned.is_err() || sensor_id != self.expected_id {
                warn!("slot {}: no sensor detected at address {:#04x}", slot, address);
                sink.not_detected(slot);
                self.slots[slot].status = SlotStatus::NotDetected;
                continue;
            }

            if self.sensor.init(address).is_err() {
                warn!("slot {}: firmware bring-up failed at {:#04x}", slot, address);
                self.slots[slot].status = SlotStatus::InitFailed;
                continue;
            }

            self.slots[slot].status = SlotStatus::Ready;
            if let Some(label) = self.config[slot].label {
                info!(
                    "slot {} ({}) ready at {:#04x}, id {:#06x}",
                    slot, label, address, sensor_id
                );
            }
        }
    }

    /// Writes the configured offset into every detected slot.
    ///
    /// Offsets come straight from the configuration table and are meant to be
    /// written exactly once per addressing pass, before any ranging session.
    /// The writes are fire-and-forget. Crosstalk correction for cover glass
    /// is not performed.
    pub fn apply_offsets(&mut self) {
        for slot in 1..N {
            if !self.slots[slot].detected() {
                continue;
            }
            let _ = self
                .sensor
                .set_offset(self.slots[slot].address, self.config[slot].offset_mm);
            self.delay.delay_us(SETTLE_US);
        }
    }

    /// Runs one ranging session per detected slot, strictly in slot order.
    ///
    /// A session starts ranging, polls for data exactly twice (sampling twice
    /// to improve confidence), and stops ranging. A reading is accepted only
    /// when its range status is the valid code; an accepted reading updates
    /// the slot state, and at most one distance per session is reported for
    /// slots that carry a label. If the start call fails the polling is
    /// skipped, but the stop is still issued. Every wait is a fixed blocking
    /// delay; there are no timeouts and no retries.
    pub fn poll_once<R: ReportSink>(&mut self, sink: &mut R) {
        for slot in 1..N {
            if !self.slots[slot].detected() {
                continue;
            }
            let address = self.slots[slot].address;
            let mut accepted = None;

            if self.sensor.start_ranging(address).is_ok() {
                for _ in 0..POLL_ROUNDS {
                    self.delay.delay_ms(POLL_INTERVAL_MS);
                    let ready = self.sensor.data_ready(address).unwrap_or(false);

                    if ready {
                        self.delay.delay_ms(POLL_INTERVAL_MS);
                        // Without clearing the interrupt no further
                        // measurement can complete.
                        let _ = self.sensor.clear_interrupt(address);
                        self.delay.delay_ms(POLL_INTERVAL_MS);

                        if let Ok(m) = self.sensor.measurement(address) {
                            if m.is_valid() {
                                self.slots[slot].last_distance_mm = Some(m.distance_mm);
                                accepted = Some(m.distance_mm);
                            } else {
                                debug!(
                                    "slot {}: discarding sample with status {}",
                                    slot, m.status
                                );
                            }
                        }
                    }

                    // Minimum inter-measurement interval, ready or not.
                    self.delay.delay_ms(POLL_INTERVAL_MS);
                }
            }

            self.delay.delay_ms(POLL_INTERVAL_MS);
            let _ = self.sensor.stop_ranging(address);

            if let (Some(millimeters), Some(label)) = (accepted, self.config[slot].label) {
                sink.distance(label, millimeters);
            }
        }
    }
}
