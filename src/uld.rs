//! Register-level VL53L4CD access.
//!
//! This is the production [`RangingSensor`] implementation. It follows the
//! sequences of ST's ultra-light driver and keeps that driver's 8-bit address
//! convention on the API surface; addresses are shifted down to 7 bits at the
//! `embedded-hal` boundary. Unlike a single-device driver it does not remember
//! one address: every operation names the device it targets, because on a
//! shared bus the set of addresses changes while the array is brought up.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::{Error, Measurement, RangingSensor};

// Initialization blob from the ultra-light driver, written to 0x2D..=0x87.
const DEFAULT_CONFIGURATION: [u8; 91] = [
    0x00, /* 0x2d */
    0x00, /* 0x2e */
    0x00, /* 0x2f */
    0x11, /* 0x30 */
    0x02, /* 0x31 */
    0x00, /* 0x32 */
    0x02, /* 0x33 */
    0x08, /* 0x34 */
    0x00, /* 0x35 */
    0x08, /* 0x36 */
    0x10, /* 0x37 */
    0x01, /* 0x38 */
    0x01, /* 0x39 */
    0x00, /* 0x3a */
    0x00, /* 0x3b */
    0x00, /* 0x3c */
    0x00, /* 0x3d */
    0xff, /* 0x3e */
    0x00, /* 0x3f */
    0x0F, /* 0x40 */
    0x00, /* 0x41 */
    0x00, /* 0x42 */
    0x00, /* 0x43 */
    0x00, /* 0x44 */
    0x00, /* 0x45 */
    0x20, /* 0x46 */
    0x0b, /* 0x47 */
    0x00, /* 0x48 */
    0x00, /* 0x49 */
    0x02, /* 0x4a */
    0x14, /* 0x4b */
    0x21, /* 0x4c */
    0x00, /* 0x4d */
    0x00, /* 0x4e */
    0x05, /* 0x4f */
    0x00, /* 0x50 */
    0x00, /* 0x51 */
    0x00, /* 0x52 */
    0x00, /* 0x53 */
    0xc8, /* 0x54 */
    0x00, /* 0x55 */
    0x00, /* 0x56 */
    0x38, /* 0x57 */
    0xff, /* 0x58 */
    0x01, /* 0x59 */
    0x00, /* 0x5a */
    0x08, /* 0x5b */
    0x00, /* 0x5c */
    0x00, /* 0x5d */
    0x00, /* 0x5e */
    0x01, /* 0x5f */
    0x07, /* 0x60 */
    0x00, /* 0x61 */
    0x02, /* 0x62 */
    0x05, /* 0x63 */
    0x00, /* 0x64 */
    0xb4, /* 0x65 */
    0x00, /* 0x66 */
    0xbb, /* 0x67 */
    0x08, /* 0x68 */
    0x38, /* 0x69 */
    0x00, /* 0x6a */
    0x00, /* 0x6b */
    0x00, /* 0x6c */
    0x00, /* 0x6d */
    0x0f, /* 0x6e */
    0x89, /* 0x6f */
    0x00, /* 0x70 */
    0x00, /* 0x71 */
    0x00, /* 0x72 */
    0x00, /* 0x73 */
    0x00, /* 0x74 */
    0x00, /* 0x75 */
    0x00, /* 0x76 */
    0x01, /* 0x77 */
    0x07, /* 0x78 */
    0x05, /* 0x79 */
    0x06, /* 0x7a */
    0x06, /* 0x7b */
    0x00, /* 0x7c */
    0x00, /* 0x7d */
    0x02, /* 0x7e */
    0xc7, /* 0x7f */
    0xff, /* 0x80 */
    0x9B, /* 0x81 */
    0x00, /* 0x82 */
    0x00, /* 0x83 */
    0x00, /* 0x84 */
    0x01, /* 0x85 */
    0x00, /* 0x86 */
    0x00, /* 0x87 */
];

// Raw range status values fold into the ultra-light driver's canonical codes;
// 0 is the only one the coordinator accepts.
const STATUS_RTN: [u8; 24] = [
    255, 255, 255, 5, 2, 4, 1, 7, 3, 0, 255, 255, 9, 13, 255, 255, 255, 255, 10, 6, 255, 255, 11,
    12,
];

/// Register addresses used by this crate.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// I2C slave device address (0x0001)
    I2cSlaveDeviceAddress = 0x0001,
    /// VHV configuration timeout macro loop bound (0x0008)
    VhvConfigTimeoutMacropLoopBound = 0x0008,
    /// Ranging offset in millimeters, in quarter-millimeter units (0x001E)
    RangeOffsetMm = 0x001E,
    /// Inner part of the offset correction (0x0020)
    InnerOffsetMm = 0x0020,
    /// Outer part of the offset correction (0x0022)
    OuterOffsetMm = 0x0022,
    /// GPIO HV mux control, carries the interrupt polarity (0x0030)
    GpioHvMuxCtrl = 0x0030,
    /// GPIO TIO HV status, carries the interrupt state (0x0031)
    GpioTioHvStatus = 0x0031,
    /// System interrupt clear (0x0086)
    SystemInterruptClear = 0x0086,
    /// System start (0x0087)
    SystemStart = 0x0087,
    /// Result range status (0x0089)
    ResultRangeStatus = 0x0089,
    /// Result signal rate (0x008E)
    ResultSignalRate = 0x008E,
    /// Result ambient rate (0x0090)
    ResultAmbientRate = 0x0090,
    /// Result sigma (0x0092)
    ResultSigma = 0x0092,
    /// Result distance (0x0096)
    ResultDistance = 0x0096,
    /// Firmware system status (0x00E5)
    FirmwareSystemStatus = 0x00E5,
    /// Identification model ID (0x010F)
    IdentificationModelId = 0x010F,
}

impl From<Register> for u16 {
    fn from(r: Register) -> Self {
        r as u16
    }
}

/// VL53L4CD driver speaking to any number of sensors on one I2C bus.
pub struct Vl53l4cd<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C, E, D> Vl53l4cd<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
    D: DelayNs,
{
    /// Creates a driver over the given bus and delay provider.
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }

    /// Releases the bus and delay provider.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn bus_address(address: u8) -> u8 {
        address >> 1
    }

    /// Writes one byte to a register of the device at `address`.
    pub fn write_byte<R>(&mut self, address: u8, register: R, value: u8) -> Result<(), Error<E>>
    where
        R: Into<u16>,
    {
        let reg: u16 = register.into();
        let mut buffer = [0u8; 3];
        buffer[0..2].copy_from_slice(&reg.to_be_bytes());
        buffer[2] = value;
        self.i2c.write(Self::bus_address(address), &buffer)?;
        Ok(())
    }

    /// Reads one byte from a register of the device at `address`.
    pub fn read_byte<R>(&mut self, address: u8, register: R) -> Result<u8, Error<E>>
    where
        R: Into<u16>,
    {
        let reg: u16 = register.into();
        let write_buffer = reg.to_be_bytes();
        let mut read_buffer = [0u8; 1];
        self.i2c
            .write_read(Self::bus_address(address), &write_buffer, &mut read_buffer)?;
        Ok(read_buffer[0])
    }

    /// Writes a 16-bit word to a register of the device at `address`.
    pub fn write_word<R>(&mut self, address: u8, register: R, value: u16) -> Result<(), Error<E>>
    where
        R: Into<u16>,
    {
        let reg: u16 = register.into();
        let mut buffer = [0u8; 4];
        buffer[0..2].copy_from_slice(&reg.to_be_bytes());
        buffer[2..4].copy_from_slice(&value.to_be_bytes());
        self.i2c.write(Self::bus_address(address), &buffer)?;
        Ok(())
    }

    /// Reads a 16-bit word from a register of the device at `address`.
    pub fn read_word<R>(&mut self, address: u8, register: R) -> Result<u16, Error<E>>
    where
        R: Into<u16>,
    {
        let reg: u16 = register.into();
        let write_buffer = reg.to_be_bytes();
        let mut read_buffer = [0u8; 2];
        self.i2c
            .write_read(Self::bus_address(address), &write_buffer, &mut read_buffer)?;
        Ok(u16::from_be_bytes(read_buffer))
    }

    fn check_data_ready(&mut self, address: u8) -> Result<bool, Error<E>> {
        // Interrupt polarity decides which level means "new data".
        let polarity = self.read_byte(address, Register::GpioHvMuxCtrl)?;
        let polarity = u8::from(polarity & 0x10 == 0);

        let status = self.read_byte(address, Register::GpioTioHvStatus)?;
        Ok(status & 1 == polarity)
    }
}

impl<I2C, E, D> RangingSensor for Vl53l4cd<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
    D: DelayNs,
{
    type Error = Error<E>;

    fn set_address(&mut self, current: u8, new: u8) -> Result<(), Self::Error> {
        // The register takes the 7-bit address.
        self.write_byte(current, Register::I2cSlaveDeviceAddress, new >> 1)
    }

    fn sensor_id(&mut self, address: u8) -> Result<u16, Self::Error> {
        self.read_word(address, Register::IdentificationModelId)
    }

    fn init(&mut self, address: u8) -> Result<(), Self::Error> {
        const BOOT_STATUS: u8 = 0x3;
        const BOOT_ATTEMPTS: u16 = 1000;

        debug!("waiting for sensor at {:#04x} to boot", address);
        let mut attempts = 0u16;
        loop {
            let status = self.read_byte(address, Register::FirmwareSystemStatus)?;
            if status == BOOT_STATUS {
                break Ok(());
            }
            attempts += 1;
            if attempts >= BOOT_ATTEMPTS {
                break Err(Error::Timeout);
            }
            self.delay.delay_ms(1);
        }?;

        debug!("loading default configuration at {:#04x}", address);
        for (i, &value) in DEFAULT_CONFIGURATION.iter().enumerate() {
            self.write_byte(address, i as u16 + 0x2D, value)?;
        }

        // The first ranging performs the VHV calibration.
        self.write_byte(address, Register::SystemStart, 0x40)?;
        let mut attempts = 0u16;
        loop {
            if self.check_data_ready(address)? {
                break Ok(());
            }
            attempts += 1;
            if attempts >= BOOT_ATTEMPTS {
                break Err(Error::Timeout);
            }
            self.delay.delay_ms(1);
        }?;

        self.write_byte(address, Register::SystemInterruptClear, 0x01)?;
        self.write_byte(address, Register::SystemStart, 0x00)?;
        self.write_byte(address, Register::VhvConfigTimeoutMacropLoopBound, 0x09)?;
        self.write_byte(address, 0x0Bu16, 0x00)?;
        self.write_word(address, 0x0024u16, 0x500)?;
        Ok(())
    }

    fn set_offset(&mut self, address: u8, offset_mm: i16) -> Result<(), Self::Error> {
        let encoded = (i32::from(offset_mm) * 4) as u16;
        self.write_word(address, Register::RangeOffsetMm, encoded)?;
        self.write_word(address, Register::InnerOffsetMm, 0)?;
        self.write_word(address, Register::OuterOffsetMm, 0)?;
        Ok(())
    }

    fn start_ranging(&mut self, address: u8) -> Result<(), Self::Error> {
        self.write_byte(address, Register::SystemStart, 0x40)
    }

    fn stop_ranging(&mut self, address: u8) -> Result<(), Self::Error> {
        self.write_byte(address, Register::SystemStart, 0x00)
    }

    fn data_ready(&mut self, address: u8) -> Result<bool, Self::Error> {
        self.check_data_ready(address)
    }

    fn clear_interrupt(&mut self, address: u8) -> Result<(), Self::Error> {
        self.write_byte(address, Register::SystemInterruptClear, 0x01)
    }

    fn measurement(&mut self, address: u8) -> Result<Measurement, Self::Error> {
        let mut status = self.read_byte(address, Register::ResultRangeStatus)? & 0x1F;
        if status < 24 {
            status = STATUS_RTN[status as usize];
        }
        let distance_mm = self.read_word(address, Register::ResultDistance)?;
        let sigma_mm = self.read_word(address, Register::ResultSigma)? / 4;
        let signal_kcps = self.read_word(address, Register::ResultSignalRate)? * 8;
        let ambient_kcps = self.read_word(address, Register::ResultAmbientRate)? * 8;
        Ok(Measurement {
            status,
            distance_mm,
            sigma_mm,
            signal_kcps,
            ambient_kcps,
        })
    }
}
