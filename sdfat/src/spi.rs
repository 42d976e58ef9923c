//! SPI transport abstraction.
//!
//! The driver only needs a byte-level master with chip-select control and a
//! handful of discrete clock tiers; pin muxing and clock programming belong
//! to the board support code that implements [`SpiBus`].

/// Discrete SPI clock tiers.
///
/// `Init` must stay within the card's 100-400 kHz initialization window.
/// The recovery path steps through the remaining tiers one at a time, so
/// they are ordered rather than free-form frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiSpeed {
    /// Initialization speed, 250-400 kHz
    Init,
    /// Lowest speed considered usable, around 1 MHz
    Min,
    Low,
    Medium,
    High,
}

impl SpiSpeed {
    /// The next slower usable tier, or `None` when already at the floor.
    pub fn step_down(self) -> Option<SpiSpeed> {
        match self {
            SpiSpeed::High => Some(SpiSpeed::Medium),
            SpiSpeed::Medium => Some(SpiSpeed::Low),
            SpiSpeed::Low => Some(SpiSpeed::Min),
            SpiSpeed::Min | SpiSpeed::Init => None,
        }
    }
}

/// Byte-level SPI master wired to the card.
///
/// Transfers are infallible at this level; protocol failures (timeouts, CRC
/// mismatches, error tokens) are detected and handled above.
pub trait SpiBus {
    /// Reprogram the clock. May be called repeatedly, including mid-session
    /// when the recovery path degrades the speed.
    fn set_speed(&mut self, speed: SpiSpeed);

    /// Drive the chip-select line; `true` selects the card (line low).
    fn select(&mut self, selected: bool);

    /// Clock one byte out.
    fn send(&mut self, byte: u8);

    /// Clock one byte in (sends 0xFF as filler).
    fn receive(&mut self) -> u8;
}
