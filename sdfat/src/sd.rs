//! Raw SD/SDHC card protocol over SPI.
//!
//! This layer speaks the card's command set and nothing else: reset and
//! initialization handshake, single-block reads and writes, and the resync
//! clock burst. Retries, caching, and error recovery live above, in
//! [`crate::device`].

use crate::crc::{crc16_ccitt, crc16_step, crc7};
use crate::spi::{SpiBus, SpiSpeed};
use log::{debug, trace};

// =============================================================================
// Command set (SPI mode)
// =============================================================================

const CMD_RESET: u8 = 0; //          GO_IDLE_STATE
const CMD_INIT: u8 = 1; //           SEND_OP_COND (legacy fallback)
const CMD_CHECK_VOLTAGE: u8 = 8; //  SEND_IF_COND, pattern 0x1AA
const CMD_BLOCK_LENGTH: u8 = 16; //  SET_BLOCKLEN
const CMD_READ_BLOCK: u8 = 17; //    READ_SINGLE_BLOCK
const CMD_WRITE_BLOCK: u8 = 24; //   WRITE_BLOCK
const CMD_SD_INIT: u8 = 41; //       ACMD41 SD_SEND_OP_COND
const CMD_APP_CMD: u8 = 55; //       prefix for ACMDs
const CMD_READ_OCR: u8 = 58;
const CMD_CRC_ON_OFF: u8 = 59;

/// Start-of-data token for single-block transfers.
const START_TOKEN: u8 = 0xFE;

/// The only block length SDHC/SDXC cards support.
pub(crate) const BLOCK_LEN: usize = 512;

const RESET_TRIES: u16 = 10;
const INIT_TRIES: u16 = 10_000;
/// Dummy bytes to clock while waiting for a data token (or for the card to
/// release the busy signal) before declaring a timeout.
const READ_TIMEOUT_BYTES: u16 = 65_534;

/// Low-level transfer outcome; success is `Ok(())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SdStatus {
    BadCrc,
    Timeout,
    Error,
}

pub(crate) type SdResult<T = ()> = core::result::Result<T, SdStatus>;

// =============================================================================
// Card driver
// =============================================================================

pub(crate) struct SdCard<S: SpiBus> {
    spi: S,
    speed: SpiSpeed,
    is_sdhc: bool,
    crc_enabled: bool,
    /// CRC the card sent with the most recent data block. Some cards answer
    /// 0xFFFF for every block even after accepting CMD59; the init probe uses
    /// this to spot them.
    last_crc: u16,
    accesses: u32,
}

impl<S: SpiBus> SdCard<S> {
    pub fn new(spi: S) -> Self {
        SdCard {
            spi,
            speed: SpiSpeed::Init,
            is_sdhc: false,
            crc_enabled: false,
            last_crc: 0,
            accesses: 0,
        }
    }

    pub fn set_speed(&mut self, speed: SpiSpeed) {
        self.speed = speed;
        self.spi.set_speed(speed);
    }

    pub fn speed(&self) -> SpiSpeed {
        self.speed
    }

    pub fn is_sdhc(&self) -> bool {
        self.is_sdhc
    }

    pub fn last_crc(&self) -> u16 {
        self.last_crc
    }

    pub fn block_accesses(&self) -> u32 {
        self.accesses
    }

    pub fn bus_mut(&mut self) -> &mut S {
        &mut self.spi
    }

    pub fn release(self) -> S {
        self.spi
    }

    /// SD cards take the byte address of a block, SDHC cards the block index.
    fn block_address(&self, block: u32) -> u32 {
        if self.is_sdhc {
            block
        } else {
            block * BLOCK_LEN as u32
        }
    }

    /// Send a 6-byte command frame and poll for the R1 response.
    fn send_command(&mut self, command: u8, arg: u32) -> u8 {
        let mut message = [0u8; 6];
        message[0] = 0b0100_0000 | command;
        message[1..5].copy_from_slice(&arg.to_be_bytes());
        message[5] = match command {
            // fixed CRCs are needed while still in native mode
            CMD_RESET => 0x95,
            CMD_CHECK_VOLTAGE => 0x87,
            _ if command == CMD_CRC_ON_OFF || self.crc_enabled => {
                (crc7(&message[..5]) << 1) | 0x01
            }
            _ => 0xFF,
        };

        // give the card some breathing room between commands
        self.spi.select(false);
        self.spi.send(0xFF);
        self.spi.select(true);

        for &byte in &message {
            self.spi.send(byte);
        }

        // the card needs 8 clocks after a command; allow 10 bytes for the
        // response to appear
        let mut response = 0xFF;
        for _ in 0..10 {
            if response != 0xFF {
                break;
            }
            response = self.spi.receive();
        }
        self.spi.select(false);
        response
    }

    /// CMD0: drop the card into SPI mode. Resets CRC state, since cards come
    /// out of reset with CRC checking off.
    pub fn reset(&mut self) -> SdResult {
        self.crc_enabled = false;

        // at least 74 startup clocks with the card deselected
        self.spi.select(false);
        for _ in 0..10 {
            self.spi.receive();
        }

        for _ in 0..RESET_TRIES {
            if self.send_command(CMD_RESET, 0) == 0x01 {
                return Ok(());
            }
            // a few rest clocks before trying again
            for _ in 0..5 {
                self.spi.send(0xFF);
            }
        }
        Err(SdStatus::Error)
    }

    /// CMD59: ask the card to check command and data CRCs.
    pub fn enable_crc(&mut self) -> SdResult {
        let response = self.send_command(CMD_CRC_ON_OFF, 1);
        if response == 0x00 || response == 0x01 {
            self.crc_enabled = true;
            return Ok(());
        }
        Err(SdStatus::Error)
    }

    /// CMD8 voltage check. `Ok(true)` means the card is an SDHC candidate,
    /// `Ok(false)` a legacy SD card; a malformed echo is fatal.
    fn voltage_check(&mut self) -> SdResult<bool> {
        let response = self.send_command(CMD_CHECK_VOLTAGE, 0x1AA);

        if response == 0x01 {
            // the card accepted and sends 4 more bytes echoing the pattern
            self.spi.select(true);
            self.spi.receive();
            self.spi.receive();
            let echo_pattern = self.spi.receive();
            let echo_check = self.spi.receive();
            self.spi.select(false);

            if echo_pattern != 0x01 || echo_check != 0xAA {
                return Err(SdStatus::Error);
            }
            Ok(true)
        } else {
            // "illegal command": a legacy card. It may clock out junk for a
            // while; drain until the bus reads idle.
            self.spi.select(true);
            let mut byte = response;
            while byte != 0xFF {
                byte = self.spi.receive();
            }
            self.spi.select(false);
            Ok(false)
        }
    }

    /// CMD58: cards that pass the SDHC init may still use byte addressing;
    /// the OCR's CCS bit settles it.
    fn check_sdhc_addressing(&mut self) {
        if self.send_command(CMD_READ_OCR, 0) != 0 {
            self.is_sdhc = false;
        }

        self.spi.select(true);
        if self.spi.receive() & 0x40 == 0 {
            self.is_sdhc = false;
        }
        // the remaining, unused OCR bytes
        self.spi.receive();
        self.spi.receive();
        self.spi.receive();
        self.spi.select(false);

        trace!(
            "card uses {} addressing",
            if self.is_sdhc { "SDHC" } else { "SD" }
        );
    }

    /// Run the voltage check and operating-condition loop until the card
    /// reports ready.
    pub fn initialize(&mut self) -> SdResult {
        if self.voltage_check()? {
            self.is_sdhc = true;
            debug!("SDHC init");
            for _ in 0..INIT_TRIES {
                self.send_command(CMD_APP_CMD, 0);
                // ACMD41 with the HCS flag (host supports high capacity)
                let response = self.send_command(CMD_SD_INIT, 0x4000_0000);
                if response == 0x00 {
                    self.check_sdhc_addressing();
                    return Ok(());
                }
                if response == 0x01 {
                    continue; // still busy
                }
                break; // errored; fall back to the non-SDHC path
            }
        }

        debug!("SD init");
        let mut tries: u16 = 0;
        loop {
            tries += 1;
            if tries > INIT_TRIES {
                return Err(SdStatus::Timeout);
            }

            self.send_command(CMD_APP_CMD, 0);
            let response = self.send_command(CMD_SD_INIT, 0);
            if response == 0x00 {
                return Ok(());
            }
            if response == 0x01 {
                continue; // still busy
            }

            // ACMD41 not understood; give CMD1 a few more tries to work with
            tries /= 2;
            break;
        }

        loop {
            tries += 1;
            if tries > INIT_TRIES {
                return Err(SdStatus::Timeout);
            }

            let response = self.send_command(CMD_INIT, 0);
            if response == 0x00 {
                return Ok(());
            }
            if response == 0x01 {
                continue;
            }
            return Err(SdStatus::Error);
        }
    }

    /// CMD16: fix the block length at 512. SDHC cards ignore this but answer
    /// anyway.
    pub fn set_block_length(&mut self) -> SdResult {
        if self.send_command(CMD_BLOCK_LENGTH, BLOCK_LEN as u32) == 0 {
            return Ok(());
        }
        Err(SdStatus::Error)
    }

    /// Wait for the data token of a pending read.
    fn wait_start_token(&mut self, first: u8) -> SdResult {
        let mut response = first;
        let mut empty_bytes: u16 = 0;

        self.spi.select(true);
        while response == 0xFF || response == 0x00 {
            empty_bytes += 1;
            if empty_bytes >= READ_TIMEOUT_BYTES {
                self.spi.select(false);
                return Err(SdStatus::Timeout);
            }
            response = self.spi.receive();
        }
        self.spi.select(false);

        if response != START_TOKEN {
            trace!("read rejected, response {:#04x}", response);
            return Err(SdStatus::Error);
        }
        Ok(())
    }

    /// CMD17: read one 512-byte block.
    pub fn read_block(&mut self, block: u32, data: &mut [u8; BLOCK_LEN]) -> SdResult {
        self.accesses += 1;

        let response = self.send_command(CMD_READ_BLOCK, self.block_address(block));
        self.wait_start_token(response)?;

        self.spi.select(true);
        for byte in data.iter_mut() {
            *byte = self.spi.receive();
        }
        let crc_high = self.spi.receive();
        let crc_low = self.spi.receive();
        self.spi.select(false);

        if self.crc_enabled {
            let sent_crc = ((crc_high as u16) << 8) | crc_low as u16;
            self.last_crc = sent_crc;
            if crc16_ccitt(data) != sent_crc {
                return Err(SdStatus::BadCrc);
            }
        }
        Ok(())
    }

    /// CMD17, but stream the block through the CRC engine without keeping the
    /// bytes. Returns the computed CRC-16.
    pub fn read_block_crc_only(&mut self, block: u32) -> SdResult<u16> {
        self.accesses += 1;

        let response = self.send_command(CMD_READ_BLOCK, self.block_address(block));
        self.wait_start_token(response)?;

        self.spi.select(true);
        let mut crc = 0u16;
        for _ in 0..BLOCK_LEN {
            let byte = self.spi.receive();
            crc16_step(&mut crc, byte);
        }
        let crc_high = self.spi.receive();
        let crc_low = self.spi.receive();
        self.spi.select(false);

        if self.crc_enabled {
            let sent_crc = ((crc_high as u16) << 8) | crc_low as u16;
            self.last_crc = sent_crc;
            if crc != sent_crc {
                return Err(SdStatus::BadCrc);
            }
        }
        Ok(crc)
    }

    /// Clock until the card releases the busy signal (MISO held low).
    fn wait_not_busy(&mut self) -> SdResult {
        for _ in 0..READ_TIMEOUT_BYTES {
            if self.spi.receive() == 0xFF {
                return Ok(());
            }
        }
        Err(SdStatus::Timeout)
    }

    /// CMD24: write one 512-byte block.
    pub fn write_block(&mut self, block: u32, data: &[u8; BLOCK_LEN]) -> SdResult {
        self.accesses += 1;

        let crc = if self.crc_enabled {
            crc16_ccitt(data)
        } else {
            0xFFFF
        };

        let response = self.send_command(CMD_WRITE_BLOCK, self.block_address(block));
        if response != 0 {
            trace!("write rejected, response {:#04x}", response);
            return Err(SdStatus::Error);
        }

        self.spi.select(true);
        self.spi.receive();

        self.spi.send(START_TOKEN);
        for &byte in data.iter() {
            self.spi.send(byte);
        }
        self.spi.send((crc >> 8) as u8);
        self.spi.send(crc as u8);

        let token = self.spi.receive() & 0b0000_1111;
        let busy = self.wait_not_busy();
        self.spi.select(false);
        busy?;

        match token {
            0b0101 => Ok(()),                  // data accepted
            0b1011 => Err(SdStatus::BadCrc),   // card saw a bad CRC
            0b1101 => Err(SdStatus::Error),    // write error
            _ => {
                // the response should be one of those three; wait out any
                // residual busy signal and give up
                self.spi.select(true);
                let busy = self.wait_not_busy();
                self.spi.select(false);
                busy?;
                Err(SdStatus::Error)
            }
        }
    }

    /// Deselect and clock the bus until it reads idle, giving a confused
    /// card the chance to finish whatever it was doing. Bounded at ~64k
    /// clocks in case the card never lets go.
    pub fn resync(&mut self) {
        self.spi.select(false);
        self.spi.receive();
        self.spi.select(true);
        let mut counter: u32 = 0;
        while self.spi.receive() != 0xFF && counter < 65_535 {
            counter += 1;
        }
        self.spi.select(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCard;

    fn fresh_card(image_sectors: usize) -> SdCard<SimCard> {
        let image = vec![0u8; image_sectors * BLOCK_LEN];
        SdCard::new(SimCard::new(image))
    }

    fn bring_up(card: &mut SdCard<SimCard>) {
        card.set_speed(SpiSpeed::Init);
        card.reset().unwrap();
        card.enable_crc().unwrap();
        card.initialize().unwrap();
        card.set_block_length().unwrap();
    }

    #[test]
    fn init_detects_sdhc() {
        let mut card = fresh_card(8);
        bring_up(&mut card);
        assert!(card.is_sdhc());
    }

    #[test]
    fn init_legacy_card() {
        let image = vec![0u8; 8 * BLOCK_LEN];
        let mut card = SdCard::new(SimCard::new(image).legacy());
        bring_up(&mut card);
        assert!(!card.is_sdhc());
    }

    #[test]
    fn legacy_card_falls_back_to_cmd1() {
        let image = vec![0u8; 8 * BLOCK_LEN];
        let mut card = SdCard::new(SimCard::new(image).legacy().acmd41_illegal());
        bring_up(&mut card);
        assert!(!card.is_sdhc());
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut card = fresh_card(8);
        bring_up(&mut card);

        let mut data = [0u8; BLOCK_LEN];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        card.write_block(3, &data).unwrap();

        let mut back = [0u8; BLOCK_LEN];
        card.read_block(3, &mut back).unwrap();
        assert_eq!(data[..], back[..]);
    }

    #[test]
    fn crc_only_read_matches_data_crc() {
        let mut card = fresh_card(8);
        bring_up(&mut card);

        let data = [0xA5u8; BLOCK_LEN];
        card.write_block(1, &data).unwrap();
        let crc = card.read_block_crc_only(1).unwrap();
        assert_eq!(crc, crate::crc::crc16_ccitt(&data));
    }

    #[test]
    fn corrupted_read_reports_bad_crc() {
        let mut card = fresh_card(8);
        bring_up(&mut card);

        let data = [0x11u8; BLOCK_LEN];
        card.write_block(2, &data).unwrap();

        card.bus_mut().corrupt_next_reads(1);
        let mut back = [0u8; BLOCK_LEN];
        assert_eq!(card.read_block(2, &mut back), Err(SdStatus::BadCrc));
    }

    #[test]
    fn missing_token_times_out() {
        let mut card = fresh_card(8);
        bring_up(&mut card);

        card.bus_mut().drop_next_read_tokens(1);
        let mut back = [0u8; BLOCK_LEN];
        assert_eq!(card.read_block(0, &mut back), Err(SdStatus::Timeout));
    }

    #[test]
    fn rejected_command_is_an_error() {
        let mut card = fresh_card(8);
        bring_up(&mut card);

        card.bus_mut().reject_next_commands(1);
        let mut back = [0u8; BLOCK_LEN];
        assert_eq!(card.read_block(0, &mut back), Err(SdStatus::Error));
    }

    #[test]
    fn write_error_token_is_an_error() {
        let mut card = fresh_card(8);
        bring_up(&mut card);

        card.bus_mut().fail_next_writes(1);
        let data = [0x3Cu8; BLOCK_LEN];
        assert_eq!(card.write_block(1, &data), Err(SdStatus::Error));

        // the fault is one-shot; the retried write goes through
        card.write_block(1, &data).unwrap();
        let mut back = [0u8; BLOCK_LEN];
        card.read_block(1, &mut back).unwrap();
        assert_eq!(data[..], back[..]);
    }
}
