//! In-memory SD card simulator and FAT32 image formatter.
//!
//! Host-only test bed: [`SimCard`] speaks the byte-level SPI protocol the
//! driver expects (command frames, R1 responses, data tokens, CRCs, busy
//! signalling) over a plain `Vec<u8>` image, with fault injection to
//! exercise the retry and recovery paths. [`format_image`] lays down a fresh
//! FAT32 volume for it. `mkfat` builds real image files with both.

use crate::crc::crc16_ccitt;
use crate::spi::{SpiBus, SpiSpeed};
use std::collections::VecDeque;
use std::vec::Vec;

const SECTOR: usize = 512;

struct PendingWrite {
    sector: usize,
    buf: Vec<u8>,
}

/// A simulated SD/SDHC card behind the [`SpiBus`] trait.
pub struct SimCard {
    image: Vec<u8>,
    sdhc: bool,
    acmd41_illegal: bool,
    /// When false the card sends 0xFFFF in place of real data CRCs,
    /// imitating cards that accept CMD59 and then ignore it.
    crc_capable: bool,
    crc_on: bool,
    acmd: bool,
    /// ACMD41/CMD1 "busy" answers remaining before the card reports ready.
    init_countdown: u8,
    speed: SpiSpeed,
    out: VecDeque<u8>,
    cmd: [u8; 6],
    cmd_len: usize,
    write: Option<PendingWrite>,
    // fault injection
    corrupt_reads: u32,
    drop_read_tokens: u32,
    reject_commands: u32,
    fail_writes: u32,
}

impl SimCard {
    pub fn new(image: Vec<u8>) -> Self {
        SimCard {
            image,
            sdhc: true,
            acmd41_illegal: false,
            crc_capable: true,
            crc_on: false,
            acmd: false,
            init_countdown: 1,
            speed: SpiSpeed::Init,
            out: VecDeque::new(),
            cmd: [0; 6],
            cmd_len: 0,
            write: None,
            corrupt_reads: 0,
            drop_read_tokens: 0,
            reject_commands: 0,
            fail_writes: 0,
        }
    }

    /// Byte-addressed legacy SD card instead of SDHC.
    pub fn legacy(mut self) -> Self {
        self.sdhc = false;
        self
    }

    /// A card that answers 0xFFFF for every data CRC.
    pub fn crc_incapable(mut self) -> Self {
        self.crc_capable = false;
        self
    }

    /// A card that rejects ACMD41, forcing the CMD1 fallback.
    pub fn acmd41_illegal(mut self) -> Self {
        self.acmd41_illegal = true;
        self
    }

    /// Corrupt the payload of the next `n` block reads.
    pub fn corrupt_next_reads(&mut self, n: u32) {
        self.corrupt_reads = n;
    }

    /// Swallow the start token of the next `n` block reads.
    pub fn drop_next_read_tokens(&mut self, n: u32) {
        self.drop_read_tokens = n;
    }

    /// Answer the next `n` data commands (CMD17/CMD24) with an error R1.
    pub fn reject_next_commands(&mut self, n: u32) {
        self.reject_commands = n;
    }

    /// Answer the next `n` block writes with the write-error token.
    pub fn fail_next_writes(&mut self, n: u32) {
        self.fail_writes = n;
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn into_image(self) -> Vec<u8> {
        self.image
    }

    /// The most recently programmed SPI speed.
    pub fn speed(&self) -> SpiSpeed {
        self.speed
    }

    fn process_command(&mut self) {
        let cmd = self.cmd[0] & 0x3F;
        let arg = u32::from_be_bytes([self.cmd[1], self.cmd[2], self.cmd[3], self.cmd[4]]);
        let acmd = self.acmd;
        self.acmd = false;

        match cmd {
            0 => {
                // GO_IDLE_STATE: CRC checking resets to off
                self.crc_on = false;
                self.out.push_back(0x01);
            }
            8 => {
                if self.sdhc {
                    // R1 + 4-byte echo of the check pattern
                    self.out.extend([0x01, 0x00, 0x00, 0x01, 0xAA]);
                } else {
                    self.out.push_back(0x05); // illegal command
                }
            }
            55 => {
                self.acmd = true;
                self.out.push_back(0x01);
            }
            41 if acmd => {
                if self.acmd41_illegal {
                    self.out.push_back(0x05);
                } else if self.init_countdown > 0 {
                    self.init_countdown -= 1;
                    self.out.push_back(0x01); // still busy
                } else {
                    self.out.push_back(0x00);
                }
            }
            1 => {
                if self.init_countdown > 0 {
                    self.init_countdown -= 1;
                    self.out.push_back(0x01);
                } else {
                    self.out.push_back(0x00);
                }
            }
            58 => {
                // R1 + OCR; bit 30 of the first OCR byte is CCS
                let ocr0 = if self.sdhc { 0xC0 } else { 0x80 };
                self.out.extend([0x00, ocr0, 0xFF, 0x80, 0x00]);
            }
            59 => {
                self.crc_on = arg & 1 == 1;
                self.out.push_back(0x01);
            }
            16 => {
                let r1 = if arg == SECTOR as u32 { 0x00 } else { 0x04 };
                self.out.push_back(r1);
            }
            17 => self.start_read(arg),
            24 => self.start_write(arg),
            _ => self.out.push_back(0x04),
        }
    }

    fn sector_of(&self, arg: u32) -> usize {
        if self.sdhc {
            arg as usize
        } else {
            arg as usize / SECTOR
        }
    }

    fn start_read(&mut self, arg: u32) {
        if self.reject_commands > 0 {
            self.reject_commands -= 1;
            self.out.push_back(0x04);
            return;
        }

        self.out.push_back(0x00); // R1
        if self.drop_read_tokens > 0 {
            self.drop_read_tokens -= 1;
            return; // no token ever arrives
        }

        let start = self.sector_of(arg) * SECTOR;
        let mut data = [0u8; SECTOR];
        if start + SECTOR <= self.image.len() {
            data.copy_from_slice(&self.image[start..start + SECTOR]);
        }

        let crc = if self.crc_capable {
            crc16_ccitt(&data)
        } else {
            0xFFFF
        };
        if self.corrupt_reads > 0 {
            self.corrupt_reads -= 1;
            data[0] ^= 0xFF;
        }

        self.out.push_back(0xFE);
        self.out.extend(data);
        self.out.push_back((crc >> 8) as u8);
        self.out.push_back(crc as u8);
    }

    fn start_write(&mut self, arg: u32) {
        if self.reject_commands > 0 {
            self.reject_commands -= 1;
            self.out.push_back(0x04);
            return;
        }

        self.out.push_back(0x00); // R1
        self.write = Some(PendingWrite {
            sector: self.sector_of(arg),
            buf: Vec::with_capacity(1 + SECTOR + 2),
        });
    }

    fn finish_write(&mut self, pending: PendingWrite) {
        let token = pending.buf[0];
        let data = &pending.buf[1..1 + SECTOR];
        let sent_crc = ((pending.buf[1 + SECTOR] as u16) << 8) | pending.buf[2 + SECTOR] as u16;

        if token != 0xFE || self.fail_writes > 0 {
            if self.fail_writes > 0 {
                self.fail_writes -= 1;
            }
            self.out.extend([0x0D, 0x00]); // write error + one busy byte
            return;
        }

        if self.crc_on && sent_crc != crc16_ccitt(data) {
            self.out.extend([0x0B, 0x00]); // CRC rejected
            return;
        }

        let start = pending.sector * SECTOR;
        if start + SECTOR <= self.image.len() {
            self.image[start..start + SECTOR].copy_from_slice(data);
        }
        self.out.extend([0x05, 0x00]); // accepted + one busy byte
    }
}

impl SpiBus for SimCard {
    fn set_speed(&mut self, speed: SpiSpeed) {
        self.speed = speed;
    }

    fn select(&mut self, _selected: bool) {
        // chip-select gating is not modelled; the command parser keeps its
        // own framing
    }

    fn send(&mut self, byte: u8) {
        if let Some(mut pending) = self.write.take() {
            pending.buf.push(byte);
            if pending.buf.len() == 1 + SECTOR + 2 {
                self.finish_write(pending);
            } else {
                self.write = Some(pending);
            }
            return;
        }

        if self.cmd_len == 0 {
            if byte & 0xC0 == 0x40 {
                // start of a command frame; anything the host left unread is
                // stale by now
                self.out.clear();
                self.cmd[0] = byte;
                self.cmd_len = 1;
            }
            return;
        }

        self.cmd[self.cmd_len] = byte;
        self.cmd_len += 1;
        if self.cmd_len == 6 {
            self.cmd_len = 0;
            self.process_command();
        }
    }

    fn receive(&mut self) -> u8 {
        self.out.pop_front().unwrap_or(0xFF)
    }
}

// =============================================================================
// Image formatter
// =============================================================================

const PARTITION_START: u32 = 64;
const RESERVED_SECTORS: u32 = 32;

fn put16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Build a freshly formatted FAT32 image: MBR with a single type-0x0C
/// partition, volume ID, FS info sector, twin FATs, and an empty root
/// directory.
///
/// `sectors_per_cluster` must be a power of two in 1..=128, and the image
/// must be large enough to hold the metadata plus at least a few clusters.
pub fn format_image(total_sectors: u32, sectors_per_cluster: u8) -> Vec<u8> {
    assert!(sectors_per_cluster.is_power_of_two());
    assert!(total_sectors > PARTITION_START + RESERVED_SECTORS + 64);

    let partition_sectors = total_sectors - PARTITION_START;
    // slight overestimate of the FAT size; keeps the math one-shot
    let sectors_per_fat = (partition_sectors / sectors_per_cluster as u32 + 2).div_ceil(128);
    let data_sectors = partition_sectors - RESERVED_SECTORS - 2 * sectors_per_fat;
    let cluster_count = data_sectors / sectors_per_cluster as u32;

    let mut image = Vec::new();
    image.resize(total_sectors as usize * SECTOR, 0u8);

    // MBR: one FAT32-LBA partition
    let entry = 446;
    image[entry + 4] = 0x0C;
    put32(&mut image, entry + 8, PARTITION_START);
    put32(&mut image, entry + 12, partition_sectors);
    put16(&mut image, 510, 0xAA55);

    // volume ID
    let vbr = PARTITION_START as usize * SECTOR;
    image[vbr..vbr + 3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    image[vbr + 3..vbr + 11].copy_from_slice(b"MKFAT1.0");
    put16(&mut image, vbr + 11, SECTOR as u16);
    image[vbr + 13] = sectors_per_cluster;
    put16(&mut image, vbr + 14, RESERVED_SECTORS as u16);
    image[vbr + 16] = 2; // number of FATs
    image[vbr + 21] = 0xF8; // media type
    put16(&mut image, vbr + 24, 63); // sectors per track
    put16(&mut image, vbr + 26, 255); // heads
    put32(&mut image, vbr + 28, 0); // hidden sectors
    put32(&mut image, vbr + 32, partition_sectors);
    put32(&mut image, vbr + 36, sectors_per_fat);
    put32(&mut image, vbr + 44, 2); // root directory cluster
    put16(&mut image, vbr + 48, 1); // FS info sector
    put16(&mut image, vbr + 50, 6); // backup boot sector
    image[vbr + 64] = 0x80; // drive number
    image[vbr + 66] = 0x29; // extended boot signature
    put32(&mut image, vbr + 67, 0x1A2B_3C4D); // volume serial
    image[vbr + 71..vbr + 82].copy_from_slice(b"NO NAME    ");
    image[vbr + 82..vbr + 90].copy_from_slice(b"FAT32   ");
    put16(&mut image, vbr + 510, 0xAA55);

    // FS info sector
    let fsi = (PARTITION_START + 1) as usize * SECTOR;
    put32(&mut image, fsi, 0x4161_5252);
    put32(&mut image, fsi + 484, 0x6141_7272);
    put32(&mut image, fsi + 488, cluster_count - 1); // root takes one
    put32(&mut image, fsi + 492, 3);
    put16(&mut image, fsi + 510, 0xAA55);

    // backup boot region
    let backup = (PARTITION_START + 6) as usize * SECTOR;
    let vbr_copy = image[vbr..vbr + SECTOR].to_vec();
    image[backup..backup + SECTOR].copy_from_slice(&vbr_copy);
    let fsi_copy = image[fsi..fsi + SECTOR].to_vec();
    image[backup + SECTOR..backup + 2 * SECTOR].copy_from_slice(&fsi_copy);

    // twin FATs: media/reserved head entries plus the root chain terminator
    let fat_start = PARTITION_START + RESERVED_SECTORS;
    for copy in 0..2u32 {
        let base = (fat_start + copy * sectors_per_fat) as usize * SECTOR;
        put32(&mut image, base, 0x0FFF_FFF8);
        put32(&mut image, base + 4, 0xFFFF_FFFF);
        put32(&mut image, base + 8, 0x0FFF_FFFF);
    }

    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_image_has_signatures() {
        let image = format_image(4096, 1);
        assert_eq!(&image[510..512], &[0x55, 0xAA]);
        let vbr = PARTITION_START as usize * SECTOR;
        assert_eq!(&image[vbr + 82..vbr + 87], b"FAT32");
        assert_eq!(&image[vbr + 510..vbr + 512], &[0x55, 0xAA]);
        let fsi = vbr + SECTOR;
        assert_eq!(u32::from_le_bytes(image[fsi..fsi + 4].try_into().unwrap()), 0x4161_5252);
    }

    #[test]
    fn sim_read_returns_image_bytes() {
        // drive the card manually: CMD0 then CMD17 for sector 1
        let mut image = vec![0u8; 4 * SECTOR];
        image[SECTOR] = 0x42;
        let mut card = SimCard::new(image);

        for &b in &[0x40u8, 0, 0, 0, 0, 0x95] {
            card.send(b);
        }
        assert_eq!(card.receive(), 0x01);

        for &b in &[0x51u8, 0, 0, 0, 1, 0xFF] {
            card.send(b);
        }
        assert_eq!(card.receive(), 0x00); // R1
        assert_eq!(card.receive(), 0xFE); // data token
        assert_eq!(card.receive(), 0x42); // first payload byte
    }
}
