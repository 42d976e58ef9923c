//! Cache-backed block device.
//!
//! Sits between the FAT32 engine and the raw card: partial-block reads and
//! writes are served from the LRU cache, and every trip to the card runs
//! under the retry ladder, falling back to speed degradation when a card
//! keeps failing in unclassified ways.

use crate::cache::{BlockCache, INVALID_BLOCK};
use crate::crc::crc16_ccitt;
use crate::error::{Error, Result};
use crate::sd::{SdCard, SdResult, SdStatus, BLOCK_LEN};
use crate::spi::{SpiBus, SpiSpeed};
use log::{debug, warn};

/// Retries for an operation failing with a CRC mismatch.
const CRC_RETRIES: u8 = 8;
/// Retries for an operation timing out.
const TIMEOUT_RETRIES: u8 = 5;
/// Retries for an unclassified failure before attempting recovery.
const UNKNOWN_RETRIES: u8 = 2;

/// Whether to run the card with CRC protection on every transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcMode {
    UseCrc,
    NoCrc,
}

pub struct BlockDevice<S: SpiBus, const N: usize> {
    card: SdCard<S>,
    cache: BlockCache<N>,
    initialized: bool,
    crc_mode: CrcMode,
    /// Re-read each written block's CRC and compare it against what was sent.
    verify_writes: bool,
    hits: u32,
    misses: u32,
    writebacks: u32,
}

/// Run `op` under the retry ladder: bounded retries per failure class, with
/// a resync + speed-step-down + re-init pass when unclassified errors keep
/// coming.
fn retry<S: SpiBus, T>(
    card: &mut SdCard<S>,
    crc_mode: CrcMode,
    mut op: impl FnMut(&mut SdCard<S>) -> SdResult<T>,
) -> Result<T> {
    let mut crc_retries = CRC_RETRIES;
    let mut timeout_retries = TIMEOUT_RETRIES;
    let mut unknown_retries = UNKNOWN_RETRIES;

    loop {
        match op(card) {
            Ok(value) => return Ok(value),
            Err(SdStatus::BadCrc) => {
                if crc_retries == 0 {
                    return Err(Error::Crc);
                }
                crc_retries -= 1;
            }
            Err(SdStatus::Timeout) => {
                if timeout_retries == 0 {
                    return Err(Error::Timeout);
                }
                timeout_retries -= 1;
            }
            Err(SdStatus::Error) => {
                if unknown_retries > 0 {
                    unknown_retries -= 1;
                    continue;
                }
                if !recover(card, crc_mode) {
                    return Err(Error::Unknown);
                }
                unknown_retries = UNKNOWN_RETRIES;
            }
        }
    }
}

/// Resync the bus, drop the SPI clock one tier, and re-run the card handshake
/// at the new tier. Returns false when the clock is already at the floor or
/// the card will not come back. The cache is deliberately left alone: any
/// committed writes it holds are still pending.
fn recover<S: SpiBus>(card: &mut SdCard<S>, crc_mode: CrcMode) -> bool {
    warn!("error recovery: resyncing and reducing SPI speed");

    card.resync();
    let lower = match card.speed().step_down() {
        Some(speed) => speed,
        None => {
            debug!("recovery failed: already at minimum speed");
            return false;
        }
    };
    card.set_speed(lower);
    card.resync();

    let reinit = card.reset().is_ok()
        && (crc_mode == CrcMode::NoCrc || card.enable_crc().is_ok())
        && card.initialize().is_ok()
        && card.set_block_length().is_ok();

    if !reinit {
        debug!("recovery failed: card did not re-initialize");
        return false;
    }

    card.resync();
    debug!("recovery OK, card running at {:?}", lower);
    true
}

impl<S: SpiBus, const N: usize> BlockDevice<S, N> {
    pub fn new(spi: S) -> Self {
        BlockDevice {
            card: SdCard::new(spi),
            cache: BlockCache::new(),
            initialized: false,
            crc_mode: CrcMode::UseCrc,
            verify_writes: false,
            hits: 0,
            misses: 0,
            writebacks: 0,
        }
    }

    /// Bring the card up: reset at init speed, enable CRC if asked, run the
    /// init handshake, set the block length, then probe whether the card
    /// really honours CRC before jumping to full speed.
    pub fn init(&mut self, crc_mode: CrcMode) -> Result<()> {
        self.cache.reset();
        self.crc_mode = crc_mode;
        self.initialized = false;

        self.card.set_speed(SpiSpeed::Init);
        self.card.reset().map_err(|_| Error::Reset)?;

        if crc_mode == CrcMode::UseCrc {
            self.card.enable_crc().map_err(|_| Error::EnableCrc)?;
        }

        self.card.initialize().map_err(|_| Error::Init)?;
        self.card.set_block_length().map_err(|_| Error::BlockLength)?;

        self.initialized = true;

        // start at the minimum usable speed and check whether the card
        // actually returns CRCs; some accept CMD59 and then answer 0xFFFF
        // for every block
        self.card.set_speed(SpiSpeed::Min);
        if crc_mode == CrcMode::UseCrc {
            let mut probe = [0u8; 1];
            if let Err(e) = self.read_partial(0, 0, &mut probe) {
                if e == Error::Crc && self.card.last_crc() == 0xFFFF {
                    return Err(Error::EnableCrc);
                }
                return Err(e);
            }
        }

        self.card.set_speed(SpiSpeed::High);

        // fresh session, fresh statistics
        self.hits = 0;
        self.misses = 0;
        self.writebacks = 0;
        Ok(())
    }

    /// Final resync and reset at unmount; the caller flushes first.
    pub fn shutdown(&mut self) -> Result<()> {
        self.card.resync();
        self.card.reset().map_err(|_| Error::Reset)?;
        self.initialized = false;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_verify_writes(&mut self, verify: bool) {
        self.verify_writes = verify;
    }

    /// Total block-level card accesses so far.
    pub fn block_accesses(&self) -> u32 {
        self.card.block_accesses()
    }

    /// Cache statistics: (hits, misses, writebacks, resident blocks).
    pub fn cache_stats(&self) -> (u32, u32, u32, usize) {
        (self.hits, self.misses, self.writebacks, self.cache.resident())
    }

    pub fn bus_mut(&mut self) -> &mut S {
        self.card.bus_mut()
    }

    pub(crate) fn release(self) -> S {
        self.card.release()
    }

    /// Commit one cache slot to the card if it is valid and dirty.
    fn write_slot(&mut self, index: u8) -> Result<()> {
        let (block, dirty) = {
            let slot = self.cache.slot(index);
            (slot.block, slot.dirty)
        };

        // flushing a partially-used cache hits unused slots; nothing to do
        if block == INVALID_BLOCK || !dirty {
            return Ok(());
        }

        debug!("committing write to block {}", block);
        self.writebacks += 1;

        let crc_mode = self.crc_mode;
        let verify = self.verify_writes && crc_mode == CrcMode::UseCrc;
        let mut verify_retries = CRC_RETRIES;

        loop {
            {
                let slot = self.cache.slot(index);
                retry(&mut self.card, crc_mode, |card| {
                    card.write_block(slot.block, &slot.data)
                })?;
            }

            if verify {
                let written_crc = crc16_ccitt(&self.cache.slot(index).data);
                let returned_crc = self.read_block_crc(block)?;
                if written_crc != returned_crc {
                    debug!(
                        "write verification failed: sent {:#06x}, read {:#06x}",
                        written_crc, returned_crc
                    );
                    if verify_retries == 0 {
                        return Err(Error::Crc);
                    }
                    verify_retries -= 1;
                    continue;
                }
            }
            break;
        }

        self.cache.slot_mut(index).dirty = false;
        Ok(())
    }

    /// Make `block` resident and most recently used; returns its slot.
    fn ensure_resident(&mut self, block: u32) -> Result<u8> {
        if let Some(index) = self.cache.lookup(block) {
            self.cache.move_to_head(index)?;
            self.hits += 1;
            return Ok(index);
        }

        self.misses += 1;
        debug!("cache miss for block {}", block);

        let index = self.cache.remove_least_used();
        let (evicted_block, evicted_dirty) = {
            let slot = self.cache.slot(index);
            (slot.block, slot.dirty)
        };

        if evicted_block != INVALID_BLOCK && evicted_dirty {
            debug!(
                "loading block {} forces commit of cached block {}",
                block, evicted_block
            );
            if let Err(e) = self.write_slot(index) {
                // put the dirty slot back so the pending write is not lost
                self.cache.add_as_head(index);
                return Err(e);
            }
        }

        {
            let slot = self.cache.slot_mut(index);
            slot.block = block;
            slot.dirty = false;
        }
        self.cache.add_as_head(index);

        let crc_mode = self.crc_mode;
        let result = {
            let slot = self.cache.slot_mut(index);
            retry(&mut self.card, crc_mode, |card| {
                card.read_block(block, &mut slot.data)
            })
        };

        if let Err(e) = result {
            // never serve ghost data from a slot whose read failed
            self.cache.slot_mut(index).block = INVALID_BLOCK;
            return Err(e);
        }
        Ok(index)
    }

    /// Copy `buf.len()` bytes out of `block` starting at `offset`.
    pub fn read_partial(&mut self, block: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        if !self.initialized {
            return Err(Error::CardUninit);
        }
        if offset + buf.len() > BLOCK_LEN {
            return Err(Error::TooFar);
        }

        let index = self.ensure_resident(block)?;
        buf.copy_from_slice(&self.cache.slot(index).data[offset..offset + buf.len()]);
        Ok(())
    }

    /// Splice `buf` into `block` at `offset`. The write stays in the cache
    /// until the slot is evicted or flushed.
    pub fn write_partial(&mut self, block: u32, offset: usize, buf: &[u8]) -> Result<()> {
        if !self.initialized {
            return Err(Error::CardUninit);
        }
        if offset + buf.len() > BLOCK_LEN {
            return Err(Error::TooFar);
        }

        let index = self.ensure_resident(block)?;
        let slot = self.cache.slot_mut(index);
        slot.data[offset..offset + buf.len()].copy_from_slice(buf);
        slot.dirty = true;
        Ok(())
    }

    /// Read `block`'s CRC-16 without caching any data. Runs under the full
    /// retry ladder.
    pub fn read_block_crc(&mut self, block: u32) -> Result<u16> {
        if !self.initialized {
            return Err(Error::CardUninit);
        }
        let crc_mode = self.crc_mode;
        retry(&mut self.card, crc_mode, |card| {
            card.read_block_crc_only(block)
        })
    }

    /// Write out every dirty slot, then re-initialize the cache. Every slot
    /// is attempted even if one fails; the first failure is reported.
    pub fn flush(&mut self) -> Result<()> {
        let mut result = Ok(());
        for index in 0..N as u8 {
            if let Err(e) = self.write_slot(index) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        self.cache.reset();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCard;

    fn device<const N: usize>(sectors: usize) -> BlockDevice<SimCard, N> {
        let image = vec![0u8; sectors * BLOCK_LEN];
        let mut dev = BlockDevice::new(SimCard::new(image));
        dev.init(CrcMode::UseCrc).unwrap();
        dev
    }

    #[test]
    fn init_raises_speed_to_high() {
        let dev: BlockDevice<SimCard, 2> = device(8);
        assert!(dev.is_initialized());
        assert_eq!(dev.card.speed(), SpiSpeed::High);
    }

    #[test]
    fn crc_incapable_card_fails_init() {
        let image = vec![0u8; 8 * BLOCK_LEN];
        let mut dev: BlockDevice<SimCard, 2> =
            BlockDevice::new(SimCard::new(image).crc_incapable());
        assert_eq!(dev.init(CrcMode::UseCrc), Err(Error::EnableCrc));
    }

    #[test]
    fn uninitialized_device_refuses_io() {
        let image = vec![0u8; 8 * BLOCK_LEN];
        let mut dev: BlockDevice<SimCard, 2> = BlockDevice::new(SimCard::new(image));
        let mut buf = [0u8; 4];
        assert_eq!(dev.read_partial(0, 0, &mut buf), Err(Error::CardUninit));
    }

    #[test]
    fn partial_write_is_visible_before_any_flush() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        dev.write_partial(5, 100, b"hello").unwrap();
        let mut back = [0u8; 5];
        dev.read_partial(5, 100, &mut back).unwrap();
        assert_eq!(&back, b"hello");
        // the card itself has not been written yet
        assert_eq!(&dev.bus_mut().image()[5 * 512 + 100..5 * 512 + 105], [0; 5]);
    }

    #[test]
    fn out_of_block_access_is_rejected() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        let mut buf = [0u8; 8];
        assert_eq!(dev.read_partial(0, 508, &mut buf), Err(Error::TooFar));
        assert_eq!(dev.write_partial(0, 510, &[0; 8]), Err(Error::TooFar));
    }

    #[test]
    fn eviction_commits_the_dirty_tail() {
        let mut dev: BlockDevice<SimCard, 1> = device(8);
        dev.write_partial(3, 0, b"evict me").unwrap();
        // touching a different block forces the single slot out
        let mut buf = [0u8; 1];
        dev.read_partial(4, 0, &mut buf).unwrap();
        assert_eq!(&dev.bus_mut().image()[3 * 512..3 * 512 + 8], b"evict me");
    }

    #[test]
    fn flush_writes_all_dirty_slots_and_resets() {
        let mut dev: BlockDevice<SimCard, 4> = device(8);
        dev.write_partial(1, 0, b"one").unwrap();
        dev.write_partial(2, 0, b"two").unwrap();
        dev.flush().unwrap();
        assert_eq!(&dev.bus_mut().image()[512..515], b"one");
        assert_eq!(&dev.bus_mut().image()[1024..1027], b"two");
        let (_, _, writebacks, resident) = dev.cache_stats();
        assert_eq!(writebacks, 2);
        assert_eq!(resident, 0);
    }

    #[test]
    fn crc_errors_are_retried() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        dev.bus_mut().corrupt_next_reads(3);
        let mut buf = [0u8; 4];
        dev.read_partial(6, 0, &mut buf).unwrap();
    }

    #[test]
    fn crc_retry_budget_is_bounded() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        // one initial attempt plus eight retries, all corrupted
        dev.bus_mut().corrupt_next_reads(9);
        let mut buf = [0u8; 4];
        assert_eq!(dev.read_partial(6, 0, &mut buf), Err(Error::Crc));
    }

    #[test]
    fn failed_miss_leaves_no_ghost_block() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        // one attempt plus five retries, all swallowed
        dev.bus_mut().drop_next_read_tokens(6);
        let mut buf = [0u8; 4];
        assert_eq!(dev.read_partial(6, 0, &mut buf), Err(Error::Timeout));
        // only the init probe's block 0 is resident; the failed slot was
        // invalidated rather than left claiming block 6
        let (_, _, _, resident) = dev.cache_stats();
        assert_eq!(resident, 1);
        // with the fault gone the same read succeeds from the card
        dev.read_partial(6, 0, &mut buf).unwrap();
    }

    #[test]
    fn persistent_unknown_errors_degrade_speed() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        assert_eq!(dev.card.speed(), SpiSpeed::High);
        // exhaust the initial attempt and both unknown retries, then recover
        dev.bus_mut().reject_next_commands(3);
        let mut buf = [0u8; 4];
        dev.read_partial(2, 0, &mut buf).unwrap();
        assert_eq!(dev.card.speed(), SpiSpeed::Medium);
    }

    #[test]
    fn recovery_gives_up_at_the_speed_floor() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        // enough rejections to walk High -> Medium -> Low -> Min and fail
        dev.bus_mut().reject_next_commands(1000);
        let mut buf = [0u8; 4];
        assert_eq!(dev.read_partial(2, 0, &mut buf), Err(Error::Unknown));
    }

    #[test]
    fn write_errors_recover_at_reduced_speed() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        dev.write_partial(3, 0, b"stubborn").unwrap();
        // exhaust the initial attempt and both unknown retries, then recover
        dev.bus_mut().fail_next_writes(3);
        dev.flush().unwrap();
        assert_eq!(dev.card.speed(), SpiSpeed::Medium);
        assert_eq!(&dev.bus_mut().image()[3 * 512..3 * 512 + 8], b"stubborn");
    }

    #[test]
    fn persistent_write_errors_surface_unknown() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        dev.write_partial(3, 0, b"doomed").unwrap();
        // enough write errors to walk the speed ladder all the way down
        dev.bus_mut().fail_next_writes(1000);
        assert_eq!(dev.flush(), Err(Error::Unknown));
    }

    #[test]
    fn verified_write_round_trips() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        dev.set_verify_writes(true);
        dev.write_partial(1, 0, &[0xAB; 32]).unwrap();
        dev.flush().unwrap();
        assert_eq!(&dev.bus_mut().image()[512..544], &[0xAB; 32]);
    }

    #[test]
    fn cache_hides_repeated_reads() {
        let mut dev: BlockDevice<SimCard, 2> = device(8);
        let before = dev.block_accesses();
        let mut buf = [0u8; 4];
        dev.read_partial(1, 0, &mut buf).unwrap();
        dev.read_partial(1, 200, &mut buf).unwrap();
        dev.read_partial(1, 400, &mut buf).unwrap();
        assert_eq!(dev.block_accesses(), before + 1);
        let (hits, misses, _, _) = dev.cache_stats();
        assert_eq!((hits, misses), (2, 1));
    }
}
