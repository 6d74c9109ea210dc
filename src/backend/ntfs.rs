//! NTFS scanner (spec §4.5): `$Bitmap`-driven free-cluster wipe, MFT
//! record/attribute slack wipe, and undelete wiping of freed MFT records
//! plus the `$LogFile`.
//!
//! On-disk structures (boot sector BPB, MFT record header, attribute
//! headers, mapping-pairs runlists) follow the NTFS layout documented in
//! `original_source/src/wfs_ntfs.c`/`.h`. Update-sequence ("fixup") arrays
//! are applied/reverted on every MFT record read/write, matching what that
//! C code does through libntfs' `ntfs_mft_record_{read,write}`.

use crate::backend::{FsBackend, WipeContext};
use crate::block::{BlockBuffer, BlockDevice, ByteRegion};
use crate::config::BackendTag;
use crate::engine::{FillRange, PatternEngine, RegionOutcome};
use crate::error::{WipeError, WipeResult};
use crate::pattern::{PatternSource, SelectedState};
use crate::progress::WipePhase;
use crate::subprocess;
use std::collections::HashSet;
use std::path::PathBuf;

const ATTR_FILE_NAME: u32 = 0x30;
const ATTR_DATA: u32 = 0x80;
const ATTR_BITMAP: u32 = 0xB0;
const ATTR_END: u32 = 0xFFFF_FFFF;
const MFT_RECORD_MAGIC: &[u8; 4] = b"FILE";
const FIRST_USER_MFT_RECORD: u64 = 16;
const MFT_RECORD_LOGFILE: u64 = 2;
const MFT_RECORD_BITMAP: u64 = 6;
const SECTOR_SIZE: usize = 512;

struct BootSector {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    total_sectors: u64,
    mft_lcn: u64,
    record_size: u32,
}

impl BootSector {
    fn parse(raw: &[u8]) -> WipeResult<Self> {
        if raw.len() < 512 || &raw[3..7] != b"NTFS" {
            return Err(WipeError::OpenFs);
        }
        let bytes_per_sector = u16::from_le_bytes([raw[0x0B], raw[0x0C]]);
        let sectors_per_cluster = raw[0x0D];
        let total_sectors = u64::from_le_bytes(raw[0x28..0x30].try_into().unwrap());
        let mft_lcn = u64::from_le_bytes(raw[0x30..0x38].try_into().unwrap());
        let clusters_per_record = raw[0x40] as i8;
        let cluster_size = bytes_per_sector as u32 * sectors_per_cluster as u32;
        let record_size = if clusters_per_record < 0 {
            1u32 << (-clusters_per_record as u32)
        } else {
            clusters_per_record as u32 * cluster_size
        };
        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_lcn,
            record_size,
        })
    }

    fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    fn total_clusters(&self) -> u64 {
        self.total_sectors / self.sectors_per_cluster.max(1) as u64
    }
}

/// Decode an NTFS mapping-pairs runlist into `(lcn, length_in_clusters)`
/// pairs. A run with `lcn == i64::MIN` is a sparse hole.
fn decode_runlist(mp: &[u8]) -> Vec<(i64, u64)> {
    let mut runs = Vec::new();
    let mut pos = 0usize;
    let mut current_lcn: i64 = 0;

    while pos < mp.len() && mp[pos] != 0 {
        let header = mp[pos];
        let length_bytes = (header & 0x0F) as usize;
        let offset_bytes = ((header >> 4) & 0x0F) as usize;
        pos += 1;
        if pos + length_bytes > mp.len() {
            break;
        }
        let mut length: u64 = 0;
        for i in 0..length_bytes {
            length |= (mp[pos + i] as u64) << (8 * i);
        }
        pos += length_bytes;

        if offset_bytes == 0 {
            runs.push((i64::MIN, length));
            continue;
        }
        if pos + offset_bytes > mp.len() {
            break;
        }
        let mut offset: i64 = 0;
        for i in 0..offset_bytes {
            offset |= (mp[pos + i] as i64) << (8 * i);
        }
        if offset_bytes < 8 {
            let sign_bit = 1i64 << (offset_bytes * 8 - 1);
            if offset & sign_bit != 0 {
                offset -= 1i64 << (offset_bytes * 8);
            }
        }
        pos += offset_bytes;
        current_lcn += offset;
        runs.push((current_lcn, length));
    }
    runs
}

struct AttrHeader {
    atype: u32,
    length: u32,
    non_resident: bool,
    name_length: u8,
    offset: usize,
}

fn parse_attr_header(record: &[u8], offset: usize) -> Option<AttrHeader> {
    if offset + 8 > record.len() {
        return None;
    }
    let atype = u32::from_le_bytes(record[offset..offset + 4].try_into().unwrap());
    if atype == ATTR_END {
        return None;
    }
    let length = u32::from_le_bytes(record[offset + 4..offset + 8].try_into().unwrap());
    if length == 0 || offset + length as usize > record.len() {
        return None;
    }
    Some(AttrHeader {
        atype,
        length,
        non_resident: record[offset + 8] != 0,
        name_length: record[offset + 9],
        offset,
    })
}

fn resident_value_range(record: &[u8], attr: &AttrHeader) -> (usize, usize) {
    let value_length = u32::from_le_bytes(
        record[attr.offset + 16..attr.offset + 20].try_into().unwrap(),
    ) as usize;
    let value_offset =
        u16::from_le_bytes([record[attr.offset + 20], record[attr.offset + 21]]) as usize;
    (attr.offset + value_offset, value_length)
}

fn non_resident_runlist<'a>(record: &'a [u8], attr: &AttrHeader) -> &'a [u8] {
    let mp_offset = u16::from_le_bytes([
        record[attr.offset + 32],
        record[attr.offset + 33],
    ]) as usize;
    &record[attr.offset + mp_offset..attr.offset + attr.length as usize]
}

fn non_resident_data_size(record: &[u8], attr: &AttrHeader) -> u64 {
    u64::from_le_bytes(record[attr.offset + 48..attr.offset + 56].try_into().unwrap())
}

fn non_resident_allocated_size(record: &[u8], attr: &AttrHeader) -> u64 {
    u64::from_le_bytes(record[attr.offset + 40..attr.offset + 48].try_into().unwrap())
}

/// Clusters per compression unit, decoded from the non-resident header's
/// `compression_unit` byte (a power-of-two exponent; 0 means not compressed).
fn compression_unit_clusters(record: &[u8], attr: &AttrHeader) -> u64 {
    let cu = record[attr.offset + 34];
    if cu == 0 {
        0
    } else {
        1u64 << cu
    }
}

/// Positioned read of `out.len()` bytes at attribute-relative byte offset
/// `vcn_offset`, following `runs` across run boundaries. Fails if the
/// range touches a sparse hole or runs past the end of `runs`.
fn attr_pread(
    device: &mut BlockDevice,
    runs: &[(i64, u64)],
    cluster_size: u64,
    vcn_offset: u64,
    out: &mut [u8],
) -> Result<(), ()> {
    let mut done = 0usize;
    let mut pos = vcn_offset;
    while done < out.len() {
        let vcn = pos / cluster_size;
        let in_cluster = pos % cluster_size;
        let mut cum_vcn = 0u64;
        let mut found = None;
        for (lcn, len) in runs {
            if vcn >= cum_vcn && vcn < cum_vcn + len {
                found = Some((*lcn, cum_vcn, *len));
                break;
            }
            cum_vcn += len;
        }
        let Some((lcn, run_start_vcn, run_len)) = found else {
            return Err(());
        };
        if lcn == i64::MIN {
            return Err(());
        }
        let phys_offset = lcn as u64 * cluster_size + (vcn - run_start_vcn) * cluster_size + in_cluster;
        let run_end_byte = (run_start_vcn + run_len) * cluster_size;
        let avail = ((run_end_byte - pos).min((out.len() - done) as u64)) as usize;
        device.read_at(&mut out[done..done + avail], phys_offset).map_err(|_| ())?;
        done += avail;
        pos += avail as u64;
    }
    Ok(())
}

/// Write counterpart of [`attr_pread`].
fn attr_pwrite(
    device: &mut BlockDevice,
    runs: &[(i64, u64)],
    cluster_size: u64,
    vcn_offset: u64,
    data: &[u8],
) -> Result<(), ()> {
    let mut done = 0usize;
    let mut pos = vcn_offset;
    while done < data.len() {
        let vcn = pos / cluster_size;
        let in_cluster = pos % cluster_size;
        let mut cum_vcn = 0u64;
        let mut found = None;
        for (lcn, len) in runs {
            if vcn >= cum_vcn && vcn < cum_vcn + len {
                found = Some((*lcn, cum_vcn, *len));
                break;
            }
            cum_vcn += len;
        }
        let Some((lcn, run_start_vcn, run_len)) = found else {
            return Err(());
        };
        if lcn == i64::MIN {
            return Err(());
        }
        let phys_offset = lcn as u64 * cluster_size + (vcn - run_start_vcn) * cluster_size + in_cluster;
        let run_end_byte = (run_start_vcn + run_len) * cluster_size;
        let avail = ((run_end_byte - pos).min((data.len() - done) as u64)) as usize;
        device.write_at(&data[done..done + avail], phys_offset).map_err(|_| ())?;
        done += avail;
        pos += avail as u64;
    }
    Ok(())
}

/// Apply the update-sequence ("fixup") array in place: the last two bytes
/// of every 512-byte sector hold a copy of `usn`, swapped at read time for
/// the real trailing bytes stored in the array right after the record
/// header.
fn apply_read_fixup(record: &mut [u8]) {
    let usa_offset = u16::from_le_bytes([record[4], record[5]]) as usize;
    let usa_count = u16::from_le_bytes([record[6], record[7]]) as usize;
    if usa_count == 0 || usa_offset + usa_count * 2 > record.len() {
        return;
    }
    for i in 1..usa_count {
        let sector_end = i * SECTOR_SIZE;
        if sector_end > record.len() {
            break;
        }
        let saved = [record[usa_offset + i * 2], record[usa_offset + i * 2 + 1]];
        record[sector_end - 2] = saved[0];
        record[sector_end - 1] = saved[1];
    }
}

/// Inverse of [`apply_read_fixup`]: stash the real trailing sector bytes
/// back into the USA slots and restamp the sentinel value before writing.
fn apply_write_fixup(record: &mut [u8]) {
    let usa_offset = u16::from_le_bytes([record[4], record[5]]) as usize;
    let usa_count = u16::from_le_bytes([record[6], record[7]]) as usize;
    if usa_count == 0 || usa_offset + usa_count * 2 > record.len() {
        return;
    }
    let usn = [record[usa_offset], record[usa_offset + 1]];
    for i in 1..usa_count {
        let sector_end = i * SECTOR_SIZE;
        if sector_end > record.len() {
            break;
        }
        record[usa_offset + i * 2] = record[sector_end - 2];
        record[usa_offset + i * 2 + 1] = record[sector_end - 1];
        record[sector_end - 2] = usn[0];
        record[sector_end - 1] = usn[1];
    }
}

pub struct NtfsBackend {
    device: BlockDevice,
    device_path: PathBuf,
    boot: BootSector,
    nr_mft_records: u64,
    bitmap_lcn: u64,
    bitmap_cache: Option<(u64, Vec<u8>)>,
    source: PatternSource,
    dirty: bool,
}

impl NtfsBackend {
    pub fn open(
        mut device: BlockDevice,
        device_path: PathBuf,
        block_size_override: Option<u64>,
    ) -> WipeResult<Self> {
        let mut raw = vec![0u8; 512];
        device.read_at(&mut raw, 0).map_err(|_| WipeError::OpenFs)?;
        let boot = BootSector::parse(&raw)?;
        let cluster_size = block_size_override.unwrap_or_else(|| boot.cluster_size());

        let mft_record0 = read_record_raw(&mut device, boot.mft_lcn * cluster_size, boot.record_size)?;
        let data_attr = find_attribute(&mft_record0, 20, ATTR_DATA, 0)
            .ok_or(WipeError::AttrOpen)?;
        let mft_data_size = if data_attr.non_resident {
            non_resident_data_size(&mft_record0, &data_attr)
        } else {
            resident_value_range(&mft_record0, &data_attr).1 as u64
        };
        let nr_mft_records = mft_data_size / boot.record_size as u64;

        let bitmap_record = read_record_raw(
            &mut device,
            boot.mft_lcn * cluster_size + MFT_RECORD_BITMAP * boot.record_size as u64,
            boot.record_size,
        )?;
        let bitmap_attr = find_attribute(&bitmap_record, 20, ATTR_DATA, 0)
            .ok_or(WipeError::AttrOpen)?;
        let bitmap_lcn = if bitmap_attr.non_resident {
            let runs = decode_runlist(non_resident_runlist(&bitmap_record, &bitmap_attr));
            runs.first().map(|(lcn, _)| *lcn).unwrap_or(0).max(0) as u64
        } else {
            0
        };

        Ok(Self {
            device,
            device_path,
            boot,
            nr_mft_records,
            bitmap_lcn,
            bitmap_cache: None,
            source: PatternSource::new(),
            dirty: false,
        })
    }

    fn cluster_size(&self) -> u64 {
        self.boot.cluster_size()
    }

    fn read_mft_record(&mut self, index: u64) -> WipeResult<Vec<u8>> {
        let offset = self.boot.mft_lcn * self.cluster_size() + index * self.boot.record_size as u64;
        read_record_raw(&mut self.device, offset, self.boot.record_size)
    }

    fn write_mft_record(&mut self, index: u64, mut record: Vec<u8>) -> WipeResult<()> {
        apply_write_fixup(&mut record);
        let offset = self.boot.mft_lcn * self.cluster_size() + index * self.boot.record_size as u64;
        self.device.write_at(&record, offset).map_err(|_| WipeError::BlockWrite)
    }

    /// Refresh the one-window `$Bitmap` cache (spec §4.5: "a small static
    /// cache holds one 512-byte window"), assuming a single-run `$Bitmap`
    /// data stream (documented simplification, `DESIGN.md`).
    fn bitmap_window_for(&mut self, cluster: u64) -> WipeResult<()> {
        let window_clusters = SECTOR_SIZE as u64 * 8;
        let window_start = (cluster / window_clusters) * window_clusters;
        if let Some((start, _)) = &self.bitmap_cache {
            if *start == window_start {
                return Ok(());
            }
        }
        let mut window = vec![0xFFu8; SECTOR_SIZE];
        let byte_offset = window_start / 8;
        let disk_offset = self.bitmap_lcn * self.cluster_size() + byte_offset;
        // Best-effort: short reads near EOF keep the 0xFF pad (treated as
        // in-use, the safe default for bits beyond the real bitmap).
        let _ = self.device.read_at(&mut window, disk_offset);
        self.bitmap_cache = Some((window_start, window));
        Ok(())
    }

    fn is_cluster_free(&mut self, cluster: u64) -> WipeResult<bool> {
        self.bitmap_window_for(cluster)?;
        let window_clusters = SECTOR_SIZE as u64 * 8;
        let window_start = (cluster / window_clusters) * window_clusters;
        let bit = (cluster - window_start) as usize;
        let (_, window) = self.bitmap_cache.as_ref().unwrap();
        Ok((window[bit / 8] >> (bit % 8)) & 1 == 0)
    }

    fn wipe_free_space_cluster_major(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        let cluster_size = self.cluster_size();
        let total = self.boot.total_clusters();
        let mut buffer = BlockBuffer::new(cluster_size as usize);
        let mut selected = SelectedState::new();

        for cluster in 0..total {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            if !self.is_cluster_free(cluster)? {
                continue;
            }
            let mut engine = PatternEngine::new(&mut self.source, ctx.cancel);
            let mut region =
                ByteRegion::new(&mut self.device, cluster * cluster_size, Some(cluster));
            let outcome = engine.wipe_region(
                &mut region,
                &mut buffer,
                FillRange::full(cluster_size as usize),
                &mut selected,
                ctx.options.pass_count,
                ctx.options.no_wipe_zero_blocks,
                ctx.options.zero_pass,
            )?;
            if matches!(outcome, RegionOutcome::Cancelled) {
                return Err(WipeError::Signal);
            }
            self.dirty = true;
            ctx.progress
                .update(WipePhase::FreeSpace, (cluster as f64 / total.max(1) as f64 * 100.0).min(99.9));
        }
        ctx.progress.update(WipePhase::FreeSpace, 100.0);
        Ok(())
    }

    /// Pass-major ordering (spec §9 preserved open question): every free
    /// cluster receives pass `p` before any free cluster receives pass
    /// `p+1`, tracking zero-skips discovered during pass 0 in a side set so
    /// later passes still honour `no_wipe_zero_blocks`.
    fn wipe_free_space_pattern_major(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        let cluster_size = self.cluster_size();
        let total = self.boot.total_clusters();
        let pass_count = ctx.options.pass_count;
        let mut skipped: HashSet<u64> = HashSet::new();
        let mut buffer = BlockBuffer::new(cluster_size as usize);

        for pass in 0..pass_count {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            let mut selected = SelectedState::new();
            for cluster in 0..total {
                if ctx.cancel.is_set() {
                    return Err(WipeError::Signal);
                }
                if skipped.contains(&cluster) || !self.is_cluster_free(cluster)? {
                    continue;
                }

                if pass == 0 && ctx.options.no_wipe_zero_blocks {
                    self.device
                        .read_at(buffer.as_mut_slice(), cluster * cluster_size)
                        .map_err(|_| WipeError::BlockRead)?;
                    if buffer.is_all_zero() {
                        skipped.insert(cluster);
                        continue;
                    }
                }

                self.source
                    .fill(buffer.as_mut_slice(), pass, pass_count, &mut selected);
                self.device
                    .write_at(buffer.as_slice(), cluster * cluster_size)
                    .map_err(|_| WipeError::BlockWrite)?;
                self.dirty = true;
            }
            if pass_count > 1 {
                self.device.flush().map_err(|_| WipeError::FlushFs)?;
            }
            ctx.progress
                .update(WipePhase::FreeSpace, (pass as f64 / pass_count as f64 * 100.0).min(99.9));
        }

        if ctx.options.zero_pass {
            buffer.zero();
            for cluster in 0..total {
                if skipped.contains(&cluster) || !self.is_cluster_free(cluster)? {
                    continue;
                }
                self.device
                    .write_at(buffer.as_slice(), cluster * cluster_size)
                    .map_err(|_| WipeError::BlockWrite)?;
            }
        }
        ctx.progress.update(WipePhase::FreeSpace, 100.0);
        Ok(())
    }

    /// Scans a compressed non-resident `$DATA` attribute's runlist for
    /// compression-unit boundaries (per-run-end-of-compression-unit holes,
    /// or the attribute's own tail) and wipes the slack bytes a `ntfs-3g`
    /// style compression leaves unscanned: past the last real compressed
    /// block's length-prefixed data, up to the compression-unit or
    /// attribute boundary. Ported from `wipe_compressed_attribute` in
    /// `original_source/src/wfs_ntfs.c`.
    fn wipe_compressed_attribute(
        &mut self,
        record: &[u8],
        attr: &AttrHeader,
        selected: &mut SelectedState,
        ctx: &mut WipeContext,
    ) -> WipeResult<()> {
        let cluster_size = self.cluster_size();
        let cu_clusters = compression_unit_clusters(record, attr);
        if cu_clusters == 0 {
            return Ok(());
        }
        let cu_mask = cu_clusters - 1;
        let allocated_size = non_resident_allocated_size(record, attr);
        let data_size = non_resident_data_size(record, attr);
        let runs = decode_runlist(non_resident_runlist(record, attr));

        let mut cur_vcn = 0u64;
        for (i, &(lcn, len)) in runs.iter().enumerate() {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            cur_vcn += len;
            let is_last = i + 1 == runs.len();
            let is_hole = lcn == i64::MIN;
            // Only a compression-unit-aligned end of a hole run, or the
            // very end of the attribute, is a boundary worth inspecting.
            if (cur_vcn & cu_mask) != 0 || (!is_last && !is_hole) {
                continue;
            }

            let (tail_offset, tail_len) = if is_hole {
                let hole_start_vcn = cur_vcn - len;
                let aligned_start = hole_start_vcn & !cu_mask;
                if aligned_start == hole_start_vcn {
                    continue;
                }
                // Merge backward through any preceding contiguous holes to
                // find where this sparse region actually begins.
                let mut hole_begin_vcn = hole_start_vcn;
                let mut j = i;
                while j > 0 && runs[j - 1].0 == i64::MIN {
                    j -= 1;
                    hole_begin_vcn -= runs[j].1;
                }
                let hole_begin_byte = hole_begin_vcn * cluster_size;
                let mut offset = aligned_start * cluster_size;

                let tail_start = loop {
                    if ctx.cancel.is_set() {
                        return Err(WipeError::Signal);
                    }
                    let mut header = [0u8; 2];
                    if attr_pread(&mut self.device, &runs, cluster_size, offset, &mut header).is_err() {
                        break None;
                    }
                    let raw = u16::from_le_bytes(header);
                    if raw == 0 {
                        break Some(offset + 2);
                    }
                    let block_size = ((raw & 0x0FFF) + 3) as u64;
                    offset += block_size;
                    if offset + 2 >= hole_begin_byte {
                        break None;
                    }
                };
                let Some(tail_start) = tail_start else { continue };
                if tail_start >= hole_begin_byte {
                    continue;
                }
                (tail_start, hole_begin_byte - tail_start)
            } else {
                let size = allocated_size.saturating_sub(data_size);
                if size == 0 {
                    continue;
                }
                ((cur_vcn * cluster_size).saturating_sub(size), size)
            };

            if tail_len == 0 {
                continue;
            }

            let mut buf = vec![0u8; tail_len as usize];
            if attr_pread(&mut self.device, &runs, cluster_size, tail_offset, &mut buf).is_err() {
                continue;
            }
            for pass in 0..ctx.options.pass_count {
                if ctx.cancel.is_set() {
                    return Err(WipeError::Signal);
                }
                self.source.fill(&mut buf, pass, ctx.options.pass_count, selected);
                attr_pwrite(&mut self.device, &runs, cluster_size, tail_offset, &buf)
                    .map_err(|_| WipeError::BlockWrite)?;
            }
            if ctx.options.zero_pass {
                buf.fill(0);
                attr_pwrite(&mut self.device, &runs, cluster_size, tail_offset, &buf)
                    .map_err(|_| WipeError::BlockWrite)?;
            }
            self.dirty = true;
        }
        Ok(())
    }

    fn wipe_slack(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        let cluster_size = self.cluster_size();
        let mut selected = SelectedState::new();

        for index in FIRST_USER_MFT_RECORD..self.nr_mft_records {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            let record = match self.read_mft_record(index) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if &record[0..4] != MFT_RECORD_MAGIC {
                continue;
            }
            let base_record = u64::from_le_bytes(record[32..40].try_into().unwrap()) & 0x0000_FFFF_FFFF_FFFF;
            if base_record != 0 {
                continue;
            }
            let first_attr_offset = u16::from_le_bytes([record[20], record[21]]) as usize;
            let Some(attr) = find_attribute(&record, first_attr_offset, ATTR_DATA, 0) else {
                continue;
            };
            if !attr.non_resident {
                continue;
            }
            let flags = u16::from_le_bytes([record[attr.offset + 12], record[attr.offset + 13]]);
            const COMPRESSED: u16 = 0x0001;
            const ENCRYPTED: u16 = 0x4000;
            if flags & COMPRESSED != 0 {
                self.wipe_compressed_attribute(&record, &attr, &mut selected, ctx)?;
                ctx.progress.update(
                    WipePhase::Slack,
                    ((index - FIRST_USER_MFT_RECORD) as f64 / self.nr_mft_records.max(1) as f64 * 100.0)
                        .min(99.9),
                );
                continue;
            }

            let data_size = non_resident_data_size(&record, &attr);
            let offset = if flags & ENCRYPTED != 0 {
                data_size.div_ceil(1024) * 1024
            } else {
                data_size
            };
            let tail_in_cluster = offset % cluster_size;
            if tail_in_cluster == 0 {
                continue;
            }
            let tail_len = cluster_size - tail_in_cluster;
            let vcn = offset / cluster_size;

            let runs = decode_runlist(non_resident_runlist(&record, &attr));
            let mut cum_vcn = 0u64;
            let mut target_lcn = None;
            for (lcn, len) in &runs {
                if vcn >= cum_vcn && vcn < cum_vcn + len {
                    if *lcn != i64::MIN {
                        target_lcn = Some(*lcn as u64 + (vcn - cum_vcn));
                    }
                    break;
                }
                cum_vcn += len;
            }
            let Some(lcn) = target_lcn else { continue };

            let mut buffer = BlockBuffer::new(cluster_size as usize);
            let mut engine = PatternEngine::new(&mut self.source, ctx.cancel);
            let disk_offset = lcn * cluster_size;
            let mut region = ByteRegion::new(&mut self.device, disk_offset, Some(lcn));
            let outcome = engine.wipe_region(
                &mut region,
                &mut buffer,
                FillRange::tail(cluster_size as usize, tail_in_cluster as usize),
                &mut selected,
                ctx.options.pass_count,
                false,
                ctx.options.zero_pass,
            )?;
            if matches!(outcome, RegionOutcome::Cancelled) {
                return Err(WipeError::Signal);
            }
            let _ = tail_len;
            self.dirty = true;
            ctx.progress.update(
                WipePhase::Slack,
                ((index - FIRST_USER_MFT_RECORD) as f64 / self.nr_mft_records.max(1) as f64 * 100.0).min(99.9),
            );
        }
        ctx.progress.update(WipePhase::Slack, 100.0);
        Ok(())
    }

    fn destroy_record(&mut self, index: u64, ctx: &mut WipeContext) -> WipeResult<()> {
        let mut record = match self.read_mft_record(index) {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };
        if &record[0..4] != MFT_RECORD_MAGIC {
            return Ok(());
        }
        let first_attr_offset = u16::from_le_bytes([record[20], record[21]]) as usize;
        let mut changed = false;
        let mut offset = first_attr_offset;

        while let Some(attr) = parse_attr_header(&record, offset) {
            let next_offset = attr.offset + attr.length as usize;
            match attr.atype {
                ATTR_FILE_NAME if !attr.non_resident => {
                    let (value_off, value_len) = resident_value_range(&record, &attr);
                    if value_len > 0 {
                        self.scrub_resident_value(&mut record, value_off, value_len, ctx)?;
                        changed = true;
                    }
                }
                ATTR_DATA if !attr.non_resident => {
                    let (value_off, value_len) = resident_value_range(&record, &attr);
                    if value_len > 0 {
                        self.scrub_resident_value(&mut record, value_off, value_len, ctx)?;
                        changed = true;
                    }
                }
                ATTR_DATA if attr.non_resident => {
                    let runs = decode_runlist(non_resident_runlist(&record, &attr));
                    let cluster_size = self.cluster_size();
                    let mut selected = SelectedState::new();
                    for (lcn, len) in runs {
                        if lcn == i64::MIN {
                            continue;
                        }
                        for c in 0..len {
                            if ctx.cancel.is_set() {
                                return Err(WipeError::Signal);
                            }
                            let cluster = lcn as u64 + c;
                            if !self.is_cluster_free(cluster).unwrap_or(true) {
                                continue;
                            }
                            let mut buffer = BlockBuffer::new(cluster_size as usize);
                            let mut engine = PatternEngine::new(&mut self.source, ctx.cancel);
                            let mut region = ByteRegion::new(
                                &mut self.device,
                                cluster * cluster_size,
                                Some(cluster),
                            );
                            engine.wipe_region(
                                &mut region,
                                &mut buffer,
                                FillRange::full(cluster_size as usize),
                                &mut selected,
                                ctx.options.pass_count,
                                false,
                                ctx.options.zero_pass,
                            )?;
                        }
                    }
                    // Overwrite then zero the non-resident size fields.
                    for field_off in [16usize, 24, 40, 48, 56] {
                        let at = attr.offset + field_off;
                        if at + 8 <= record.len() {
                            record[at..at + 8].fill(0xAA);
                        }
                    }
                    changed = true;
                }
                _ => {}
            }
            offset = next_offset;
        }

        if changed {
            self.write_mft_record(index, record)?;
            self.dirty = true;
        }
        Ok(())
    }

    fn scrub_resident_value(
        &mut self,
        record: &mut [u8],
        value_off: usize,
        value_len: usize,
        ctx: &mut WipeContext,
    ) -> WipeResult<()> {
        let mut selected = SelectedState::new();
        for pass in 0..ctx.options.pass_count {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            self.source.fill(
                &mut record[value_off..value_off + value_len],
                pass,
                ctx.options.pass_count,
                &mut selected,
            );
        }
        if ctx.options.zero_pass {
            record[value_off..value_off + value_len].fill(0);
        }
        Ok(())
    }

    fn wipe_logfile(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        let record = self.read_mft_record(MFT_RECORD_LOGFILE)?;
        let first_attr_offset = u16::from_le_bytes([record[20], record[21]]) as usize;
        let Some(attr) = find_attribute(&record, first_attr_offset, ATTR_DATA, 0) else {
            return Ok(());
        };
        if !attr.non_resident {
            return Ok(());
        }
        let data_size = non_resident_data_size(&record, &attr);
        let runs = decode_runlist(non_resident_runlist(&record, &attr));
        let cluster_size = self.cluster_size();
        let pass_count = ctx.options.pass_count + 1;
        let mut selected = SelectedState::new();

        for pass in 0..pass_count {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            let final_pass = pass == pass_count - 1;
            let mut remaining = data_size;
            for (lcn, len) in &runs {
                if *lcn == i64::MIN {
                    remaining = remaining.saturating_sub(len * cluster_size);
                    continue;
                }
                let mut buffer = BlockBuffer::new(cluster_size as usize);
                for c in 0..*len {
                    if remaining == 0 {
                        break;
                    }
                    if ctx.cancel.is_set() {
                        return Err(WipeError::Signal);
                    }
                    if final_pass {
                        buffer.as_mut_slice().fill(0xFF);
                    } else {
                        self.source
                            .fill(buffer.as_mut_slice(), pass, pass_count, &mut selected);
                    }
                    let cluster = *lcn as u64 + c;
                    self.device
                        .write_at(buffer.as_slice(), cluster * cluster_size)
                        .map_err(|_| WipeError::BlockWrite)?;
                    remaining = remaining.saturating_sub(cluster_size.min(remaining));
                }
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn wipe_undelete_native(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        let bitmap_record = self.read_mft_record(MFT_RECORD_BITMAP)?;
        let attr = find_attribute(&bitmap_record, 20, ATTR_BITMAP, 0)
            .or_else(|| find_attribute(&bitmap_record, 20, ATTR_DATA, 0))
            .ok_or(WipeError::AttrOpen)?;
        let runs = if attr.non_resident {
            decode_runlist(non_resident_runlist(&bitmap_record, &attr))
        } else {
            Vec::new()
        };
        let cluster_size = self.cluster_size();

        let mut mft_bitmap_bytes = Vec::new();
        if let Some((lcn, _)) = runs.first() {
            let needed = self.nr_mft_records.div_ceil(8);
            let mut buf = vec![0xFFu8; needed as usize];
            let _ = self
                .device
                .read_at(&mut buf, *lcn as u64 * cluster_size);
            mft_bitmap_bytes = buf;
        }

        for index in FIRST_USER_MFT_RECORD..self.nr_mft_records {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            let byte = mft_bitmap_bytes.get((index / 8) as usize).copied().unwrap_or(0xFF);
            let in_use = (byte >> (index % 8)) & 1 != 0;
            if in_use {
                continue;
            }
            self.destroy_record(index, ctx)?;
            ctx.progress.update(
                WipePhase::Undelete,
                (index as f64 / self.nr_mft_records.max(1) as f64 * 50.0).min(49.9),
            );
        }

        self.wipe_logfile(ctx)?;
        ctx.progress.update(WipePhase::Undelete, 100.0);
        Ok(())
    }
}

fn read_record_raw(device: &mut BlockDevice, offset: u64, size: u32) -> WipeResult<Vec<u8>> {
    let mut raw = vec![0u8; size as usize];
    device.read_at(&mut raw, offset).map_err(|_| WipeError::InodeRead)?;
    apply_read_fixup(&mut raw);
    Ok(raw)
}

fn find_attribute(record: &[u8], start: usize, atype: u32, min_name_len: u8) -> Option<AttrHeader> {
    let mut offset = start;
    while let Some(attr) = parse_attr_header(record, offset) {
        if attr.atype == atype && attr.name_length >= min_name_len {
            return Some(attr);
        }
        offset = attr.offset + attr.length as usize;
    }
    None
}

impl FsBackend for NtfsBackend {
    fn tag(&self) -> BackendTag {
        BackendTag::Ntfs
    }

    fn close(&mut self) -> WipeResult<()> {
        self.flush()
    }

    fn flush(&mut self) -> WipeResult<()> {
        self.device.sync_all().map_err(|_| WipeError::FlushFs)
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn check_err(&self) -> u32 {
        0
    }

    fn block_size(&self) -> u64 {
        self.cluster_size()
    }

    fn wipe_fs(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        if ctx.options.use_dedicated {
            return subprocess::run_unused(ctx.options.pass_count, &self.device_path);
        }
        match ctx.options.mode {
            crate::config::WipeMode::Pattern => self.wipe_free_space_pattern_major(ctx),
            crate::config::WipeMode::Zero => self.wipe_free_space_cluster_major(ctx),
        }
    }

    fn wipe_part(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        if ctx.options.use_dedicated {
            return subprocess::run_tails(ctx.options.pass_count, &self.device_path);
        }
        self.wipe_slack(ctx)
    }

    fn wipe_unrm(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        if ctx.options.use_dedicated {
            return subprocess::run_undel(ctx.options.pass_count, &self.device_path);
        }
        self.wipe_undelete_native(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_single_run() {
        // length_bytes=1 (len=10), offset_bytes=1 (lcn delta=100): header
        // 0x11, then 0x0A, then 0x64, terminated by 0x00.
        let mp = [0x11, 0x0A, 0x64, 0x00];
        let runs = decode_runlist(&mp);
        assert_eq!(runs, vec![(100, 10)]);
    }

    #[test]
    fn decodes_sparse_run() {
        // offset_bytes=0 marks a hole.
        let mp = [0x01, 0x05, 0x00];
        let runs = decode_runlist(&mp);
        assert_eq!(runs, vec![(i64::MIN, 5)]);
    }

    #[test]
    fn fixup_roundtrips() {
        let mut record = vec![0u8; 1024];
        record[0..4].copy_from_slice(MFT_RECORD_MAGIC);
        record[4..6].copy_from_slice(&48u16.to_le_bytes()); // usa_offset
        record[6..8].copy_from_slice(&3u16.to_le_bytes()); // usa_count (1 + 2 sectors)
        record[510] = 0xAA;
        record[511] = 0xBB;
        record[1022] = 0xCC;
        record[1023] = 0xDD;

        let mut on_disk = record.clone();
        apply_write_fixup(&mut on_disk);
        apply_read_fixup(&mut on_disk);
        assert_eq!(on_disk[510], 0xAA);
        assert_eq!(on_disk[511], 0xBB);
        assert_eq!(on_disk[1022], 0xCC);
        assert_eq!(on_disk[1023], 0xDD);
    }

    #[test]
    fn wipe_compressed_attribute_blanks_end_of_attribute_tail() {
        use crate::cancel::CancellationFlag;
        use crate::progress::NullSink;
        use std::io::Write;
        use tempfile::NamedTempFile;

        const CLUSTER_SIZE: u64 = 512;

        // Single non-hole run: lcn=5, length=2 clusters.
        let mut tmp = NamedTempFile::new().unwrap();
        let mut image = vec![0x44u8; 8192];
        tmp.write_all(&image).unwrap();
        tmp.flush().unwrap();
        let dev = BlockDevice::from_file(tmp.reopen().unwrap(), CLUSTER_SIZE);

        let mut backend = NtfsBackend {
            device: dev,
            device_path: PathBuf::new(),
            boot: BootSector {
                bytes_per_sector: 512,
                sectors_per_cluster: 1,
                total_sectors: 16,
                mft_lcn: 0,
                record_size: 1024,
            },
            nr_mft_records: 0,
            bitmap_lcn: 0,
            bitmap_cache: None,
            source: PatternSource::from_seed(9),
            dirty: false,
        };

        let attr_offset = 20usize;
        let mp_rel_offset = 72usize; // relative to attr_offset
        let mut record = vec![0u8; 256];
        record[attr_offset + 32..attr_offset + 34].copy_from_slice(&(mp_rel_offset as u16).to_le_bytes());
        record[attr_offset + 34] = 1; // compression_unit exponent -> 2 clusters/CU
        record[attr_offset + 40..attr_offset + 48].copy_from_slice(&(2 * CLUSTER_SIZE).to_le_bytes()); // allocated_size
        record[attr_offset + 48..attr_offset + 56].copy_from_slice(&612u64.to_le_bytes()); // data_size
        let mp = [0x11u8, 0x02, 0x05, 0x00]; // length=2, lcn delta=5
        record[attr_offset + mp_rel_offset..attr_offset + mp_rel_offset + mp.len()].copy_from_slice(&mp);

        let attr = AttrHeader {
            atype: ATTR_DATA,
            length: (mp_rel_offset + mp.len()) as u32,
            non_resident: true,
            name_length: 0,
            offset: attr_offset,
        };

        let cancel = CancellationFlag::new();
        let mut sink = NullSink;
        let mut ctx = WipeContext {
            cancel: &cancel,
            progress: &mut sink,
            options: crate::backend::WipeOptions {
                pass_count: 2,
                zero_pass: true,
                no_wipe_zero_blocks: false,
                use_dedicated: false,
                mode: crate::config::WipeMode::Pattern,
            },
        };
        let mut selected = SelectedState::new();
        backend
            .wipe_compressed_attribute(&record, &attr, &mut selected, &mut ctx)
            .unwrap();

        // tail_offset = data_size (612) within the attribute's VCN space;
        // physically that's lcn*cluster_size + (612 - cluster_size) = 2560+100.
        backend.device.read_at(&mut image, 0).unwrap();
        let tail_phys_start = 5 * CLUSTER_SIZE as usize + 612;
        assert!(
            image[tail_phys_start..3584].iter().all(|&b| b == 0),
            "tail slack must be zeroed by the final zero pass"
        );
        assert!(
            image[tail_phys_start - 1] == 0x44,
            "bytes before the tail must survive untouched"
        );
    }
}
