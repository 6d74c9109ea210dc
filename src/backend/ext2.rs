//! ext2/3 scanner (spec §4.4): free-block bitmap walk, slack wipe of file
//! tails, and a directory-tree walk that overwrites deleted entry names.
//!
//! On-disk layout constants are taken from the ext2 disk format as
//! documented in `original_source/` (the kernel/e2fsprogs layout the C
//! implementation parses directly via its own struct overlays); here they
//! are read field-by-field with `u32::from_le_bytes` rather than an unsafe
//! transmute, matching the manual-parsing style the pack's examples use
//! for binary formats (e.g. `cberner-fuser`'s on-wire struct decoding).

use crate::backend::{FsBackend, WipeContext};
use crate::block::{BlockBuffer, BlockDevice, ByteRegion};
use crate::config::BackendTag;
use crate::engine::{FillRange, PatternEngine};
use crate::error::{WipeError, WipeResult};
use crate::pattern::{PatternSource, SelectedState};
use crate::progress::WipePhase;
use std::collections::HashSet;

const EXT2_MAGIC: u16 = 0xEF53;
const EXT2_SUPER_OFFSET: u64 = 1024;
const EXT2_SUPER_SIZE: usize = 1024;
const EXT2_GOOD_OLD_FIRST_INO: u32 = 11;
const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;
const EXT2_S_IFDIR: u16 = 0x4000;
const EXT2_S_IFMT: u16 = 0xF000;
const EXT2_S_IFCHR: u16 = 0x2000;
const EXT2_S_IFBLK: u16 = 0x6000;
const EXT2_S_IFIFO: u16 = 0x1000;
const EXT2_S_IFSOCK: u16 = 0xC000;
const EXT2_ROOT_INO: u32 = 2;
const EXT2_N_DIRECT: usize = 12;
/// htree directory-index flag, tested in `i_flags` at inode offset 32..36.
const EXT2_INDEX_FL: u32 = 0x1000;

struct Superblock {
    inodes_count: u32,
    blocks_count: u32,
    log_block_size: u32,
    blocks_per_group: u32,
    inodes_per_group: u32,
    first_data_block: u32,
    #[allow(dead_code)]
    rev_level: u32,
    first_ino: u32,
    inode_size: u16,
}

impl Superblock {
    fn parse(raw: &[u8]) -> WipeResult<Self> {
        if raw.len() < EXT2_SUPER_SIZE {
            return Err(WipeError::OpenFs);
        }
        let magic = u16::from_le_bytes([raw[56], raw[57]]);
        if magic != EXT2_MAGIC {
            return Err(WipeError::OpenFs);
        }
        let rev_level = u32::from_le_bytes(raw[76..80].try_into().unwrap());
        let (first_ino, inode_size) = if rev_level >= 1 {
            (
                u32::from_le_bytes(raw[84..88].try_into().unwrap()),
                u16::from_le_bytes([raw[88], raw[89]]),
            )
        } else {
            (EXT2_GOOD_OLD_FIRST_INO, EXT2_GOOD_OLD_INODE_SIZE)
        };
        Ok(Self {
            inodes_count: u32::from_le_bytes(raw[0..4].try_into().unwrap()),
            blocks_count: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
            log_block_size: u32::from_le_bytes(raw[24..28].try_into().unwrap()),
            blocks_per_group: u32::from_le_bytes(raw[32..36].try_into().unwrap()),
            inodes_per_group: u32::from_le_bytes(raw[40..44].try_into().unwrap()),
            first_data_block: u32::from_le_bytes(raw[20..24].try_into().unwrap()),
            rev_level,
            first_ino,
            inode_size: if inode_size == 0 {
                EXT2_GOOD_OLD_INODE_SIZE
            } else {
                inode_size
            },
        })
    }

    fn block_size(&self) -> u64 {
        1024u64 << self.log_block_size
    }

    fn groups_count(&self) -> u32 {
        self.blocks_count.div_ceil(self.blocks_per_group.max(1))
    }
}

struct GroupDesc {
    block_bitmap: u32,
    inode_table: u32,
}

struct Inode {
    mode: u16,
    size: u32,
    #[allow(dead_code)]
    links_count: u16,
    blocks_512: u32,
    flags: u32,
    block_ptrs: [u32; 15],
}

impl Inode {
    fn parse(raw: &[u8]) -> Self {
        let mut block_ptrs = [0u32; 15];
        for (i, ptr) in block_ptrs.iter_mut().enumerate() {
            let off = 40 + i * 4;
            *ptr = u32::from_le_bytes(raw[off..off + 4].try_into().unwrap());
        }
        Self {
            mode: u16::from_le_bytes([raw[0], raw[1]]),
            size: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
            links_count: u16::from_le_bytes([raw[26], raw[27]]),
            blocks_512: u32::from_le_bytes(raw[28..32].try_into().unwrap()),
            flags: u32::from_le_bytes(raw[32..36].try_into().unwrap()),
            block_ptrs,
        }
    }

    fn is_dir(&self) -> bool {
        self.mode & EXT2_S_IFMT == EXT2_S_IFDIR
    }

    /// Device/fifo/socket inodes that reuse block-pointer slots for device
    /// numbers rather than data blocks — `ext2fs_inode_data_blocks()` in the
    /// original treats these as bogus for slack-wipe purposes.
    fn is_bogus_type(&self) -> bool {
        matches!(
            self.mode & EXT2_S_IFMT,
            EXT2_S_IFCHR | EXT2_S_IFBLK | EXT2_S_IFIFO | EXT2_S_IFSOCK
        )
    }
}

pub struct Ext2Backend {
    device: BlockDevice,
    sb: Superblock,
    groups: Vec<GroupDesc>,
    bitmap_cache: Option<(u32, Vec<u8>)>,
    source: PatternSource,
    dirty: bool,
}

impl Ext2Backend {
    pub fn open(
        device: BlockDevice,
        superblock_offset_override: u64,
        block_size_override: Option<u64>,
    ) -> WipeResult<Self> {
        let sb_offset = if superblock_offset_override == 0 {
            EXT2_SUPER_OFFSET
        } else {
            superblock_offset_override
        };
        let mut raw = vec![0u8; EXT2_SUPER_SIZE];
        device.read_at(&mut raw, sb_offset).map_err(|_| WipeError::OpenFs)?;
        let sb = Superblock::parse(&raw)?;

        let block_size = block_size_override.unwrap_or_else(|| sb.block_size());
        let groups_count = sb.groups_count();
        let gdt_block = sb.first_data_block as u64 + 1;
        let gdt_bytes = groups_count as usize * 32;
        let mut gdt_raw = vec![0u8; gdt_bytes];
        device
            .read_at(&mut gdt_raw, gdt_block * block_size)
            .map_err(|_| WipeError::BitmapRead)?;

        let mut groups = Vec::with_capacity(groups_count as usize);
        for g in 0..groups_count as usize {
            let off = g * 32;
            groups.push(GroupDesc {
                block_bitmap: u32::from_le_bytes(gdt_raw[off..off + 4].try_into().unwrap()),
                inode_table: u32::from_le_bytes(gdt_raw[off + 8..off + 12].try_into().unwrap()),
            });
        }

        Ok(Self {
            device,
            sb,
            groups,
            bitmap_cache: None,
            source: PatternSource::new(),
            dirty: false,
        })
    }

    fn block_size(&self) -> u64 {
        self.device_block_size()
    }

    fn device_block_size(&self) -> u64 {
        // Block size used for on-disk traversal is the filesystem's,
        // independent of the device's physical sector size.
        self.sb.block_size()
    }

    fn group_of_block(&self, block: u32) -> u32 {
        (block - self.sb.first_data_block) / self.sb.blocks_per_group
    }

    fn is_block_free(&mut self, block: u32) -> WipeResult<bool> {
        let group = self.group_of_block(block);
        let index_in_group = (block - self.sb.first_data_block) % self.sb.blocks_per_group;
        self.load_bitmap(group)?;
        let (_, bitmap) = self.bitmap_cache.as_ref().unwrap();
        let byte = bitmap[(index_in_group / 8) as usize];
        Ok((byte >> (index_in_group % 8)) & 1 == 0)
    }

    fn load_bitmap(&mut self, group: u32) -> WipeResult<()> {
        if let Some((cached, _)) = &self.bitmap_cache {
            if *cached == group {
                return Ok(());
            }
        }
        let block_size = self.block_size();
        let bitmap_block = self.groups[group as usize].block_bitmap as u64;
        let mut buf = vec![0u8; block_size as usize];
        self.device
            .read_at(&mut buf, bitmap_block * block_size)
            .map_err(|_| WipeError::BitmapRead)?;
        self.bitmap_cache = Some((group, buf));
        Ok(())
    }

    fn read_inode(&mut self, ino: u32) -> WipeResult<Inode> {
        let group = (ino - 1) / self.sb.inodes_per_group;
        let index_in_group = (ino - 1) % self.sb.inodes_per_group;
        let block_size = self.block_size();
        let table_block = self.groups[group as usize].inode_table as u64;
        let offset = table_block * block_size + index_in_group as u64 * self.sb.inode_size as u64;
        let mut raw = vec![0u8; 128];
        self.device.read_at(&mut raw, offset).map_err(|_| WipeError::InodeRead)?;
        Ok(Inode::parse(&raw))
    }

    /// Direct and single-indirect data blocks only; double/triple indirect
    /// extents are not followed (documented limitation, see `DESIGN.md`'s
    /// Ext2Backend entry).
    fn data_blocks(&mut self, inode: &Inode) -> WipeResult<Vec<u64>> {
        let block_size = self.block_size();
        let needed = (inode.size as u64).div_ceil(block_size) as usize;
        let mut blocks = Vec::with_capacity(needed.min(4096));

        for i in 0..needed.min(EXT2_N_DIRECT) {
            let ptr = inode.block_ptrs[i];
            if ptr != 0 {
                blocks.push(ptr as u64);
            }
        }

        if needed > EXT2_N_DIRECT {
            let indirect_ptr = inode.block_ptrs[12];
            if indirect_ptr != 0 {
                let mut raw = vec![0u8; block_size as usize];
                self.device
                    .read_at(&mut raw, indirect_ptr as u64 * block_size)
                    .map_err(|_| WipeError::BlockRead)?;
                let remaining = needed - EXT2_N_DIRECT;
                let entries_per_block = (block_size / 4) as usize;
                for i in 0..remaining.min(entries_per_block) {
                    let off = i * 4;
                    let ptr = u32::from_le_bytes(raw[off..off + 4].try_into().unwrap());
                    if ptr != 0 {
                        blocks.push(ptr as u64);
                    }
                }
            }
        }

        Ok(blocks)
    }

    fn wipe_free_space(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        let block_size = self.block_size();
        let total = self.sb.blocks_count;
        let mut buffer = BlockBuffer::new(block_size as usize);
        let mut selected = SelectedState::new();

        for block in self.sb.first_data_block..total {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            if !self.is_block_free(block)? {
                continue;
            }

            let mut engine = PatternEngine::new(&mut self.source, ctx.cancel);
            let mut region = ByteRegion::new(&mut self.device, block as u64 * block_size, Some(block as u64));
            let outcome = engine.wipe_region(
                &mut region,
                &mut buffer,
                FillRange::full(block_size as usize),
                &mut selected,
                ctx.options.pass_count,
                ctx.options.no_wipe_zero_blocks,
                ctx.options.zero_pass,
            )?;
            if matches!(outcome, crate::engine::RegionOutcome::Cancelled) {
                return Err(WipeError::Signal);
            }
            self.dirty = true;

            let pct = (block - self.sb.first_data_block) as f64 / total.max(1) as f64 * 100.0;
            ctx.progress.update(WipePhase::FreeSpace, pct.min(99.9));
        }
        ctx.progress.update(WipePhase::FreeSpace, 100.0);
        Ok(())
    }

    fn wipe_slack(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        let block_size = self.block_size();
        let last_ino = self.sb.inodes_count;
        let mut selected = SelectedState::new();

        for ino in self.sb.first_ino..=last_ino {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            let inode = self.read_inode(ino)?;
            if inode.blocks_512 == 0 || inode.flags & EXT2_INDEX_FL != 0 || inode.is_bogus_type() {
                continue;
            }
            let slack_start = (inode.size as u64) % block_size;
            if slack_start == 0 {
                continue;
            }

            let blocks = self.data_blocks(&inode)?;
            let Some(&last_block) = blocks.last() else {
                continue;
            };

            let mut buffer = BlockBuffer::new(block_size as usize);
            let mut engine = PatternEngine::new(&mut self.source, ctx.cancel);
            let mut region = ByteRegion::new(
                &mut self.device,
                last_block * block_size,
                Some(last_block),
            );
            let outcome = engine.wipe_region(
                &mut region,
                &mut buffer,
                FillRange::tail(block_size as usize, slack_start as usize),
                &mut selected,
                ctx.options.pass_count,
                false,
                ctx.options.zero_pass,
            )?;
            if matches!(outcome, crate::engine::RegionOutcome::Cancelled) {
                return Err(WipeError::Signal);
            }
            self.dirty = true;

            let pct = (ino - self.sb.first_ino) as f64 / (last_ino - self.sb.first_ino).max(1) as f64 * 100.0;
            ctx.progress.update(WipePhase::Slack, pct.min(99.9));
        }
        ctx.progress.update(WipePhase::Slack, 100.0);
        Ok(())
    }

    /// Overwrites the name bytes of deleted directory entries across one
    /// full-tree pass. A deleted entry is detected as `inode == 0` with a
    /// nonzero `name_len` — the convention used when only the inode field
    /// is cleared on unlink, leaving the name recoverable until reused.
    /// Full e2fsprogs-style slack scanning across merged `rec_len` gaps is
    /// not implemented (documented limitation, see `DESIGN.md`'s
    /// Ext2Backend entry).
    fn walk_directory_pass(
        &mut self,
        dir_ino: u32,
        pattern: &[u8],
        visited: &mut HashSet<u32>,
        cancel: &crate::cancel::CancellationFlag,
    ) -> WipeResult<()> {
        if !visited.insert(dir_ino) {
            return Ok(());
        }
        let block_size = self.block_size();
        let inode = self.read_inode(dir_ino)?;
        let blocks = self.data_blocks(&inode)?;

        let mut subdirs = Vec::new();

        for block_no in blocks {
            if cancel.is_set() {
                return Err(WipeError::Signal);
            }
            let mut raw = vec![0u8; block_size as usize];
            self.device
                .read_at(&mut raw, block_no * block_size)
                .map_err(|_| WipeError::DirIter)?;

            let mut offset = 0usize;
            let mut changed = false;
            while offset + 8 <= raw.len() {
                let child_ino = u32::from_le_bytes(raw[offset..offset + 4].try_into().unwrap());
                let rec_len = u16::from_le_bytes([raw[offset + 4], raw[offset + 5]]) as usize;
                let name_len = raw[offset + 6] as usize;
                if rec_len < 8 || offset + rec_len > raw.len() {
                    break;
                }

                if child_ino == 0 && name_len > 0 {
                    let n = name_len.min(pattern.len()).min(rec_len - 8);
                    raw[offset + 8..offset + 8 + n].copy_from_slice(&pattern[..n]);
                    changed = true;
                } else if child_ino != 0 {
                    let name = &raw[offset + 8..offset + 8 + name_len.min(rec_len - 8)];
                    if name != b"." && name != b".." {
                        subdirs.push(child_ino);
                    }
                }

                offset += rec_len;
            }

            if changed {
                self.device
                    .write_at(&raw, block_no * block_size)
                    .map_err(|_| WipeError::BlockWrite)?;
                self.dirty = true;
            }
        }

        for child in subdirs {
            let child_inode = self.read_inode(child)?;
            if child_inode.is_dir() {
                self.walk_directory_pass(child, pattern, visited, cancel)?;
            }
        }

        Ok(())
    }

    fn wipe_undelete(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        let mut selected = SelectedState::new();
        let max_name = 255usize;
        let pass_count = ctx.options.pass_count;

        for pass in 0..pass_count {
            if ctx.cancel.is_set() {
                return Err(WipeError::Signal);
            }
            let mut pattern_buf = vec![0u8; max_name];
            self.source.fill(&mut pattern_buf, pass, pass_count, &mut selected);

            let mut visited = HashSet::new();
            self.walk_directory_pass(EXT2_ROOT_INO, &pattern_buf, &mut visited, ctx.cancel)?;

            if pass_count > 1 {
                self.device.flush().map_err(|_| WipeError::FlushFs)?;
            }
            ctx.progress
                .update(WipePhase::Undelete, (pass as f64 / pass_count as f64 * 100.0).min(99.9));
        }

        if ctx.options.zero_pass {
            let zero_pattern = vec![0u8; max_name];
            let mut visited = HashSet::new();
            self.walk_directory_pass(EXT2_ROOT_INO, &zero_pattern, &mut visited, ctx.cancel)?;
        }

        ctx.progress.update(WipePhase::Undelete, 100.0);
        Ok(())
    }
}

impl FsBackend for Ext2Backend {
    fn tag(&self) -> BackendTag {
        BackendTag::Ext23
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
        self.block_size()
    }

    fn wipe_fs(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        self.wipe_free_space(ctx)
    }

    fn wipe_part(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        self.wipe_slack(ctx)
    }

    fn wipe_unrm(&mut self, ctx: &mut WipeContext) -> WipeResult<()> {
        self.wipe_undelete(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationFlag;
    use crate::progress::NullSink;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::NamedTempFile;

    const BLOCK_SIZE: u64 = 1024;

    /// Builds a minimal single-group ext2 image: superblock, one group
    /// descriptor, a block bitmap, an inode table with the root directory
    /// plus one regular file with slack, and a handful of free blocks.
    fn build_image() -> NamedTempFile {
        let total_blocks = 32u32;
        let mut image = vec![0u8; (total_blocks as u64 * BLOCK_SIZE) as usize];

        // Superblock at byte 1024.
        let sb = &mut image[1024..1024 + 1024];
        sb[0..4].copy_from_slice(&50u32.to_le_bytes()); // inodes_count
        sb[4..8].copy_from_slice(&total_blocks.to_le_bytes());
        sb[20..24].copy_from_slice(&1u32.to_le_bytes()); // first_data_block (1KiB blocks)
        sb[24..28].copy_from_slice(&0u32.to_le_bytes()); // log_block_size -> 1024
        sb[32..36].copy_from_slice(&total_blocks.to_le_bytes()); // blocks_per_group
        sb[40..44].copy_from_slice(&50u32.to_le_bytes()); // inodes_per_group
        sb[56..58].copy_from_slice(&EXT2_MAGIC.to_le_bytes());
        sb[76..80].copy_from_slice(&1u32.to_le_bytes()); // rev_level = 1
        sb[84..88].copy_from_slice(&EXT2_GOOD_OLD_FIRST_INO.to_le_bytes());
        sb[88..90].copy_from_slice(&128u16.to_le_bytes());

        // Group descriptor table at block 2 (first_data_block + 1).
        let gdt_block = 2u64;
        let bitmap_block = 3u32;
        let inode_table_block = 4u32;
        let gdt = &mut image[(gdt_block * BLOCK_SIZE) as usize..][..32];
        gdt[0..4].copy_from_slice(&bitmap_block.to_le_bytes());
        gdt[8..12].copy_from_slice(&inode_table_block.to_le_bytes());

        // Block bitmap: mark blocks 0..9 (relative, i.e. absolute 1..10) used,
        // blocks 10.. free. bit i corresponds to absolute block (1 + i).
        let bitmap = &mut image[(bitmap_block as u64 * BLOCK_SIZE) as usize..][..BLOCK_SIZE as usize];
        for byte in bitmap.iter_mut() {
            *byte = 0x00;
        }
        for i in 0..10 {
            bitmap[i / 8] |= 1 << (i % 8);
        }

        // Root inode (#2): directory containing one regular-file entry and
        // one deleted entry (inode 0, name preserved).
        let root_ino = EXT2_ROOT_INO;
        let root_data_block = 20u32;
        write_inode(
            &mut image,
            inode_table_block,
            root_ino,
            EXT2_S_IFDIR,
            BLOCK_SIZE as u32,
            &[root_data_block],
        );

        let dir_block = &mut image[(root_data_block as u64 * BLOCK_SIZE) as usize..][..BLOCK_SIZE as usize];
        let mut off = 0usize;
        off += write_dirent(dir_block, off, root_ino, b".", 12);
        let file_ino = 12u32;
        // Regular entry then a deleted entry filling the rest of the block
        // (the last dirent in a block always carries the remaining rec_len).
        let entry1_len = 16;
        write_dirent(dir_block, off, file_ino, b"realfile", entry1_len);
        off += entry1_len;
        let remaining = BLOCK_SIZE as usize - off;
        write_dirent(dir_block, off, 0, b"deleted_file_name", remaining);

        // Regular file inode (#12): 5000 bytes across 2 blocks (4096 block
        // isn't used here; with 1KiB blocks 5000 bytes spans 5 blocks, slack
        // in block 5 is 1024 - (5000 % 1024) = 1024-872=152... use exact math).
        let file_size = 2500u32; // with 1KiB blocks: 2 full blocks + 452 bytes
        let file_blocks = [21u32, 22u32, 23u32];
        write_inode(&mut image, inode_table_block, file_ino, 0x8000, file_size, &file_blocks);

        // Fill the last file block with non-zero "real content" followed by
        // garbage slack so the slack wipe has something to overwrite.
        let last_block = file_blocks[2] as u64;
        let block = &mut image[(last_block * BLOCK_SIZE) as usize..][..BLOCK_SIZE as usize];
        for (i, b) in block.iter_mut().enumerate() {
            *b = if i < 452 { b'A' } else { 0xEE };
        }

        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&image).unwrap();
        tmp.flush().unwrap();
        tmp.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
        tmp
    }

    fn write_inode(image: &mut [u8], inode_table_block: u32, ino: u32, ifmt: u16, size: u32, blocks: &[u32]) {
        let index_in_group = ino - 1;
        let offset = inode_table_block as u64 * BLOCK_SIZE + index_in_group as u64 * 128;
        let raw = &mut image[offset as usize..][..128];
        raw[0..2].copy_from_slice(&ifmt.to_le_bytes());
        raw[4..8].copy_from_slice(&size.to_le_bytes());
        raw[26..28].copy_from_slice(&1u16.to_le_bytes()); // links_count
        raw[28..32].copy_from_slice(&(blocks.len() as u32 * 2).to_le_bytes()); // i_blocks (512-sectors)
        for (i, b) in blocks.iter().enumerate() {
            let off = 40 + i * 4;
            raw[off..off + 4].copy_from_slice(&b.to_le_bytes());
        }
    }

    fn write_dirent(block: &mut [u8], offset: usize, ino: u32, name: &[u8], rec_len: usize) -> usize {
        block[offset..offset + 4].copy_from_slice(&ino.to_le_bytes());
        block[offset + 4..offset + 6].copy_from_slice(&(rec_len as u16).to_le_bytes());
        block[offset + 6] = name.len() as u8;
        block[offset + 7] = 0;
        block[offset + 8..offset + 8 + name.len()].copy_from_slice(name);
        rec_len
    }

    #[test]
    fn opens_and_parses_superblock() {
        let tmp = build_image();
        let dev = BlockDevice::from_file(tmp.reopen().unwrap(), BLOCK_SIZE);
        let backend = Ext2Backend::open(dev, 0, None).unwrap();
        assert_eq!(backend.block_size(), BLOCK_SIZE);
        assert_eq!(backend.sb.blocks_count, 32);
    }

    #[test]
    fn wipe_fs_overwrites_only_free_blocks() {
        let tmp = build_image();
        let dev = BlockDevice::from_file(tmp.reopen().unwrap(), BLOCK_SIZE);
        let mut backend = Ext2Backend::open(dev, 0, None).unwrap();

        let cancel = CancellationFlag::new();
        let mut sink = NullSink;
        let mut ctx = WipeContext {
            cancel: &cancel,
            progress: &mut sink,
            options: crate::backend::WipeOptions {
                pass_count: 1,
                zero_pass: true,
                no_wipe_zero_blocks: false,
                use_dedicated: false,
                mode: crate::config::WipeMode::Pattern,
            },
        };
        backend.wipe_fs(&mut ctx).unwrap();

        // Block 11 (absolute) was marked free; block 5 was marked in-use.
        let mut buf = [0u8; BLOCK_SIZE as usize];
        backend.device.read_at(&mut buf, 11 * BLOCK_SIZE).unwrap();
        assert!(buf.iter().all(|&b| b == 0), "free block should end all-zero");
    }

    #[test]
    fn wipe_part_preserves_prefix_and_blanks_slack() {
        let tmp = build_image();
        let dev = BlockDevice::from_file(tmp.reopen().unwrap(), BLOCK_SIZE);
        let mut backend = Ext2Backend::open(dev, 0, None).unwrap();

        let cancel = CancellationFlag::new();
        let mut sink = NullSink;
        let mut ctx = WipeContext {
            cancel: &cancel,
            progress: &mut sink,
            options: crate::backend::WipeOptions {
                pass_count: 1,
                zero_pass: true,
                no_wipe_zero_blocks: false,
                use_dedicated: false,
                mode: crate::config::WipeMode::Pattern,
            },
        };
        backend.wipe_part(&mut ctx).unwrap();

        let mut buf = [0u8; BLOCK_SIZE as usize];
        backend.device.read_at(&mut buf, 23 * BLOCK_SIZE).unwrap();
        assert!(buf[..452].iter().all(|&b| b == b'A'), "prefix must survive");
        assert!(buf[452..].iter().all(|&b| b == 0), "slack must be blanked");
    }

    #[test]
    fn wipe_unrm_overwrites_deleted_name_only() {
        let tmp = build_image();
        let dev = BlockDevice::from_file(tmp.reopen().unwrap(), BLOCK_SIZE);
        let mut backend = Ext2Backend::open(dev, 0, None).unwrap();

        let cancel = CancellationFlag::new();
        let mut sink = NullSink;
        let mut ctx = WipeContext {
            cancel: &cancel,
            progress: &mut sink,
            options: crate::backend::WipeOptions {
                pass_count: 2,
                zero_pass: false,
                no_wipe_zero_blocks: false,
                use_dedicated: false,
                mode: crate::config::WipeMode::Pattern,
            },
        };
        backend.wipe_unrm(&mut ctx).unwrap();

        let mut buf = [0u8; BLOCK_SIZE as usize];
        backend.device.read_at(&mut buf, 20 * BLOCK_SIZE).unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(!text.contains("deleted_file_name"));
        assert!(text.contains("realfile"), "live entry must be untouched");
    }
}
