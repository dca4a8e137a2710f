// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use log::error;
use simfat_ds::{DataStorage, CLUSTER_COUNT, CLUSTER_SIZE};
use simfat_fs::{Entry, EntryKind, Error, FileSystem, FsError, Result};
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout,
};

/// Boot block, filled with [`BOOT_FILL`] at format time.
pub const BOOT_CLUSTER: u16 = 0;
/// First cluster of the FAT region.
pub const FAT_REGION_FIRST: u16 = 1;
/// Number of clusters holding the FAT (8 × 1024 B for 4096 × 2-byte entries).
pub const FAT_REGION_CLUSTERS: u16 = 8;
/// The single root directory cluster. Permanently end-of-chain, never freed.
pub const ROOT_DIR_CLUSTER: u16 = 9;
/// First cluster of the data area.
pub const DATA_FIRST_CLUSTER: u16 = 10;
/// Number of clusters in the data area.
pub const DATA_CLUSTER_COUNT: usize = (CLUSTER_COUNT - DATA_FIRST_CLUSTER) as usize;

/// FAT entry of an unallocated cluster.
pub const FAT_FREE: u16 = 0x0000;
/// FAT entry of the boot block.
pub const FAT_BOOT: u16 = 0xFFFD;
/// FAT entry of the clusters holding the FAT itself.
pub const FAT_RESERVED: u16 = 0xFFFE;
/// FAT entry terminating a cluster chain.
pub const FAT_EOC: u16 = 0xFFFF;

/// Byte the boot block is filled with at format time.
pub const BOOT_FILL: u8 = 0xBB;

const NAME_LEN: usize = 18;
const ATTR_FILE: u8 = 0;
const ATTR_DIRECTORY: u8 = 1;
const DIR_ENTRY_COUNT: usize = CLUSTER_SIZE / size_of::<DirEntry>();

pub struct FileSystemServer<DS: DataStorage> {
    data_storage: DS,

    /// In-memory FAT mirror; `None` until `load` succeeds.
    table: Option<AllocationTable>,
}

impl<DS: DataStorage> FileSystemServer<DS> {
    pub fn new(data_storage: DS) -> Self {
        Self {
            data_storage,
            table: None,
        }
    }

    /// Count of free FAT entries.
    pub fn free_clusters(&self) -> Result<u16> {
        let table = self.table()?;
        Ok((0..CLUSTER_COUNT).filter(|&cluster| table.get(cluster) == FAT_FREE).count() as u16)
    }

    fn table(&self) -> Result<&AllocationTable> {
        self.table.as_ref().ok_or(Error::Fs(FsError::NotLoaded))
    }

    fn table_mut(&mut self) -> Result<&mut AllocationTable> {
        self.table.as_mut().ok_or(Error::Fs(FsError::NotLoaded))
    }

    fn read_directory(&self, cluster: u16) -> Result<DirectoryCluster> {
        let mut directory = DirectoryCluster::new_zeroed();
        self.data_storage.read(cluster, directory.as_mut_bytes())?;
        Ok(directory)
    }

    fn write_directory(&self, cluster: u16, directory: &DirectoryCluster) -> Result<()> {
        self.data_storage.write(cluster, directory.as_bytes())
    }

    fn write_table(&self, table: &AllocationTable) -> Result<()> {
        let bytes = table.as_bytes();
        for index in 0..FAT_REGION_CLUSTERS {
            let offset = index as usize * CLUSTER_SIZE;
            self.data_storage
                .write(FAT_REGION_FIRST + index, &bytes[offset..offset + CLUSTER_SIZE])?;
        }
        Ok(())
    }

    /// Rewrites the entire FAT region from the mirror. Invoked at the end of
    /// every successful mutation.
    fn persist_table(&self) -> Result<()> {
        self.write_table(self.table()?)
    }

    /// Walks an absolute path from the root directory. `Ok(None)` is
    /// not-found; `Err` is reserved for I/O and path-shape errors.
    fn resolve(&self, path: &str) -> Result<Option<Located>> {
        if !path.starts_with('/') {
            return Err(FsError::InvalidPath.into());
        }

        let mut current = ROOT_DIR_CLUSTER;
        let mut located = Located::Root;
        for component in path.split('/').filter(|component| !component.is_empty()) {
            let target = encode_name(component)?;
            let directory = self.read_directory(current)?;
            let Some(slot) = directory
                .entries
                .iter()
                .position(|entry| entry.name[0] != 0 && name_eq(&entry.name, &target))
            else {
                return Ok(None);
            };

            let entry = directory.entries[slot];
            located = Located::At {
                parent: current,
                slot,
                entry,
            };
            current = entry.first_cluster.get();
        }

        Ok(Some(located))
    }

    /// Shared engine of `mkdir` and `create`.
    fn create_entry(&mut self, path: &str, attr: u8) -> Result<()> {
        self.table()?;

        let (parent_path, name) = split_path(path)?;
        let name = encode_name(name)?;
        let parent_cluster = match self.resolve(parent_path)? {
            Some(Located::Root) => ROOT_DIR_CLUSTER,
            Some(Located::At { entry, .. }) => {
                if entry.attr != ATTR_DIRECTORY {
                    return Err(FsError::NotADirectory.into());
                }
                entry.first_cluster.get()
            }
            None => return Err(FsError::NotFound.into()),
        };

        let mut directory = self.read_directory(parent_cluster)?;
        let slot = free_slot(&directory).ok_or(FsError::DirectoryFull)?;
        let cluster = find_free_cluster(self.table()?).ok_or(FsError::NoSpace)?;

        directory.entries[slot] = DirEntry {
            name,
            attr,
            reserved: [0; 7],
            first_cluster: U16::new(cluster),
            size: U32::new(0),
        };
        self.table_mut()?.set(cluster, FAT_EOC);
        if attr == ATTR_DIRECTORY {
            // A new directory starts out with all of its slots empty. A new
            // file's cluster is left untouched, size 0 means nothing is ever
            // read from it.
            self.data_storage.write(cluster, &[0u8; CLUSTER_SIZE])?;
        }
        self.write_directory(parent_cluster, &directory)?;
        self.persist_table()
    }

    /// Frees a chain starting at `head`, stopping at any sentinel or free
    /// entry. Callers guarantee `head` is in the data area.
    fn free_chain(&mut self, head: u16) -> Result<()> {
        let table = self.table_mut()?;
        let mut current = head;
        loop {
            debug_assert!(current >= DATA_FIRST_CLUSTER);
            let next = table.get(current);
            table.set(current, FAT_FREE);
            if next == FAT_FREE || next >= FAT_BOOT {
                break;
            }
            if !(DATA_FIRST_CLUSTER..CLUSTER_COUNT).contains(&next) {
                error!("FAT entry {next:#06X} shall stay within the data area");
                return Err(FsError::Inconsistent.into());
            }
            current = next;
        }
        Ok(())
    }

    /// Allocates `count` clusters linked into one end-of-chain terminated
    /// chain. On exhaustion mid-loop the partially built chain is freed
    /// again and no cluster stays claimed.
    fn allocate_chain(&mut self, count: usize) -> Result<Vec<u16>> {
        let table = self.table_mut()?;
        let mut chain: Vec<u16> = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(cluster) = find_free_cluster(table) else {
                for &allocated in &chain {
                    table.set(allocated, FAT_FREE);
                }
                return Err(FsError::NoSpace.into());
            };

            table.set(cluster, FAT_EOC);
            if let Some(&previous) = chain.last() {
                table.set(previous, cluster);
            }
            chain.push(cluster);
        }
        Ok(chain)
    }

    /// Allocates a fresh end-of-chain cluster and links `tail` to it.
    fn link_cluster(&mut self, tail: u16) -> Result<u16> {
        let table = self.table_mut()?;
        let Some(cluster) = find_free_cluster(table) else {
            return Err(FsError::NoSpace.into());
        };
        table.set(cluster, FAT_EOC);
        table.set(tail, cluster);
        Ok(cluster)
    }

    fn resolve_file(&self, path: &str) -> Result<(u16, usize, DirEntry)> {
        match self.resolve(path)? {
            None => Err(FsError::NotFound.into()),
            Some(Located::Root) => Err(FsError::NotAFile.into()),
            Some(Located::At { parent, slot, entry }) => {
                if entry.attr == ATTR_DIRECTORY {
                    return Err(FsError::NotAFile.into());
                }
                Ok((parent, slot, entry))
            }
        }
    }
}

impl<DS: DataStorage> FileSystem for FileSystemServer<DS> {
    fn format(&mut self) -> Result<()> {
        self.data_storage.reset()?;

        let mut table = AllocationTable::new_zeroed();
        table.set(BOOT_CLUSTER, FAT_BOOT);
        for cluster in FAT_REGION_FIRST..FAT_REGION_FIRST + FAT_REGION_CLUSTERS {
            table.set(cluster, FAT_RESERVED);
        }
        table.set(ROOT_DIR_CLUSTER, FAT_EOC);

        self.data_storage.write(BOOT_CLUSTER, &[BOOT_FILL; CLUSTER_SIZE])?;
        self.write_table(&table)?;
        self.data_storage.write(ROOT_DIR_CLUSTER, &[0u8; CLUSTER_SIZE])?;

        // The mirror is not considered loaded after a format, `load` shall
        // follow before any further operation.
        self.table = None;
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let mut table = AllocationTable::new_zeroed();
        let bytes = table.as_mut_bytes();
        for index in 0..FAT_REGION_CLUSTERS {
            let offset = index as usize * CLUSTER_SIZE;
            self.data_storage
                .read(FAT_REGION_FIRST + index, &mut bytes[offset..offset + CLUSTER_SIZE])?;
        }

        validate_system_region(&table)?;
        self.table = Some(table);
        Ok(())
    }

    fn list(&self, path: &str) -> Result<Vec<Entry>> {
        self.table()?;

        let directory_cluster = match self.resolve(path)? {
            None => return Err(FsError::NotFound.into()),
            Some(Located::Root) => ROOT_DIR_CLUSTER,
            Some(Located::At { entry, .. }) => {
                if entry.attr != ATTR_DIRECTORY {
                    return Ok(vec![to_entry(&entry)]);
                }
                entry.first_cluster.get()
            }
        };

        let directory = self.read_directory(directory_cluster)?;
        Ok(directory
            .entries
            .iter()
            .filter(|entry| entry.name[0] != 0)
            .map(to_entry)
            .collect())
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        self.create_entry(path, ATTR_DIRECTORY)
    }

    fn create(&mut self, path: &str) -> Result<()> {
        self.create_entry(path, ATTR_FILE)
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        self.table()?;

        match self.resolve(path)? {
            None => Err(FsError::NotFound.into()),
            Some(Located::Root) => Err(FsError::RootUnlink.into()),
            Some(Located::At { parent, slot, entry }) => {
                if entry.attr == ATTR_DIRECTORY {
                    let directory = self.read_directory(entry.first_cluster.get())?;
                    if directory.entries.iter().any(|entry| entry.name[0] != 0) {
                        return Err(FsError::NotEmpty.into());
                    }
                }

                self.free_chain(entry.first_cluster.get())?;
                let mut directory = self.read_directory(parent)?;
                directory.entries[slot] = DirEntry::new_zeroed();
                self.write_directory(parent, &directory)?;
                self.persist_table()
            }
        }
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let table = self.table()?;
        let (_, _, entry) = self.resolve_file(path)?;

        let mut remaining = entry.size.get() as usize;
        // A corrupt size field shall not drive allocation past the data area.
        let mut data = Vec::with_capacity(remaining.min(DATA_CLUSTER_COUNT * CLUSTER_SIZE));
        let mut buffer = [0u8; CLUSTER_SIZE];
        for cluster in ClusterChain::new(table, entry.first_cluster.get()) {
            if remaining == 0 {
                break;
            }
            self.data_storage.read(cluster?, &mut buffer)?;
            let take = remaining.min(CLUSTER_SIZE);
            data.extend_from_slice(&buffer[..take]);
            remaining -= take;
        }
        Ok(data)
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.table()?;
        let (parent, slot, entry) = self.resolve_file(path)?;

        self.free_chain(entry.first_cluster.get())?;

        // A zero-byte file still owns one allocated end-of-chain cluster.
        let cluster_count = data.len().div_ceil(CLUSTER_SIZE).max(1);
        let chain = self.allocate_chain(cluster_count)?;

        let mut buffer = [0u8; CLUSTER_SIZE];
        for (&cluster, chunk) in chain.iter().zip(data.chunks(CLUSTER_SIZE)) {
            if chunk.len() < CLUSTER_SIZE {
                buffer = [0u8; CLUSTER_SIZE];
            }
            buffer[..chunk.len()].copy_from_slice(chunk);
            self.data_storage.write(cluster, &buffer)?;
        }

        let mut directory = self.read_directory(parent)?;
        directory.entries[slot].first_cluster = U16::new(chain[0]);
        directory.entries[slot].size = U32::new(data.len() as u32);
        self.write_directory(parent, &directory)?;
        self.persist_table()
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.table()?;
        let (parent, slot, entry) = self.resolve_file(path)?;
        if data.is_empty() {
            return Ok(());
        }

        let size = entry.size.get() as usize;
        let mut tail = entry.first_cluster.get();
        for cluster in ClusterChain::new(self.table()?, entry.first_cluster.get()) {
            tail = cluster?;
        }

        let mut buffer = [0u8; CLUSTER_SIZE];
        let mut offset = size % CLUSTER_SIZE;
        let mut current = tail;
        if size > 0 && offset == 0 {
            // The tail is full, appending starts on a fresh cluster.
            current = self.link_cluster(tail)?;
        } else {
            self.data_storage.read(tail, &mut buffer)?;
        }

        let mut position = 0;
        loop {
            let step = (CLUSTER_SIZE - offset).min(data.len() - position);
            buffer[offset..offset + step].copy_from_slice(&data[position..position + step]);
            self.data_storage.write(current, &buffer)?;
            position += step;
            if position == data.len() {
                break;
            }
            current = self.link_cluster(current)?;
            buffer = [0u8; CLUSTER_SIZE];
            offset = 0;
        }

        // On allocator exhaustion above the already appended bytes stay in
        // their clusters but the size is never updated.
        let mut directory = self.read_directory(parent)?;
        directory.entries[slot].size = U32::new((size + data.len()) as u32);
        self.write_directory(parent, &directory)?;
        self.persist_table()
    }
}

/// Resolver output. The root has no parent entry, hence its own variant;
/// callers reject operations that need one.
#[derive(Clone, Copy)]
enum Located {
    Root,
    At {
        parent: u16,
        slot: usize,
        entry: DirEntry,
    },
}

/// Iterates the clusters of one chain. Terminates cleanly on end-of-chain;
/// any other sentinel, a free entry, a pointer outside the data area or a
/// chain longer than the data area surfaces as an error.
struct ClusterChain<'fs> {
    table: &'fs AllocationTable,
    state: ChainState,
    remaining: usize,
}

enum ChainState {
    At(u16),
    Corrupt(u16),
    Done,
}

impl<'fs> ClusterChain<'fs> {
    fn new(table: &'fs AllocationTable, head: u16) -> Self {
        Self {
            table,
            state: ChainState::At(head),
            remaining: DATA_CLUSTER_COUNT,
        }
    }
}

impl Iterator for ClusterChain<'_> {
    type Item = Result<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ChainState::At(cluster) => {
                if self.remaining == 0 {
                    error!("Cluster chain exceeds the data area, assuming a cycle");
                    self.state = ChainState::Done;
                    return Some(Err(FsError::Inconsistent.into()));
                }
                self.remaining -= 1;

                self.state = match self.table.get(cluster) {
                    FAT_EOC => ChainState::Done,
                    next if (DATA_FIRST_CLUSTER..CLUSTER_COUNT).contains(&next) => {
                        ChainState::At(next)
                    }
                    next => ChainState::Corrupt(next),
                };
                Some(Ok(cluster))
            }
            ChainState::Corrupt(entry) => {
                error!("FAT entry {entry:#06X} shall be a data cluster pointer or end-of-chain");
                self.state = ChainState::Done;
                Some(Err(FsError::Inconsistent.into()))
            }
            ChainState::Done => None,
        }
    }
}

/// In-memory mirror of the FAT region: one 16-bit little-endian entry per
/// cluster, persisted verbatim into clusters 1..=8.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
struct AllocationTable {
    entries: [U16; CLUSTER_COUNT as usize],
}

impl AllocationTable {
    fn get(&self, cluster: u16) -> u16 {
        self.entries[cluster as usize].get()
    }

    fn set(&mut self, cluster: u16, value: u16) {
        self.entries[cluster as usize].set(value);
    }
}

/// One directory held in a single cluster.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
struct DirectoryCluster {
    entries: [DirEntry; DIR_ENTRY_COUNT],
}

/// On-disk directory entry.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct DirEntry {
    /// NUL-terminated name, 17 usable bytes. A leading 0x00 byte marks the
    /// slot as empty.
    name: [u8; NAME_LEN],
    /// 0 for a regular file, 1 for a directory.
    attr: u8,
    /// Reserved. Written as zero, ignored on read.
    reserved: [u8; 7],
    /// Head of the cluster chain. A zero-byte file still points to one
    /// allocated end-of-chain cluster.
    first_cluster: U16,
    /// Size in bytes. Directories report 0.
    size: U32,
}

const _: () = assert!(size_of::<DirEntry>() == 32);
const _: () = assert!(size_of::<DirectoryCluster>() == CLUSTER_SIZE);
const _: () = assert!(size_of::<AllocationTable>() == FAT_REGION_CLUSTERS as usize * CLUSTER_SIZE);

fn validate_system_region(table: &AllocationTable) -> Result<()> {
    let valid = table.get(BOOT_CLUSTER) == FAT_BOOT
        && (FAT_REGION_FIRST..FAT_REGION_FIRST + FAT_REGION_CLUSTERS)
            .all(|cluster| table.get(cluster) == FAT_RESERVED)
        && table.get(ROOT_DIR_CLUSTER) == FAT_EOC;
    if !valid {
        error!("FAT system region shall carry the boot, reserved and root sentinels");
        return Err(FsError::Inconsistent.into());
    }
    Ok(())
}

/// First free cluster of the data area, `None` when the partition is full.
fn find_free_cluster(table: &AllocationTable) -> Option<u16> {
    (DATA_FIRST_CLUSTER..CLUSTER_COUNT).find(|&cluster| table.get(cluster) == FAT_FREE)
}

/// First empty slot of a directory cluster, `None` when all 32 are taken.
fn free_slot(directory: &DirectoryCluster) -> Option<usize> {
    directory.entries.iter().position(|entry| entry.name[0] == 0)
}

/// Splits `"/a/b/c"` into `("/a/b", "c")`. The root itself has no name to
/// split off.
fn split_path(path: &str) -> Result<(&str, &str)> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidPath.into());
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(FsError::InvalidPath.into());
    }

    let split = trimmed.rfind('/').ok_or(FsError::InvalidPath)?;
    let parent = if split == 0 { "/" } else { &trimmed[..split] };
    Ok((parent, &trimmed[split + 1..]))
}

/// Encodes a path component into the fixed name field: NUL-terminated,
/// zero-padded, at most 17 usable bytes.
fn encode_name(component: &str) -> Result<[u8; NAME_LEN]> {
    let bytes = component.as_bytes();
    if bytes.is_empty() || bytes.contains(&0) {
        return Err(FsError::InvalidPath.into());
    }
    if bytes.len() > NAME_LEN - 1 {
        return Err(FsError::NameTooLong.into());
    }

    let mut name = [0u8; NAME_LEN];
    name[..bytes.len()].copy_from_slice(bytes);
    Ok(name)
}

/// Byte-exact comparison up to the terminating NUL. No case folding, no
/// normalization.
fn name_eq(entry_name: &[u8; NAME_LEN], target: &[u8; NAME_LEN]) -> bool {
    for (a, b) in entry_name.iter().zip(target) {
        if a != b {
            return false;
        }
        if *a == 0 {
            return true;
        }
    }
    true
}

fn to_entry(entry: &DirEntry) -> Entry {
    let length = entry.name.iter().position(|&byte| byte == 0).unwrap_or(NAME_LEN);
    Entry {
        name: String::from_utf8_lossy(&entry.name[..length]).into_owned(),
        kind: if entry.attr == ATTR_DIRECTORY {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        size: entry.size.get(),
    }
}
