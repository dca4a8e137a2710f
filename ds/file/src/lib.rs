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

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::Path,
};

use log::debug;
use simfat_ds::{DataStorage, IoError, Result, CLUSTER_COUNT, CLUSTER_SIZE, PARTITION_SIZE};

/// Relative path of the backing file, resolved against the current working
/// directory at process start.
pub const PARTITION_FILE: &str = "fat.part";

pub struct DataStorageServer {
    file: File,
}

impl DataStorageServer {
    /// Opens the backing file, creating it empty if absent. The file is not
    /// sized here; `reset` (invoked by format) establishes the partition
    /// length.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(IoError::Backing)?;
        Ok(Self { file })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(PARTITION_FILE)
    }
}

impl DataStorage for DataStorageServer {
    fn read(&self, cluster: u16, buffer: &mut [u8]) -> Result<()> {
        check_access(cluster, buffer.len())?;
        self.file
            .read_exact_at(buffer, cluster as u64 * CLUSTER_SIZE as u64)
            .map_err(IoError::Backing)?;
        Ok(())
    }

    fn write(&self, cluster: u16, buffer: &[u8]) -> Result<()> {
        check_access(cluster, buffer.len())?;
        self.file
            .write_all_at(buffer, cluster as u64 * CLUSTER_SIZE as u64)
            .map_err(IoError::Backing)?;
        // Each mutation shall be visible on disk when the operation returns.
        self.file.sync_data().map_err(IoError::Backing)?;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        debug!("Resetting partition to {PARTITION_SIZE} bytes");
        self.file.set_len(0).map_err(IoError::Backing)?;
        self.file.set_len(PARTITION_SIZE).map_err(IoError::Backing)?;
        self.file.sync_data().map_err(IoError::Backing)?;
        Ok(())
    }
}

fn check_access(cluster: u16, buffer_len: usize) -> Result<()> {
    if cluster >= CLUSTER_COUNT {
        return Err(IoError::OutOfRange(cluster).into());
    }
    if buffer_len != CLUSTER_SIZE {
        return Err(IoError::BufferSize(buffer_len).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use simfat_ds::Error;

    use super::*;

    fn temp_partition(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("simfat-{}-{}.part", name, std::process::id()))
    }

    #[test]
    fn reset_sizes_the_partition() {
        let path = temp_partition("reset");
        let storage = DataStorageServer::open(&path).unwrap();
        storage.reset().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), PARTITION_SIZE);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn cluster_round_trip() {
        let path = temp_partition("round-trip");
        let storage = DataStorageServer::open(&path).unwrap();
        storage.reset().unwrap();

        let written = [0xA5u8; CLUSTER_SIZE];
        storage.write(CLUSTER_COUNT - 1, &written).unwrap();
        let mut read = [0u8; CLUSTER_SIZE];
        storage.read(CLUSTER_COUNT - 1, &mut read).unwrap();
        assert_eq!(read, written);

        assert_eq!(fs::metadata(&path).unwrap().len(), PARTITION_SIZE);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_out_of_range_cluster() {
        let path = temp_partition("out-of-range");
        let storage = DataStorageServer::open(&path).unwrap();
        storage.reset().unwrap();

        let buffer = [0u8; CLUSTER_SIZE];
        assert!(matches!(
            storage.write(CLUSTER_COUNT, &buffer),
            Err(Error::Io(IoError::OutOfRange(_)))
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_partial_cluster_buffer() {
        let path = temp_partition("partial-buffer");
        let storage = DataStorageServer::open(&path).unwrap();
        storage.reset().unwrap();

        let mut buffer = [0u8; CLUSTER_SIZE / 2];
        assert!(matches!(
            storage.read(0, &mut buffer),
            Err(Error::Io(IoError::BufferSize(_)))
        ));
        fs::remove_file(&path).unwrap();
    }
}
