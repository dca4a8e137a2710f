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

pub use simfat_err::*;

/// Size of one cluster, the unit of allocation and I/O.
pub const CLUSTER_SIZE: usize = 1024;

/// Number of clusters on the partition.
pub const CLUSTER_COUNT: u16 = 4096;

/// Total partition size in bytes.
pub const PARTITION_SIZE: u64 = CLUSTER_SIZE as u64 * CLUSTER_COUNT as u64;

/// Cluster-granular access to a fixed-size partition.
///
/// Buffers shall be exactly [`CLUSTER_SIZE`] bytes; both operations address
/// the cluster at byte offset `cluster * CLUSTER_SIZE`. Writes are durable
/// when they return.
pub trait DataStorage {
    fn read(&self, cluster: u16, buffer: &mut [u8]) -> Result<()>;

    fn write(&self, cluster: u16, buffer: &[u8]) -> Result<()>;

    /// Restores the partition to its pristine all-zero state of exactly
    /// [`PARTITION_SIZE`] bytes.
    fn reset(&self) -> Result<()>;
}
