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

use std::fmt::{self, Display, Formatter};

pub use simfat_err::*;

/// Operations the interactive shell drives. All paths are absolute
/// (`/`-rooted, `/`-separated); every operation but `format` and `load`
/// requires a loaded file system.
pub trait FileSystem {
    fn format(&mut self) -> Result<()>;

    fn load(&mut self) -> Result<()>;

    fn list(&self, path: &str) -> Result<Vec<Entry>>;

    fn mkdir(&mut self, path: &str) -> Result<()>;

    fn create(&mut self, path: &str) -> Result<()>;

    fn unlink(&mut self, path: &str) -> Result<()>;

    fn read(&self, path: &str) -> Result<Vec<u8>>;

    fn write(&mut self, path: &str, data: &[u8]) -> Result<()>;

    fn append(&mut self, path: &str, data: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u32,
}

impl Display for Entry {
    /// Canonical listing line: kind tag, byte size, name.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            EntryKind::File => "[F]",
            EntryKind::Directory => "[D]",
        };
        write!(f, "{} {:>8} {}", tag, self.size, self.name)
    }
}
