// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Destinations for received data

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Persists the reassembled blocks of a finished transfer, in order.
pub trait Storage: Send {
    fn store(&mut self, chunks: &[Vec<u8>]) -> io::Result<()>;
}

/// Creates (or truncates) a file and writes the chunks into it.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorage { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn store(&mut self, chunks: &[Vec<u8>]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        for chunk in chunks {
            writer.write_all(chunk)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Keeps the chunks in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    chunks: std::sync::Arc<std::sync::Mutex<Option<Vec<Vec<u8>>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks handed over by the last `store`, `None` if it never ran
    pub fn chunks(&self) -> Option<Vec<Vec<u8>>> {
        self.chunks.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.chunks().map(|chunks| chunks.concat())
    }
}

impl Storage for MemoryStorage {
    fn store(&mut self, chunks: &[Vec<u8>]) -> io::Result<()> {
        let mut guard = self.chunks
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "storage lock poisoned"))?;
        *guard = Some(chunks.to_vec());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
