//! Torrent descriptions the simulated swarm knows how to serve.

use magnetar_core::FileEntry;

const MIB: u64 = 1024 * 1024;

/// One file inside a simulated torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedFile {
    /// Path relative to the torrent root.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

impl SimulatedFile {
    /// Describe a file.
    #[must_use]
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// Content the simulated swarm resolves a locator to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedTorrent {
    /// Name reported with the metadata.
    pub name: String,
    /// Files in torrent order.
    pub files: Vec<SimulatedFile>,
    /// Error reported right after metadata, if any.
    pub failure: Option<String>,
}

impl SimulatedTorrent {
    /// Torrent with `files` that downloads successfully.
    #[must_use]
    pub fn new(name: impl Into<String>, files: Vec<SimulatedFile>) -> Self {
        Self {
            name: name.into(),
            files,
            failure: None,
        }
    }

    /// Report `message` as an engine error once metadata has been delivered.
    #[must_use]
    pub fn failing_after_metadata(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Stand-in content for a locator with no catalog entry.
    ///
    /// A single-video torrent plus a subtitle track, named after `display_name` when
    /// the locator carried one.
    #[must_use]
    pub fn generated(session_id: &str, display_name: Option<&str>) -> Self {
        let name = display_name.map_or_else(
            || format!("Simulated {}", session_id.chars().take(8).collect::<String>()),
            str::to_string,
        );
        Self::new(
            name.clone(),
            vec![
                SimulatedFile::new(format!("{name}/{name}.mkv"), 48 * MIB),
                SimulatedFile::new(format!("{name}/{name}.srt"), 24 * 1024),
            ],
        )
    }

    /// Sum of all file sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }

    pub(crate) fn entries(&self) -> Vec<FileEntry> {
        self.files
            .iter()
            .map(|file| FileEntry {
                path: file.path.clone(),
                size: file.size,
            })
            .collect()
    }
}

/// Byte at `position` of file `file_index`; every read of the same spot agrees.
#[must_use]
pub fn content_byte(file_index: usize, position: u64) -> u8 {
    let seed = (file_index as u64).wrapping_mul(0x9e37_79b9);
    let mixed = position.wrapping_mul(31).wrapping_add(seed) ^ (position >> 8);
    u8::try_from(mixed % 251).unwrap_or_default()
}

/// Fill `buf` with the bytes of `file_index` starting at `start`.
pub fn fill(file_index: usize, start: u64, buf: &mut [u8]) {
    for (position, byte) in (start..).zip(buf.iter_mut()) {
        *byte = content_byte(file_index, position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_torrent_uses_display_name_when_present() {
        let named = SimulatedTorrent::generated("abcdef0123456789", Some("Big Buck Bunny"));
        assert_eq!(named.name, "Big Buck Bunny");
        assert_eq!(named.files[0].path, "Big Buck Bunny/Big Buck Bunny.mkv");

        let unnamed = SimulatedTorrent::generated("abcdef0123456789", None);
        assert_eq!(unnamed.name, "Simulated abcdef01");
        assert_eq!(unnamed.total_size(), 48 * MIB + 24 * 1024);
    }

    #[test]
    fn content_is_stable_across_reads() {
        let mut whole = vec![0_u8; 600];
        fill(1, 0, &mut whole);
        let mut tail = vec![0_u8; 100];
        fill(1, 500, &mut tail);
        assert_eq!(&whole[500..], tail.as_slice());
        assert_ne!(content_byte(0, 7), content_byte(1, 7));
    }
}
