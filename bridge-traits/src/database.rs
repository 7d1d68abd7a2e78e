//! On-Device Database Abstraction
//!
//! The binary database on a media player is parsed by a third-party library.
//! The core only needs the per-track counters, the hardware generation (to
//! decide whether write-back is safe) and a handful of sysinfo values, so
//! that is all this contract exposes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::DeviceAccessError;

/// Media-kind bitfield as stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MediaType(pub u32);

impl MediaType {
    pub const AUDIO: MediaType = MediaType(0x0001);
    pub const MOVIE: MediaType = MediaType(0x0002);
    pub const PODCAST: MediaType = MediaType(0x0004);
    pub const AUDIOBOOK: MediaType = MediaType(0x0008);
    pub const MUSIC_VIDEO: MediaType = MediaType(0x0020);
    pub const TV_SHOW: MediaType = MediaType(0x0040);

    pub fn contains(self, other: MediaType) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_podcast(self) -> bool {
        self.contains(Self::PODCAST)
    }

    /// Movies and TV shows are video; music videos are not.
    pub fn is_video(self) -> bool {
        (self.contains(Self::MOVIE) || self.contains(Self::TV_SHOW))
            && !self.contains(Self::MUSIC_VIDEO)
    }
}

impl std::ops::BitOr for MediaType {
    type Output = MediaType;

    fn bitor(self, rhs: MediaType) -> MediaType {
        MediaType(self.0 | rhs.0)
    }
}

/// Hardware generation. Only used to decide which checksum support files
/// the device needs before its database may be rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceGeneration {
    First,
    Second,
    Third,
    Fourth,
    Photo,
    Mobile,
    Mini1,
    Mini2,
    Shuffle1,
    Shuffle2,
    Shuffle3,
    Shuffle4,
    Nano1,
    Nano2,
    Nano3,
    Nano4,
    Nano5,
    Nano6,
    Video1,
    Video2,
    Classic1,
    Classic2,
    Classic3,
    Touch1,
    Touch2,
    Touch3,
    Touch4,
    Iphone1,
    Iphone2,
    Iphone3,
    Iphone4,
    Ipad1,
    Other(String),
}

impl fmt::Display for DeviceGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceGeneration::Other(name) => write!(f, "{}", name),
            generation => write!(f, "{:?}", generation),
        }
    }
}

/// Model reported by the device database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    /// Human-readable model name, e.g. "Classic Silver".
    pub name: String,
    pub generation: DeviceGeneration,
}

impl DeviceModel {
    pub fn new(name: impl Into<String>, generation: DeviceGeneration) -> Self {
        Self {
            name: name.into(),
            generation,
        }
    }

    /// First word of the model name, lowercased. Groups cache files on disk.
    pub fn family(&self) -> String {
        self.name
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }
}

/// One track as stored in the device database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTrack {
    /// Database id that survives device re-syncs.
    pub persistent_id: u64,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track_length_ms: u32,
    /// Unix seconds
    pub last_played: i64,
    pub media_type: MediaType,
    /// Plays since the counter was last reset by a sync
    pub recent_play_count: u32,
    /// Lifetime plays
    pub play_count: u32,
    pub location: Option<PathBuf>,
}

/// Parsed device database for one mounted device.
///
/// Handles are owned by a single device session and are dropped when the
/// session closes.
#[async_trait]
pub trait DeviceDatabase: Send {
    /// `None` when the library could not identify the hardware model.
    fn model(&self) -> Option<&DeviceModel>;

    /// Look up a sysinfo value such as `FirewireGuid`.
    fn sysinfo(&self, key: &str) -> Option<String>;

    /// All tracks on the device, in database order.
    fn tracks(&self) -> &[DeviceTrack];

    /// Flush the database back to the device, resetting the recent counters.
    async fn write_back(&mut self) -> Result<(), DeviceAccessError>;
}

/// Opens device databases from a mount path.
#[async_trait]
pub trait DeviceDatabaseReader: Send + Sync {
    async fn open(&self, mount_path: &Path) -> Result<Box<dyn DeviceDatabase>, DeviceAccessError>;
}
