// Quran Core - Download and caching engine for Quran apps
// Copyright (C) 2025 Quran Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Recitation audio download requests
//!
//! Audio is organised per reciter (qari) under `audio_files/<qari path>/`.
//! - Gapped reciters have one file per ayah, `SSSAAA.mp3`, plus the
//!   basmala file `001001.mp3` which every range needs.
//! - Gapless reciters have one file per sura, `SSS.mp3`, plus a zipped
//!   timing database.

use crate::download::batch::DownloadBatchResponse;
use crate::download::request::{DownloadBatchRequest, DownloadRequest};
use crate::error::{QuranError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use url::Url;

/// Directory under the downloads root holding all reciters
pub const AUDIO_FILES_DIRECTORY: &str = "audio_files";

/// Remote directory of gapless timing databases
pub const AUDIO_DATABASES_REMOTE_PATH: &str = "hafs/databases/audio";

const AUDIO_EXTENSION: &str = "mp3";
const DATABASE_REMOTE_EXTENSION: &str = "zip";

/// Ayah count of every sura
const AYAH_COUNTS: [u16; 114] = [
    7, 286, 200, 176, 120, 165, 206, 75, 129, 109, 123, 111, 43, 52, 99, 128, 111, 110, 98, 135,
    112, 78, 118, 64, 77, 227, 93, 88, 69, 60, 34, 30, 73, 54, 45, 83, 182, 88, 75, 85, 54, 53,
    89, 59, 37, 35, 38, 29, 18, 45, 60, 49, 62, 55, 78, 96, 29, 22, 24, 13, 14, 11, 11, 18, 12,
    12, 30, 52, 52, 44, 28, 28, 20, 56, 40, 31, 50, 40, 46, 42, 29, 19, 36, 25, 22, 17, 19, 26,
    30, 20, 15, 21, 11, 8, 8, 19, 5, 8, 8, 11, 11, 8, 3, 9, 5, 4, 7, 3, 6, 3, 5, 4, 5, 6,
];

/// A verse position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AyahNumber {
    pub sura: u16,
    pub ayah: u16,
}

impl AyahNumber {
    pub fn new(sura: u16, ayah: u16) -> Result<Self> {
        let count = sura
            .checked_sub(1)
            .and_then(|index| AYAH_COUNTS.get(usize::from(index)))
            .ok_or_else(|| QuranError::invalid_input(format!("Invalid sura {}", sura)))?;
        if ayah == 0 || ayah > *count {
            return Err(QuranError::invalid_input(format!(
                "Invalid ayah {}:{}",
                sura, ayah
            )));
        }
        Ok(Self { sura, ayah })
    }

    /// Number of ayahs in this ayah's sura
    pub fn sura_ayah_count(&self) -> u16 {
        usize::from(self.sura)
            .checked_sub(1)
            .and_then(|index| AYAH_COUNTS.get(index))
            .copied()
            .unwrap_or(0)
    }

    pub fn next(&self) -> Option<Self> {
        if self.ayah < self.sura_ayah_count() {
            Some(Self {
                sura: self.sura,
                ayah: self.ayah + 1,
            })
        } else if usize::from(self.sura) < AYAH_COUNTS.len() {
            Some(Self {
                sura: self.sura + 1,
                ayah: 1,
            })
        } else {
            None
        }
    }

    /// Every ayah from `self` to `end`, both included
    pub fn range_to(&self, end: AyahNumber) -> Vec<AyahNumber> {
        let mut ayahs = Vec::new();
        let mut current = Some(*self);
        while let Some(ayah) = current {
            if ayah > end {
                break;
            }
            ayahs.push(ayah);
            current = ayah.next();
        }
        ayahs
    }
}

/// How a reciter's audio is split into files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioType {
    Gapped,
    Gapless { database_name: String },
}

/// A reciter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qari {
    pub id: i32,
    pub name: String,
    /// Directory name of the reciter's files
    pub path: String,
    /// Remote directory of the reciter's audio files
    pub audio_url: Url,
    pub audio_type: AudioType,
}

impl Qari {
    /// Local folder relative to the downloads root
    pub fn local_folder(&self) -> PathBuf {
        Path::new(AUDIO_FILES_DIRECTORY).join(&self.path)
    }

    fn audio_file(&self, file_name: &str) -> Result<AudioFile> {
        let file_name = format!("{}.{}", file_name, AUDIO_EXTENSION);
        Ok(AudioFile {
            remote: append_path(&self.audio_url, &file_name)?,
            local: self.local_folder().join(file_name),
        })
    }
}

/// One remote file and where it lives locally (relative to the downloads root)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AudioFile {
    pub remote: Url,
    pub local: PathBuf,
}

fn append_path(base: &Url, segment: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| QuranError::invalid_input(format!("URL cannot be a base: {}", base)))?
        .pop_if_empty()
        .extend(segment.split('/'));
    Ok(url)
}

/// Audio files needed to play `start..=end` with `qari`
///
/// `base_url` is the host root used for gapless timing databases.
pub fn audio_files(
    qari: &Qari,
    start: AyahNumber,
    end: AyahNumber,
    base_url: &Url,
) -> Result<Vec<AudioFile>> {
    let mut files = BTreeSet::new();

    match &qari.audio_type {
        AudioType::Gapless { database_name } => {
            for sura in start.sura..=end.sura {
                files.insert(qari.audio_file(&format!("{:03}", sura))?);
            }
            let database_file = format!("{}.{}", database_name, DATABASE_REMOTE_EXTENSION);
            let remote = append_path(
                base_url,
                &format!("{}/{}", AUDIO_DATABASES_REMOTE_PATH, database_file),
            )?;
            files.insert(AudioFile {
                remote,
                local: qari.local_folder().join(database_file),
            });
        }
        AudioType::Gapped => {
            // Basmala is played before every sura
            files.insert(qari.audio_file("001001")?);
            for ayah in start.range_to(end) {
                files.insert(qari.audio_file(&format!("{:03}{:03}", ayah.sura, ayah.ayah))?);
            }
        }
    }

    Ok(files.into_iter().collect())
}

/// Download of the audio needed for a verse range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AyahsAudioDownloadRequest {
    pub qari: Qari,
    pub start: AyahNumber,
    pub end: AyahNumber,
}

impl AyahsAudioDownloadRequest {
    pub fn new(qari: Qari, start: AyahNumber, end: AyahNumber) -> Result<Self> {
        if end < start {
            return Err(QuranError::invalid_input(format!(
                "Range end {}:{} is before start {}:{}",
                end.sura, end.ayah, start.sura, start.ayah
            )));
        }
        Ok(Self { qari, start, end })
    }

    pub fn files(&self, base_url: &Url) -> Result<Vec<AudioFile>> {
        audio_files(&self.qari, self.start, self.end, base_url)
    }

    /// Batch for the files not yet present under `downloads_directory`
    pub fn batch_request(
        &self,
        downloads_directory: &Path,
        base_url: &Url,
    ) -> Result<DownloadBatchRequest> {
        let requests = self
            .files(base_url)?
            .into_iter()
            .map(|file| DownloadRequest::new(file.remote, downloads_directory.join(file.local)))
            .collect();
        Ok(DownloadBatchRequest::new(requests).filter_missing())
    }
}

/// Map ongoing batches to the reciter whose folder they write into
///
/// Batches that do not touch any reciter folder are left out.
pub fn responses_by_qari(
    qaris: &[Qari],
    batches: &[DownloadBatchResponse],
    downloads_directory: &Path,
) -> HashMap<i32, DownloadBatchResponse> {
    let mut result = HashMap::new();
    for batch in batches {
        let requests = batch.requests();
        let qari = qaris.iter().find(|qari| {
            let folder = downloads_directory.join(qari.local_folder());
            requests
                .iter()
                .any(|request| request.destination_path.starts_with(&folder))
        });
        if let Some(qari) = qari {
            result.insert(qari.id, batch.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::request::Download;
    use crate::download::response::DownloadResponse;
    use tempfile::TempDir;

    fn gapped() -> Qari {
        Qari {
            id: 1,
            name: "Minshawi Murattal".to_string(),
            path: "minshawi_murattal".to_string(),
            audio_url: Url::parse("https://download.quranicaudio.com/quran/minshawi/").unwrap(),
            audio_type: AudioType::Gapped,
        }
    }

    fn gapless() -> Qari {
        Qari {
            id: 2,
            name: "Husary".to_string(),
            path: "husary".to_string(),
            audio_url: Url::parse("https://download.quranicaudio.com/quran/husary").unwrap(),
            audio_type: AudioType::Gapless {
                database_name: "husary".to_string(),
            },
        }
    }

    #[test]
    fn test_ayah_validation() {
        assert!(AyahNumber::new(1, 7).is_ok());
        assert!(AyahNumber::new(1, 8).is_err());
        assert!(AyahNumber::new(0, 1).is_err());
        assert!(AyahNumber::new(115, 1).is_err());
        assert_eq!(AYAH_COUNTS.iter().map(|c| u32::from(*c)).sum::<u32>(), 6236);
    }

    #[test]
    fn test_range_crosses_suras() {
        let start = AyahNumber::new(1, 6).unwrap();
        let end = AyahNumber::new(2, 2).unwrap();
        let range = start.range_to(end);
        assert_eq!(range.len(), 4);
        assert_eq!(range[2], AyahNumber::new(2, 1).unwrap());
        assert!(AyahNumber::new(114, 6).unwrap().next().is_none());
    }

    #[test]
    fn test_gapped_files_include_basmala() {
        let base = Url::parse("https://files.quran.app/").unwrap();
        let files = audio_files(
            &gapped(),
            AyahNumber::new(2, 1).unwrap(),
            AyahNumber::new(2, 2).unwrap(),
            &base,
        )
        .unwrap();

        let names: Vec<String> = files.iter().map(|f| f.remote.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "https://download.quranicaudio.com/quran/minshawi/001001.mp3",
                "https://download.quranicaudio.com/quran/minshawi/002001.mp3",
                "https://download.quranicaudio.com/quran/minshawi/002002.mp3",
            ]
        );
        assert_eq!(
            files[0].local,
            PathBuf::from("audio_files/minshawi_murattal/001001.mp3")
        );
    }

    #[test]
    fn test_gapless_files_per_sura_plus_database() {
        let base = Url::parse("https://files.quran.app/").unwrap();
        let files = audio_files(
            &gapless(),
            AyahNumber::new(2, 250).unwrap(),
            AyahNumber::new(3, 1).unwrap(),
            &base,
        )
        .unwrap();

        let remotes: Vec<String> = files.iter().map(|f| f.remote.to_string()).collect();
        assert!(remotes.contains(&"https://download.quranicaudio.com/quran/husary/002.mp3".to_string()));
        assert!(remotes.contains(&"https://download.quranicaudio.com/quran/husary/003.mp3".to_string()));
        assert!(remotes.contains(&"https://files.quran.app/hafs/databases/audio/husary.zip".to_string()));
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_batch_request_skips_downloaded_files() {
        let dir = TempDir::new().unwrap();
        let base = Url::parse("https://files.quran.app/").unwrap();
        let request = AyahsAudioDownloadRequest::new(
            gapped(),
            AyahNumber::new(1, 1).unwrap(),
            AyahNumber::new(1, 2).unwrap(),
        )
        .unwrap();

        let existing = dir.path().join("audio_files/minshawi_murattal/001001.mp3");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"mp3").unwrap();

        let batch = request.batch_request(dir.path(), &base).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch.requests[0].destination_path.ends_with("001002.mp3"));
    }

    #[test]
    fn test_responses_by_qari() {
        let root = Path::new("/data/downloads");
        let url = Url::parse("https://download.quranicaudio.com/quran/husary/001.mp3").unwrap();
        let request = DownloadRequest::new(url, root.join("audio_files/husary/001.mp3"));
        let batch = DownloadBatchResponse::new(5, vec![DownloadResponse::new(Download::new(request, 5))]);

        let map = responses_by_qari(&[gapped(), gapless()], &[batch], root);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&2].batch_id(), 5);
    }

    #[test]
    fn test_reversed_range_rejected() {
        let result = AyahsAudioDownloadRequest::new(
            gapped(),
            AyahNumber::new(2, 5).unwrap(),
            AyahNumber::new(2, 1).unwrap(),
        );
        assert!(result.is_err());
    }
}
