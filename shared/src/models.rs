//! Domain models for LikedSongs
//!
//! A liked song is keyed by artist (partition) and release date (sort), so one
//! artist's songs come back from a query in release order.

use serde::{Deserialize, Serialize};

use crate::codec::{Field, Record};
use crate::errors::Result;
use crate::key::PrimaryKey;

/// A song in the LikedSongs table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Song {
    /// Partition key
    pub artist: String,
    /// Sort key, `YYYY-MM-DD`
    pub release_date: String,
    pub title: String,
    pub genre: String,
}

impl Song {
    pub const ARTIST: &'static str = "Artist";
    pub const RELEASE_DATE: &'static str = "ReleaseDate";
    pub const TITLE: &'static str = "Title";
    pub const GENRE: &'static str = "Genre";

    pub fn new(
        artist: impl Into<String>,
        release_date: impl Into<String>,
        title: impl Into<String>,
        genre: impl Into<String>,
    ) -> Self {
        Self {
            artist: artist.into(),
            release_date: release_date.into(),
            title: title.into(),
            genre: genre.into(),
        }
    }

    /// Key of the song released by `artist` on `release_date`
    pub fn key(artist: &str, release_date: &str) -> Result<PrimaryKey> {
        PrimaryKey::new(artist, release_date)
    }
}

impl Record for Song {
    const PARTITION_KEY: &'static str = Song::ARTIST;
    const SORT_KEY: &'static str = Song::RELEASE_DATE;
    const FIELDS: &'static [Field] = &[
        Field::string(Song::ARTIST),
        Field::string(Song::RELEASE_DATE),
        Field::string(Song::TITLE),
        Field::string(Song::GENRE),
    ];

    fn partition_key(&self) -> &str {
        &self.artist
    }

    fn sort_key(&self) -> &str {
        &self.release_date
    }
}
