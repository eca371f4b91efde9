//! The metadata record accumulated during one detection
//!
//! An [`Info`] maps enumerated [`Field`] keys to tagged [`Value`]s and holds
//! the list of discovered [`Track`]s. Analyzers write fields as they learn
//! them; a later, more specific write to the same key replaces the earlier
//! value (a container-level guess is refined once a codec is identified).

use crate::error::{Error, Result};
use std::{borrow::Cow, collections::BTreeMap, fmt};

/// Smallest accepted video track width or height
pub const MIN_VIDEO_DIMENSION: u32 = 16;

/// Largest accepted video track width or height
pub const MAX_VIDEO_DIMENSION: u32 = 16383;

/// A typed metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    UInt(u64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            Value::List(l) => f.write_str(&l.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(l: Vec<String>) -> Self {
        Value::List(l)
    }
}

macro_rules! define_fields {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Keys of an [`Info`] record
        ///
        /// Keys outside the enumerated set (per-track extras promoted to the
        /// top level) use [`Field::Other`].
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Field {
            $($variant,)*
            Other(Cow<'static, str>),
        }

        impl Field {
            /// Key name as used in serialized records
            pub fn as_str(&self) -> &str {
                match self {
                    $(Field::$variant => $name,)*
                    Field::Other(name) => name.as_ref(),
                }
            }

            /// Looks up a key by name
            pub fn from_name(name: &str) -> Field {
                match name {
                    $($name => Field::$variant,)*
                    other => Field::Other(Cow::Owned(other.to_string())),
                }
            }
        }
    };
}

define_fields!(
    Format => "format",
    Subformat => "subformat",
    Codec => "codec",
    Width => "width",
    Height => "height",
    Brands => "brands",
    MinorVersion => "minor_version",
    HasEarlyMdat => "has_early_mdat",
    Endian => "endian",
    Arch => "arch",
    Binary => "binary",
    Vcodec => "vcodec",
    Acodec => "acodec",
    Anch => "anch",
    Arate => "arate",
    Asbits => "asbits",
    Asubformat => "asubformat",
    Filename => "f",
    Size => "size",
    Error => "error",
);

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media type of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One audio or video stream found in a container
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub kind: TrackKind,
    pub codec: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub sample_size: Option<u32>,
    pub channel_count: Option<u32>,
    pub subformat: Option<String>,
    /// Codec- or container-specific extras (e.g. `profile`)
    pub extra: BTreeMap<String, Value>,
}

impl Track {
    pub fn new(kind: TrackKind, codec: impl Into<String>) -> Self {
        Self {
            kind,
            codec: codec.into(),
            width: None,
            height: None,
            sample_rate: None,
            sample_size: None,
            channel_count: None,
            subformat: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn audio(codec: impl Into<String>) -> Self {
        Self::new(TrackKind::Audio, codec)
    }

    pub fn video(codec: impl Into<String>) -> Self {
        Self::new(TrackKind::Video, codec)
    }

    /// Sets the dimensions of a video track
    ///
    /// Values outside [`MIN_VIDEO_DIMENSION`]..=[`MAX_VIDEO_DIMENSION`] are
    /// rejected as malformed, and the track is left unchanged.
    pub fn set_dimensions(&mut self, width: u32, height: u32) -> Result<()> {
        check_dimension("width", width)?;
        check_dimension("height", height)?;
        self.width = Some(width);
        self.height = Some(height);
        Ok(())
    }

    pub fn set_extra(&mut self, key: &str, value: impl Into<Value>) {
        self.extra.insert(key.to_string(), value.into());
    }

    /// Fields of this track in key order, as (name, value) pairs
    fn entries(&self) -> Vec<(&str, Value)> {
        let mut out: Vec<(&str, Value)> = vec![("codec", Value::from(self.codec.as_str()))];
        let optional = [
            ("width", self.width),
            ("height", self.height),
            ("sample_rate", self.sample_rate),
            ("sample_size", self.sample_size),
            ("channel_count", self.channel_count),
        ];
        out.extend(
            optional
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, Value::from(v)))),
        );
        if let Some(sub) = &self.subformat {
            out.push(("subformat", Value::from(sub.as_str())));
        }
        out.extend(self.extra.iter().map(|(k, v)| (k.as_str(), v.clone())));
        out
    }
}

fn check_dimension(what: &str, value: u32) -> Result<()> {
    if !(MIN_VIDEO_DIMENSION..=MAX_VIDEO_DIMENSION).contains(&value) {
        return Err(Error::bad(format!("Unreasonable {what}: {value}")));
    }
    Ok(())
}

/// The metadata record of one detection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
    fields: BTreeMap<Field, Value>,
    /// Tracks in discovery order
    pub tracks: Vec<Track>,
}

impl Info {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed record carrying the file name
    pub fn with_filename(name: impl Into<String>) -> Self {
        let mut info = Self::new();
        info.set(Field::Filename, name.into());
        info
    }

    /// Writes a field, replacing any earlier value
    pub fn set(&mut self, field: Field, value: impl Into<Value>) {
        self.fields.insert(field, value.into());
    }

    /// Writes a field only if it is not present yet
    pub fn set_default(&mut self, field: Field, value: impl Into<Value>) {
        self.fields.entry(field).or_insert_with(|| value.into());
    }

    pub fn get(&self, field: &Field) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &Field) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_u64(&self, field: &Field) -> Option<u64> {
        self.get(field).and_then(Value::as_u64)
    }

    pub fn remove(&mut self, field: &Field) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &Field) -> bool {
        self.fields.contains_key(field)
    }

    /// All fields in key order
    pub fn fields(&self) -> impl Iterator<Item = (&Field, &Value)> {
        self.fields.iter()
    }

    pub fn format(&self) -> Option<&str> {
        self.get_str(&Field::Format)
    }

    pub fn set_format(&mut self, format: &str) {
        self.set(Field::Format, format);
    }

    pub fn subformat(&self) -> Option<&str> {
        self.get_str(&Field::Subformat)
    }

    pub fn codec(&self) -> Option<&str> {
        self.get_str(&Field::Codec)
    }

    pub fn width(&self) -> Option<u64> {
        self.get_u64(&Field::Width)
    }

    pub fn height(&self) -> Option<u64> {
        self.get_u64(&Field::Height)
    }

    /// Sets top-level image dimensions
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.set(Field::Width, width);
        self.set(Field::Height, height);
    }

    /// Appends a track and returns it for further filling
    pub fn add_track(&mut self, track: Track) -> &mut Track {
        self.tracks.push(track);
        let last = self.tracks.len() - 1;
        &mut self.tracks[last]
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Audio)
    }

    /// Copies the fields of the tracks to the top level
    ///
    /// A single audio track yields `acodec anch arate asbits asubformat` and
    /// `audio_*`. Several audio tracks yield only `acodec`, the shared codec
    /// or `multiple`. A single video track (or several with identical
    /// dimensions, in which case the first one wins) yields `vcodec width
    /// height` and `video_*`. Several differently sized video tracks yield
    /// only `vcodec`.
    pub fn promote_track_fields(&mut self) {
        let audio: Vec<Track> = self.audio_tracks().cloned().collect();
        if audio.len() > 1 {
            self.set(Field::Acodec, shared_codec(&audio).unwrap_or("multiple"));
        } else if let Some(track) = audio.first() {
            for (key, value) in track.entries() {
                let field = match key {
                    "codec" => Field::Acodec,
                    "channel_count" => Field::Anch,
                    "sample_rate" => Field::Arate,
                    "sample_size" => Field::Asbits,
                    "subformat" => Field::Asubformat,
                    other => Field::Other(Cow::Owned(format!("audio_{other}"))),
                };
                self.set(field, value);
            }
            self.set_default(Field::Acodec, "?");
        }

        let mut video: Vec<Track> = self.video_tracks().cloned().collect();
        if video.len() > 1 {
            let first = (video[0].width, video[0].height);
            if video.iter().all(|t| (t.width, t.height) == first) {
                video.truncate(1);
            } else {
                let mut codecs: Vec<&str> = video.iter().map(|t| t.codec.as_str()).collect();
                codecs.sort_unstable();
                codecs.dedup();
                let vcodec = match codecs.as_slice() {
                    [] => "?",
                    [one] => one,
                    _ => "multiple",
                };
                self.set(Field::Vcodec, vcodec);
            }
        }
        if let [track] = video.as_slice() {
            for (key, value) in track.entries() {
                let field = match key {
                    "codec" => Field::Vcodec,
                    "width" => Field::Width,
                    "height" => Field::Height,
                    other => Field::Other(Cow::Owned(format!("video_{other}"))),
                };
                self.set(field, value);
            }
            self.set_default(Field::Vcodec, "?");
        }
    }
}

fn shared_codec(tracks: &[Track]) -> Option<&str> {
    let first = tracks.first()?.codec.as_str();
    tracks
        .iter()
        .all(|t| t.codec == first)
        .then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_semantics() {
        let mut info = Info::with_filename("a.mp4");
        info.set_format("mp4");
        info.set(Field::Subformat, "mp4");
        info.set_format("mov");
        info.set_default(Field::Format, "never");
        assert_eq!(info.format(), Some("mov"));
        assert_eq!(info.get_str(&Field::Filename), Some("a.mp4"));
        assert_eq!(info.subformat(), Some("mp4"));
    }

    #[test]
    fn test_field_names() {
        assert_eq!(Field::from_name("minor_version"), Field::MinorVersion);
        assert_eq!(Field::MinorVersion.as_str(), "minor_version");
        let other = Field::from_name("video_profile");
        assert_eq!(other.as_str(), "video_profile");
        assert_eq!(other.to_string(), "video_profile");
    }

    #[test]
    fn test_track_dimension_limits() {
        let mut track = Track::video("h264");
        assert!(track.set_dimensions(15, 100).is_err());
        assert!(track.set_dimensions(100, 16384).is_err());
        assert_eq!(track.width, None);
        track.set_dimensions(16, 16383).unwrap();
        assert_eq!((track.width, track.height), (Some(16), Some(16383)));
    }

    #[test]
    fn test_promote_single_tracks() {
        let mut info = Info::new();
        let video = info.add_track(Track::video("h264"));
        video.set_dimensions(1920, 1080).unwrap();
        video.set_extra("profile", "high");
        let audio = info.add_track(Track::audio("ac3"));
        audio.sample_rate = Some(48000);
        audio.channel_count = Some(5);
        audio.sample_size = Some(16);
        info.promote_track_fields();

        assert_eq!(info.get_str(&Field::Vcodec), Some("h264"));
        assert_eq!(info.width(), Some(1920));
        assert_eq!(info.height(), Some(1080));
        assert_eq!(
            info.get_str(&Field::from_name("video_profile")),
            Some("high")
        );
        assert_eq!(info.get_str(&Field::Acodec), Some("ac3"));
        assert_eq!(info.get_u64(&Field::Arate), Some(48000));
        assert_eq!(info.get_u64(&Field::Anch), Some(5));
        assert_eq!(info.get_u64(&Field::Asbits), Some(16));
    }

    #[test]
    fn test_promote_multiple_tracks() {
        let mut info = Info::new();
        info.add_track(Track::audio("mp3"));
        info.add_track(Track::audio("aac"));
        info.add_track(Track::video("h264")).set_dimensions(640, 480).unwrap();
        info.add_track(Track::video("jpeg")).set_dimensions(640, 480).unwrap();
        info.promote_track_fields();
        assert_eq!(info.get_str(&Field::Acodec), Some("multiple"));
        // Same dimensions: the first video track wins.
        assert_eq!(info.get_str(&Field::Vcodec), Some("h264"));
        assert_eq!(info.width(), Some(640));

        let mut info = Info::new();
        info.add_track(Track::audio("aac"));
        info.add_track(Track::audio("aac"));
        info.add_track(Track::video("h264")).set_dimensions(640, 480).unwrap();
        info.add_track(Track::video("h264")).set_dimensions(320, 240).unwrap();
        info.promote_track_fields();
        assert_eq!(info.get_str(&Field::Acodec), Some("aac"));
        assert_eq!(info.get_str(&Field::Vcodec), Some("h264"));
        assert_eq!(info.width(), None);

        let mut info = Info::new();
        info.add_track(Track::video("vp8")).set_dimensions(640, 480).unwrap();
        info.add_track(Track::video("h264")).set_dimensions(320, 240).unwrap();
        info.promote_track_fields();
        assert_eq!(info.get_str(&Field::Vcodec), Some("multiple"));
    }
}
