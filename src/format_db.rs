//! FormatDb: prefix-indexed signature matching and analyzer dispatch
//!
//! Every registered spec is filed under the literal prefixes a matching
//! header must start with (see [`spec_prefixes`]). Detection reads the
//! header once, looks up the candidates for each prefix length of the
//! header from longest to shortest, fully checks each candidate spec and
//! keeps the match with the highest confidence. On a tie the format
//! registered first wins.
//!
//! The prefix index only narrows the candidate set; a spec with no usable
//! prefix is filed under the empty prefix and checked for every header.

use crate::{
    error::{Error, Result},
    info::Info,
    signature::{check_spec, spec_prefixes, validate_spec, MatchOutcome, Spec},
    source::{ByteSource, ByteSourceExt, PrereadSource},
};
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};
use tracing::{debug, trace};

/// Format name used when no signature matches
pub const UNKNOWN_FORMAT: &str = "?";

/// Per-format parser invoked after detection
///
/// The source starts at offset 0 of the file (the detection header is
/// replayed). The analyzer may refine `format` to one of the format's
/// `extra_formats`.
pub type AnalyzeFn = fn(&mut dyn ByteSource, &mut Info) -> Result<()>;

/// One registered format
#[derive(Clone, Copy)]
pub struct FormatDef {
    pub name: &'static str,
    /// Alternative header specs; matching any one suffices
    pub specs: &'static [Spec],
    pub analyze: Option<AnalyzeFn>,
    /// Formats the analyzer may assign instead of `name`
    pub extra_formats: &'static [&'static str],
}

impl fmt::Debug for FormatDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDef")
            .field("name", &self.name)
            .field("specs", &self.specs.len())
            .field("analyze", &self.analyze.is_some())
            .field("extra_formats", &self.extra_formats)
            .finish()
    }
}

/// Tuning knobs of a [`FormatDb`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDbConfig {
    /// Longest prefix used as an index key
    pub max_prefix_size: usize,
    /// No spec may inspect more header bytes than this
    pub header_size_limit: usize,
    /// Most prefixes a single spec may be filed under
    pub prefix_count_limit: usize,
}

impl Default for FormatDbConfig {
    fn default() -> Self {
        Self {
            max_prefix_size: 4,
            header_size_limit: 512,
            prefix_count_limit: 50,
        }
    }
}

/// Result of matching a header against the database
#[derive(Debug, Clone)]
pub struct Detection {
    /// Detected format, or [`UNKNOWN_FORMAT`]
    pub format: &'static str,
    /// Confidence of the winning match
    pub confidence: Option<i64>,
    /// The header bytes read from the source
    pub header: Vec<u8>,
    /// A format whose spec could still match if the input were longer
    pub too_short_for: Option<&'static str>,
    index: Option<usize>,
}

impl Detection {
    pub fn is_unknown(&self) -> bool {
        self.index.is_none()
    }
}

/// Immutable signature database
pub struct FormatDb {
    defs: Vec<FormatDef>,
    /// `by_prefix[len]` maps a prefix of that length to (def, spec) indexes
    by_prefix: Vec<HashMap<Vec<u8>, Vec<(usize, usize)>>>,
    header_preread_size: usize,
    formats: BTreeSet<&'static str>,
}

impl fmt::Debug for FormatDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDb")
            .field("formats", &self.defs.len())
            .field("header_preread_size", &self.header_preread_size)
            .finish()
    }
}

impl FormatDb {
    pub fn new(defs: &[FormatDef]) -> Result<Self> {
        Self::with_config(defs, FormatDbConfig::default())
    }

    /// Validates every spec and builds the prefix index
    pub fn with_config(defs: &[FormatDef], config: FormatDbConfig) -> Result<Self> {
        if config.prefix_count_limit < 1 {
            return Err(Error::InvalidSpec("prefix_count_limit must be at least 1".into()));
        }
        let mut by_prefix: Vec<HashMap<Vec<u8>, Vec<(usize, usize)>>> =
            vec![HashMap::new(); config.max_prefix_size + 1];
        let mut formats = BTreeSet::new();
        let mut header_preread_size = 0;

        for (def_idx, def) in defs.iter().enumerate() {
            if def.name == UNKNOWN_FORMAT || !formats.insert(def.name) {
                return Err(Error::InvalidSpec(format!("duplicate format: {}", def.name)));
            }
            for extra in def.extra_formats {
                if !formats.insert(*extra) {
                    return Err(Error::InvalidSpec(format!("duplicate extra format: {extra}")));
                }
            }
            for (spec_idx, &spec) in def.specs.iter().enumerate() {
                let end = validate_spec(spec, config.header_size_limit)
                    .map_err(|e| Error::InvalidSpec(format!("format {}: {e}", def.name)))?;
                header_preread_size = header_preread_size.max(end);
                for prefix in spec_prefixes(spec, config.prefix_count_limit, config.max_prefix_size)? {
                    let len = prefix.len().min(config.max_prefix_size);
                    let mut key = prefix;
                    key.truncate(len);
                    let bucket = by_prefix[len].entry(key).or_default();
                    if !bucket.contains(&(def_idx, spec_idx)) {
                        bucket.push((def_idx, spec_idx));
                    }
                }
            }
        }
        Ok(Self {
            defs: defs.to_vec(),
            by_prefix,
            header_preread_size,
            formats,
        })
    }

    /// Bytes read before matching starts
    pub fn header_preread_size(&self) -> usize {
        self.header_preread_size
    }

    /// Every format name this database can report, sorted
    pub fn formats(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.formats.iter().copied()
    }

    /// True for registered formats, their extra formats and [`UNKNOWN_FORMAT`]
    pub fn is_known(&self, format: &str) -> bool {
        format == UNKNOWN_FORMAT || self.formats.contains(format)
    }

    pub fn def(&self, name: &str) -> Option<&FormatDef> {
        self.defs.iter().find(|d| d.name == name)
    }

    /// Matches a header that was already read
    pub fn detect_header(&self, header: &[u8]) -> Result<Detection> {
        let header = &header[..header.len().min(self.header_preread_size)];
        // (confidence, def, spec); ties go to the lowest (def, spec).
        let mut best: Option<(i64, usize, usize)> = None;
        let mut too_short: Option<usize> = None;
        let max_j = header.len().min(self.by_prefix.len() - 1);
        for j in (0..=max_j).rev() {
            let Some(candidates) = self.by_prefix[j].get(&header[..j]) else {
                continue;
            };
            for &(def_idx, spec_idx) in candidates {
                let spec = self.defs[def_idx].specs[spec_idx];
                match check_spec(spec, header)? {
                    MatchOutcome::Matched(confidence) => {
                        let better = match best {
                            None => true,
                            Some((c, d, s)) => {
                                confidence > c || (confidence == c && (def_idx, spec_idx) < (d, s))
                            }
                        };
                        if better {
                            best = Some((confidence, def_idx, spec_idx));
                        }
                    }
                    MatchOutcome::TooShort => {
                        too_short = Some(too_short.map_or(def_idx, |t| t.min(def_idx)));
                    }
                    MatchOutcome::Mismatch => {}
                }
            }
        }
        let detection = match best {
            Some((confidence, def_idx, _)) => Detection {
                format: self.defs[def_idx].name,
                confidence: Some(confidence),
                header: header.to_vec(),
                too_short_for: None,
                index: Some(def_idx),
            },
            None => Detection {
                format: UNKNOWN_FORMAT,
                confidence: None,
                header: header.to_vec(),
                too_short_for: too_short.map(|i| self.defs[i].name),
                index: None,
            },
        };
        debug!(
            format = detection.format,
            confidence = ?detection.confidence,
            header_len = header.len(),
            "detected format"
        );
        Ok(detection)
    }

    /// Reads the header from `src` and matches it
    pub fn detect(&self, src: &mut dyn ByteSource) -> Result<Detection> {
        let header = src.read_vec(self.header_preread_size)?;
        self.detect_header(&header)
    }

    /// Detects the format of `src` and runs its analyzer on `info`
    ///
    /// `format` is written before the analyzer runs, so a failing analyzer
    /// still leaves the detected format (and whatever else it found) in
    /// `info`. Tracks are promoted to top-level fields in both cases.
    pub fn analyze(&self, src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
        info.set_default(crate::info::Field::Format, UNKNOWN_FORMAT);
        let detection = self.detect(src)?;
        info.set_format(detection.format);

        let Some(def_idx) = detection.index else {
            if let Some(name) = detection.too_short_for {
                return Err(Error::Truncated(format!(
                    "header too short for {name} ({} bytes)",
                    detection.header.len()
                )));
            }
            return Ok(());
        };
        let def = &self.defs[def_idx];
        let result = match def.analyze {
            Some(analyze) => {
                trace!(format = def.name, "running analyzer");
                let mut replay = PrereadSource::new(detection.header, &mut *src);
                analyze(&mut replay, info)
            }
            None => Ok(()),
        };
        if !info.tracks.is_empty() {
            info.promote_track_fields();
        }
        result?;

        match info.format() {
            Some(format) if !self.is_known(format) => Err(Error::Internal(format!(
                "analyzer for {} assigned unknown format {format}",
                def.name
            ))),
            _ => Ok(()),
        }
    }
}
