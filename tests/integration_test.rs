// Integration tests using the test_utils module

/// Routes library logs to the test output; `RUST_LOG=media_probe=trace` shows walker steps
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("media_probe=warn"));
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}

#[cfg(test)]
mod sample_tests {
    use media_probe::{test_utils::*, *};

    #[test]
    fn test_every_sample_detected() {
        super::init_logging();
        for name in list_all_samples() {
            let data = sample_bytes(name).unwrap();
            let info = detect_bytes(&data).unwrap_or_else(|e| panic!("{name}: {e}"));
            assert_eq!(info.format(), expected_format(name), "{name}");
        }
    }

    #[test]
    fn test_detection_is_idempotent() {
        for name in list_all_samples() {
            let data = sample_bytes(name).unwrap();
            let first = detect_bytes(&data).unwrap();
            let second = detect_bytes(&data).unwrap();
            assert_eq!(first, second, "{name}");
        }
    }

    #[test]
    fn test_sample_metadata() {
        let info = detect_bytes(&sample_bytes(PNG).unwrap()).unwrap();
        assert_eq!((info.width(), info.height()), (Some(1281), Some(770)));
        assert_eq!(info.codec(), Some("flate"));

        let info = detect_bytes(&sample_bytes(JPEG).unwrap()).unwrap();
        assert_eq!((info.width(), info.height()), (Some(640), Some(480)));

        let info = detect_bytes(&sample_bytes(BMP).unwrap()).unwrap();
        assert_eq!((info.width(), info.height()), (Some(4), Some(2)));
        assert_eq!(info.codec(), Some("uncompressed"));

        let info = detect_bytes(&sample_bytes(WAV).unwrap()).unwrap();
        assert_eq!(info.get_str(&Field::Acodec), Some("pcm"));
        assert_eq!(info.get_u64(&Field::Anch), Some(2));
        assert_eq!(info.get_u64(&Field::Arate), Some(44100));
        assert_eq!(info.get_u64(&Field::Asbits), Some(16));

        let info = detect_bytes(&sample_bytes(FLAC).unwrap()).unwrap();
        assert_eq!(info.get_str(&Field::Acodec), Some("flac"));

        let info = detect_bytes(&sample_bytes(MP3).unwrap()).unwrap();
        assert_eq!(info.get_str(&Field::Acodec), Some("mp3"));
        assert_eq!(info.get_u64(&Field::Arate), Some(44100));

        let info = detect_bytes(&sample_bytes(IVF).unwrap()).unwrap();
        assert_eq!(info.get_str(&Field::Vcodec), Some("vp8"));
        assert_eq!((info.width(), info.height()), (Some(320), Some(240)));

        let info = detect_bytes(&sample_bytes(WEBM).unwrap()).unwrap();
        assert_eq!(info.get_str(&Field::Vcodec), Some("vp8"));
        assert_eq!((info.width(), info.height()), (Some(640), Some(360)));

        let info = detect_bytes(&sample_bytes(MP4).unwrap()).unwrap();
        assert_eq!(info.subformat(), Some("isom"));
        assert_eq!(info.get_str(&Field::Vcodec), Some("h264"));
        assert_eq!((info.width(), info.height()), (Some(1280), Some(720)));
    }

    #[cfg(feature = "xml")]
    #[test]
    fn test_svg_sample() {
        let info = detect_bytes(&sample_bytes(SVG).unwrap()).unwrap();
        assert_eq!(info.format(), Some("svg"));
        assert_eq!((info.width(), info.height()), (Some(64), Some(48)));
    }

    #[test]
    fn test_fixture_path_resolution() {
        // Should return path to tests/fixtures by default
        let path = fixture_path("test.gif");
        assert!(path.to_str().unwrap().contains("tests/fixtures"));
        assert!(path.to_str().unwrap().ends_with("test.gif"));
    }

    #[test]
    fn test_extended_fixtures() {
        super::init_logging();
        // Only checks files when MEDIA_PROBE_TEST_FIXTURES points at a directory
        let fixtures = list_fixtures().unwrap();
        assert!(fixtures.len() >= list_all_samples().len());
        for name in fixtures {
            if expected_format(&name).is_some() {
                continue;
            }
            let path = fixture_path(&name);
            let mut info = Info::with_filename(name.clone());
            let file = std::fs::File::open(&path).unwrap();
            let size = file.metadata().unwrap().len();
            let mut source = SeekSource::new(std::io::BufReader::new(file), size);
            // Real files may be corrupt; the partial record must still carry a format.
            let _ = detect_into(&mut source, &mut info);
            assert!(info.format().is_some(), "{name}");
        }
    }
}

#[cfg(test)]
mod scenario_tests {
    use media_probe::{
        format_db::{FormatDb, FormatDef},
        signature::{Pattern, Score},
        test_utils::*,
        *,
    };

    #[test]
    fn test_gif_logical_screen() {
        let info = detect_bytes(b"GIF89a\x05\x01\x03\x02\0\0\0").unwrap();
        assert_eq!(info.format(), Some("gif"));
        assert_eq!((info.width(), info.height()), (Some(261), Some(515)));
    }

    #[test]
    fn test_webm_doc_type() {
        let info = detect_bytes(&sample_bytes(WEBM_HEADER).unwrap()).unwrap();
        assert_eq!(info.format(), Some("webm"));
        assert_eq!(info.subformat(), Some("webm"));
    }

    #[test]
    fn test_quicktime_brand() {
        let info = detect_bytes(&sample_bytes(MOV).unwrap()).unwrap();
        assert_eq!(info.format(), Some("mov"));
        assert_eq!(info.subformat(), Some("qt"));
    }

    #[test]
    fn test_transport_stream_h264() {
        let info = detect_bytes(&sample_bytes(MPEG_TS).unwrap()).unwrap();
        assert_eq!(info.format(), Some("mpeg-ts"));
        assert_eq!(info.subformat(), Some("ts"));
        assert_eq!(info.tracks.len(), 1);
        let track = &info.tracks[0];
        assert_eq!(track.kind, TrackKind::Video);
        assert_eq!(track.codec, "h264");
        assert_eq!(info.get_str(&Field::Vcodec), Some("h264"));
        assert_eq!((info.width(), info.height()), (Some(1920), Some(1080)));
    }

    fn weak(_: &[u8]) -> Score {
        Score::when(true, 100)
    }

    fn strong(header: &[u8]) -> Score {
        Score::when(header[3] == b'!', 400)
    }

    // The weak format is registered first, so a tie would go to it.
    const SCORED_DEFS: &[FormatDef] = &[
        FormatDef {
            name: "weak",
            specs: &[&[(0, Pattern::Bytes(b"AB")), (4, Pattern::Score(weak))]],
            analyze: None,
            extra_formats: &[],
        },
        FormatDef {
            name: "strong",
            specs: &[&[(0, Pattern::Bytes(b"AB")), (4, Pattern::Score(strong))]],
            analyze: None,
            extra_formats: &[],
        },
    ];

    #[test]
    fn test_higher_predicate_confidence_wins() {
        let db = FormatDb::new(SCORED_DEFS).unwrap();
        let detection = db.detect_header(b"ABC!").unwrap();
        assert_eq!(detection.format, "strong");
        assert_eq!(detection.confidence, Some(600));

        let detection = db.detect_header(b"ABC?").unwrap();
        assert_eq!(detection.format, "weak");
        assert_eq!(detection.confidence, Some(300));
    }

    #[test]
    fn test_zero_length_input() {
        let info = detect_bytes(b"").unwrap();
        assert_eq!(info.format(), Some("empty"));
        assert_eq!(info.fields().count(), 1);
        assert!(info.tracks.is_empty());
    }
}

#[cfg(test)]
mod registry_tests {
    use media_probe::{
        signature::{check_spec, spec_prefixes, MatchOutcome, Pattern, Score},
        test_utils::*,
        *,
    };

    #[test]
    fn test_registry_validates() {
        let db = registry().unwrap();
        assert!(db.header_preread_size() <= FormatDbConfig::default().header_size_limit);
        assert!(db.header_preread_size() >= 64);
    }

    #[test]
    fn test_list_formats() {
        let formats = list_formats();
        assert!(formats.windows(2).all(|w| w[0] < w[1]), "sorted, no duplicates");
        for name in list_all_samples() {
            let format = expected_format(name).unwrap();
            assert!(formats.contains(&format), "{format}");
        }
    }

    #[test]
    fn test_prefix_derivation() {
        let spec: &[(usize, Pattern)] = &[
            (0, Pattern::OneOf(&[b"foo", b"fox"])),
            (3, Pattern::Bytes(b"bar")),
        ];
        let prefixes = spec_prefixes(spec, 50, 6).unwrap();
        assert_eq!(prefixes, vec![b"foobar".to_vec(), b"foxbar".to_vec()]);

        let prefixes = spec_prefixes(spec, 50, 4).unwrap();
        assert_eq!(prefixes, vec![b"foob".to_vec(), b"foxb".to_vec()]);
    }

    fn comma_or_plus(header: &[u8]) -> Score {
        Score::when(matches!(header[3], b',' | b'+'), 87)
    }

    #[test]
    fn test_spec_matching_outcomes() {
        let spec: &[(usize, Pattern)] = &[
            (0, Pattern::Bytes(b"foo")),
            (4, Pattern::OneOf(&[b"bar", b"baz"])),
            (8, Pattern::Score(comma_or_plus)),
        ];
        assert!(matches!(check_spec(spec, b"foo,barBAZ").unwrap(), MatchOutcome::Matched(_)));
        assert_eq!(check_spec(spec, b"foo,ba").unwrap(), MatchOutcome::TooShort);
        assert_eq!(check_spec(spec, b"foo;barC").unwrap(), MatchOutcome::Mismatch);
    }

    #[test]
    fn test_unknown_header_truncated_to_preread() {
        let db = registry().unwrap();
        let data = vec![b'~'; 4096];
        let detection = db.detect(&mut SliceSource::new(&data)).unwrap();
        assert!(detection.is_unknown());
        assert_eq!(detection.format, UNKNOWN_FORMAT);
        assert_eq!(detection.header.len(), db.header_preread_size());
    }

    #[test]
    fn test_detect_from_plain_reader() {
        let data = sample_bytes(ANIMATED_GIF).unwrap();
        let mut source = ReadSource::new(std::io::Cursor::new(data));
        let info = detect(&mut source, Info::new()).unwrap();
        assert_eq!(info.format(), Some("agif"));
    }
}

#[cfg(test)]
mod processing_tests {
    use media_probe::{test_utils::*, *};
    use sha2::{Digest, Sha256};

    #[test]
    fn test_processing_source_hashes_consumed_bytes() {
        let data = sample_bytes(MOV).unwrap();
        let mut hasher = Sha256::new();
        let mut consumed = 0usize;
        {
            let mut source = ProcessingSource::new(SliceSource::new(&data), |chunk: &[u8]| {
                hasher.update(chunk);
                consumed += chunk.len();
            });
            let info = detect(&mut source, Info::new()).unwrap();
            assert_eq!(info.format(), Some("mov"));
        }
        // The skipped mdat payload (ending at 52) is fed to the callback too.
        assert!(consumed >= 52 && consumed <= data.len());
        assert_eq!(hasher.finalize(), Sha256::digest(&data[..consumed]));
    }

    #[test]
    fn test_processing_source_exclude_mode() {
        let data = sample_bytes(PNG).unwrap();
        let mut seen = Vec::new();
        let mut source = ProcessingSource::new(SliceSource::new(&data), |chunk: &[u8]| {
            seen.extend_from_slice(chunk)
        });
        source.set_exclude_mode(true);
        assert!(source.is_exclude_mode());
        let info = detect(&mut source, Info::new()).unwrap();
        drop(source);
        assert_eq!(info.format(), Some("png"));
        assert!(seen.is_empty());
    }
}

#[cfg(test)]
#[cfg(feature = "memory-mapped")]
mod mmap_tests {
    use media_probe::{test_utils::*, *};
    use std::io::Write;

    #[test]
    fn test_mmap_source() {
        let path = std::env::temp_dir().join(format!("media-probe-mmap-{}.flac", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(&sample_bytes(FLAC).unwrap()).unwrap();
        }
        let file = std::fs::File::open(&path).unwrap();
        // Safety: the file is not modified while mapped
        let mut source = unsafe { MmapSource::new(&file) }.unwrap();
        let info = detect(&mut source, Info::new()).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(info.format(), Some("flac"));
    }
}
