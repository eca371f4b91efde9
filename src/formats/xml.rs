//! XML root element sniffing
//!
//! With the `xml` feature the first element of the document decides the
//! final format: an `svg` root gives `svg` (with its size when known) and an
//! `html` root in the XHTML namespace gives `xhtml`. Without the feature the
//! format stays `xml`.

use crate::{
    error::{Error, Result},
    info::Info,
    source::{ByteSource, ByteSourceExt},
};

/// Bytes searched for the root element
pub const MAX_XML_HEADER_SIZE: usize = 4096;

#[cfg_attr(not(feature = "xml"), allow(dead_code))]
const XHTML_NAMESPACE: &[u8] = b"http://www.w3.org/1999/xhtml";

/// Analyzes an XML document
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let data = src.read_vec(MAX_XML_HEADER_SIZE)?;
    if data.iter().find(|b| !b.is_ascii_whitespace() && **b != 0x0b) != Some(&b'<') {
        return Err(Error::bad("xml signature not found"));
    }
    info.set_format("xml");
    refine(&data, info);
    Ok(())
}

#[cfg(feature = "xml")]
fn refine(data: &[u8], info: &mut Info) {
    use quick_xml::{events::Event, Reader};

    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                apply_root(e, info);
                return;
            }
            Ok(Event::Eof) => return,
            // Usually the root start tag cut off at the end of the header
            Err(e) => {
                tracing::trace!(error = %e, "xml header not parsed to the root");
                if looks_like_svg_root(data) {
                    info.set_format("svg");
                }
                return;
            }
            _ => {}
        }
    }
}

#[cfg(not(feature = "xml"))]
fn refine(_data: &[u8], _info: &mut Info) {}

#[cfg(feature = "xml")]
fn apply_root(root: &quick_xml::events::BytesStart<'_>, info: &mut Info) {
    let attr = |name: &[u8]| {
        root.attributes()
            .with_checks(false)
            .flatten()
            .find(|a| a.key.as_ref() == name)
            .map(|a| a.value.into_owned())
    };
    match root.local_name().as_ref() {
        b"svg" => {
            info.set_format("svg");
            if let Some((width, height)) = svg_dimensions(attr(b"width"), attr(b"height"), attr(b"viewBox")) {
                info.set_dimensions(width, height);
            }
        }
        b"html" if attr(b"xmlns").as_deref() == Some(XHTML_NAMESPACE) => info.set_format("xhtml"),
        _ => {}
    }
}

#[cfg(feature = "xml")]
fn looks_like_svg_root(data: &[u8]) -> bool {
    let start = data.iter().position(|b| !b.is_ascii_whitespace() && *b != 0x0b).unwrap_or(0);
    let rest = &data[start..];
    rest.starts_with(b"<svg")
        && matches!(rest.get(4), None | Some(b'>' | b':' | b'/') | Some(b'\t' | b'\n' | b'\x0b' | b'\x0c' | b'\r' | b' '))
}

/// Width and height from the attributes, or else from the viewBox
#[cfg_attr(not(feature = "xml"), allow(dead_code))]
fn svg_dimensions(
    width: Option<Vec<u8>>,
    height: Option<Vec<u8>>,
    view_box: Option<Vec<u8>>,
) -> Option<(u32, u32)> {
    let dimen = |v: &[u8]| std::str::from_utf8(v).ok().and_then(|s| parse_svg_dimen(s).ok());
    if let (Some(w), Some(h)) = (&width, &height) {
        if let (Some(w), Some(h)) = (dimen(w), dimen(h)) {
            return Some((w, h));
        }
    }
    let view_box = String::from_utf8(view_box?).ok()?;
    let parts: Vec<&str> = view_box
        .split(|c: char| c.is_ascii_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .collect();
    match parts.as_slice() {
        [_, _, w, h] => Some((parse_svg_dimen(w).ok()?, parse_svg_dimen(h).ok()?)),
        _ => None,
    }
}

/// Parses an SVG length into whole pixels (90 dpi), rounding halves up
///
/// Accepts a non-negative number with an optional fraction and exponent,
/// followed by an optional unit: `px`, `in`, `pt`, `pc`, `mm` or `cm`.
pub fn parse_svg_dimen(value: &str) -> Result<u32> {
    let s = value.trim_matches(|c: char| c.is_ascii_whitespace());
    let bytes = s.as_bytes();
    let digits = |mut i: usize| {
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };
    let int_end = digits(0);
    let mut end = int_end;
    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits(end + 1);
        frac_digits = frac_end - end - 1;
        end = frac_end;
    }
    if int_end == 0 && frac_digits == 0 {
        return Err(Error::bad(format!("bad svg dimension: {value:?}")));
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut i = end + 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let exp_end = digits(i);
        if exp_end > i {
            end = exp_end;
        }
    }
    let number: f64 = s[..end]
        .parse()
        .map_err(|_| Error::bad(format!("bad svg dimension: {value:?}")))?;
    let scale = match s[end..].trim_start() {
        "" | "px" => 1.0,
        "in" => 90.0,
        "pt" => 1.25,
        "pc" => 15.0,
        "mm" => 3.543307,
        "cm" => 35.43307,
        unit => return Err(Error::bad(format!("unsupported svg unit: {unit:?}"))),
    };
    let pixels = (number * scale + 0.5).floor();
    if !(0.0..=u32::MAX as f64).contains(&pixels) {
        return Err(Error::bad(format!("svg dimension out of range: {value:?}")));
    }
    Ok(pixels as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;

    fn run(data: &[u8]) -> (Result<()>, Info) {
        let mut info = Info::new();
        let result = analyze(&mut SliceSource::new(data), &mut info);
        (result, info)
    }

    #[test]
    fn test_parse_svg_dimen() {
        for bad in ["", ".", "-5", "10sp", "10em", "10%"] {
            assert!(parse_svg_dimen(bad).is_err(), "{bad:?}");
        }
        let cases = [
            ("0", 0),
            ("00092", 92),
            ("42.0", 42),
            ("42.40000", 42),
            ("42.5", 43),
            ("2e3", 2000),
            ("23456789e-3", 23457),
            ("10 in", 900),
            ("10 px", 10),
            ("10 pt", 13),
            ("100pt", 125),
            ("10pc", 150),
            ("10.2pc", 153),
            ("10mm", 35),
            ("10cm", 354),
        ];
        for (value, pixels) in cases {
            assert_eq!(parse_svg_dimen(value).unwrap(), pixels, "{value:?}");
        }
    }

    #[test]
    fn test_not_xml() {
        let (result, info) = run(b"\t\x0chtml=");
        assert!(result.is_err());
        assert_eq!(info.format(), None);
    }

    #[cfg(feature = "xml")]
    #[test]
    fn test_svg_dimensions() {
        let (result, info) = run(
            b"<?xml version=\"1.0\" standalone=\"no\"?>\n<!-- a\ncomment -->\n\
              <svg\n   xmlns=\"http://www.w3.org/2000/svg\"\n   width=\"208\"\n   height=\"136\">\n  <title",
        );
        result.unwrap();
        assert_eq!(info.format(), Some("svg"));
        assert_eq!((info.width(), info.height()), (Some(208), Some(136)));
    }

    #[cfg(feature = "xml")]
    #[test]
    fn test_prefixed_svg_with_units() {
        let (result, info) = run(
            b"<svg:svg xmlns = 'http://www.w3.org/2000/svg' width=\"2e3\" height=\"0009px\">",
        );
        result.unwrap();
        assert_eq!(info.format(), Some("svg"));
        assert_eq!((info.width(), info.height()), (Some(2000), Some(9)));
    }

    #[cfg(feature = "xml")]
    #[test]
    fn test_svg_view_box() {
        let (result, info) =
            run(b"<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"100%\" viewBox=\"0 0 64 48\"/>");
        result.unwrap();
        assert_eq!((info.width(), info.height()), (Some(64), Some(48)));
    }

    #[cfg(feature = "xml")]
    #[test]
    fn test_cut_off_svg_root() {
        let (result, info) = run(b"<svg\t");
        result.unwrap();
        assert_eq!(info.format(), Some("svg"));
        assert_eq!(info.width(), None);
    }

    #[cfg(feature = "xml")]
    #[test]
    fn test_xhtml() {
        let html = "<html lang=\"en\"\txmlns=\"http://www.w3.org/1999/xhtml\">";
        for prefix in ["", "<?xml version=\"1.0\"?>\r\n", "<!-- hi --> <!DOCTYPE html>\n"] {
            let (result, info) = run(format!("{prefix}{html}").as_bytes());
            result.unwrap();
            assert_eq!(info.format(), Some("xhtml"), "{prefix:?}");
        }
    }

    #[cfg(feature = "xml")]
    #[test]
    fn test_other_root_stays_xml() {
        let (result, info) = run(b"<?xml version=\"1.0\"?>\n<TeXmacs version=\"1.99.9\">");
        result.unwrap();
        assert_eq!(info.format(), Some("xml"));
    }
}
