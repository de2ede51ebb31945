//! `Accept` header parsing for response negotiation.
//!
//! Only what negotiation needs is kept: media ranges and their q-values.
//! Parameters other than `q` are ignored.

#[derive(Debug, Clone, PartialEq)]
struct MediaRange {
    kind: String,
    subtype: String,
    q: f32,
}

impl MediaRange {
    fn parse(part: &str) -> Option<Self> {
        let mut params = part.split(';');
        let essence = params.next()?.trim().to_ascii_lowercase();
        let (kind, subtype) = essence.split_once('/')?;
        if kind.is_empty() || subtype.is_empty() {
            return None;
        }

        let mut q = 1.0;
        for param in params {
            if let Some((name, value)) = param.split_once('=') {
                if name.trim().eq_ignore_ascii_case("q") {
                    q = value.trim().parse::<f32>().unwrap_or(0.0).clamp(0.0, 1.0);
                }
            }
        }

        Some(MediaRange {
            kind: kind.trim().to_string(),
            subtype: subtype.trim().to_string(),
            q,
        })
    }

    /// 3 for an exact match, 2 for `type/*`, 1 for `*/*`, `None` otherwise.
    fn specificity(&self, kind: &str, subtype: &str) -> Option<u8> {
        match (self.kind.as_str(), self.subtype.as_str()) {
            ("*", "*") => Some(1),
            (k, "*") if k == kind => Some(2),
            (k, s) if k == kind && s == subtype => Some(3),
            _ => None,
        }
    }
}

/// Parsed `Accept` header. An absent header parses to an empty list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptHeader {
    ranges: Vec<MediaRange>,
}

impl AcceptHeader {
    pub fn parse(raw: &str) -> Self {
        AcceptHeader {
            ranges: raw.split(',').filter_map(MediaRange::parse).collect(),
        }
    }

    pub fn from_header(raw: Option<&str>) -> Self {
        raw.map(Self::parse).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The exact media type appears in the header with a non-zero q.
    pub fn lists(&self, mime: &str) -> bool {
        let Some((kind, subtype)) = split_mime(mime) else {
            return false;
        };
        self.ranges
            .iter()
            .any(|r| r.specificity(&kind, &subtype) == Some(3) && r.q > 0.0)
    }

    /// The media type is acceptable: the most specific matching range has a
    /// non-zero q.
    pub fn admits(&self, mime: &str) -> bool {
        let Some((kind, subtype)) = split_mime(mime) else {
            return false;
        };
        self.ranges
            .iter()
            .filter_map(|r| r.specificity(&kind, &subtype).map(|s| (s, r.q)))
            .max_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)))
            .is_some_and(|(_, q)| q > 0.0)
    }
}

fn split_mime(mime: &str) -> Option<(String, String)> {
    let essence = mime.split(';').next()?.trim().to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;
    Some((kind.to_string(), subtype.to_string()))
}
