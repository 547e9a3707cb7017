use std::fmt;

/// A parsed media type: lowercase `type/subtype` plus its parameters.
///
/// Used both as the key of the serializer registry (normalized essence) and
/// as the carrier of codec parameters such as `charset` and `boundary`.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaType {
    kind: String,
    subtype: String,
    params: Vec<(String, String)>,
}

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_FORM: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";
pub const MULTIPART_MIXED: &str = "multipart/mixed";
pub const APPLICATION_XML: &str = "application/xml";
pub const TEXT_PLAIN: &str = "text/plain";

impl MediaType {
    /// Parse a `Content-Type`-style value, e.g.
    /// `multipart/form-data; boundary=AaB03x`.
    ///
    /// Returns `None` when the essence is not `type/subtype` shaped.
    pub fn parse(value: &str) -> Option<MediaType> {
        let mut sections = value.split(';');
        let essence = sections.next()?.trim();
        let (kind, subtype) = essence.split_once('/')?;
        if kind.is_empty() || subtype.is_empty() {
            return None;
        }
        let params = sections
            .filter_map(|section| {
                let (name, value) = section.split_once('=')?;
                let value = value.trim().trim_matches('"');
                Some((name.trim().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        Some(MediaType {
            kind: kind.trim().to_ascii_lowercase(),
            subtype: subtype.trim().to_ascii_lowercase(),
            params,
        })
    }

    /// Build from an already-normalized essence such as `application/json`.
    pub fn essence_only(essence: &str) -> MediaType {
        MediaType::parse(essence).unwrap_or(MediaType {
            kind: "application".into(),
            subtype: "octet-stream".into(),
            params: Vec::new(),
        })
    }

    /// The normalized `type/subtype` string without parameters.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.kind, self.subtype)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// Look up a parameter by (case-insensitive) name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The declared charset, defaulting to UTF-8 when absent.
    pub fn charset(&self) -> &str {
        self.param("charset").unwrap_or("utf-8")
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary")
    }

    /// Whether this (possibly wildcarded) type accepts `other`.
    ///
    /// `*/*` accepts everything, `text/*` accepts any text subtype.
    pub fn accepts(&self, other: &MediaType) -> bool {
        (self.kind == "*" || self.kind == other.kind)
            && (self.subtype == "*" || self.subtype == other.subtype)
    }

    pub fn is_wildcard(&self) -> bool {
        self.kind == "*" && self.subtype == "*"
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)?;
        for (name, value) in &self.params {
            write!(f, "; {name}={value}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// Parse an `Accept`-style header into media types ordered by descending
/// q-value. Entries with `q=0` are dropped; ties keep declaration order.
pub fn parse_accept(value: &str) -> Vec<MediaType> {
    let mut weighted: Vec<(MediaType, f32, usize)> = value
        .split(',')
        .enumerate()
        .filter_map(|(position, entry)| {
            let media = MediaType::parse(entry.trim())?;
            let q = media
                .param("q")
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            if q <= 0.0 {
                return None;
            }
            Some((media, q, position))
        })
        .collect();
    weighted.sort_by(|(_, qa, pa), (_, qb, pb)| {
        qb.partial_cmp(qa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(pa.cmp(pb))
    });
    weighted.into_iter().map(|(media, _, _)| media).collect()
}

/// Parse an `Accept-Language` header into tags ordered by descending q-value.
pub fn parse_accept_language(value: &str) -> Vec<String> {
    let mut weighted: Vec<(String, f32, usize)> = value
        .split(',')
        .enumerate()
        .filter_map(|(position, entry)| {
            let mut sections = entry.split(';');
            let tag = sections.next()?.trim();
            if tag.is_empty() {
                return None;
            }
            let q = sections
                .filter_map(|s| s.trim().strip_prefix("q="))
                .next()
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            if q <= 0.0 {
                return None;
            }
            Some((tag.to_ascii_lowercase(), q, position))
        })
        .collect();
    weighted.sort_by(|(_, qa, pa), (_, qb, pb)| {
        qb.partial_cmp(qa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(pa.cmp(pb))
    });
    weighted.into_iter().map(|(tag, _, _)| tag).collect()
}
