//! Content negotiation
//!
//! Parses `Accept`-style headers (RFC 7231 §5.3) and picks the best of the
//! types a server offers. Candidates rank by specificity, then quality, then
//! position in the header. Quality zero means "not acceptable".

use smallvec::SmallVec;

/// One entry of an `Accept`-style header.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange<'a> {
    /// `text/html`, `text/*`, `*/*`, or a bare token such as `gzip`.
    pub range: &'a str,
    pub params: SmallVec<[(&'a str, &'a str); 2]>,
    pub q: f32,
}

impl<'a> MediaRange<'a> {
    fn specificity(&self) -> (u8, bool) {
        let level = if self.range == "*/*" || self.range == "*" {
            0
        } else if self.range.ends_with("/*") {
            1
        } else {
            2
        };
        (level, !self.params.is_empty())
    }

    /// Whether `offered` falls within this range.
    pub fn matches(&self, offered: &str) -> bool {
        match self.specificity().0 {
            0 => true,
            1 => {
                let main = &self.range[..self.range.len() - 2];
                offered
                    .split_once('/')
                    .map_or(false, |(m, _)| m.eq_ignore_ascii_case(main))
            }
            _ => offered.eq_ignore_ascii_case(self.range),
        }
    }
}

/// Parse a header into media ranges, in header order.
pub fn parse_accept(header: &str) -> SmallVec<[MediaRange<'_>; 4]> {
    let mut out = SmallVec::new();
    for item in header.split(',') {
        let mut parts = item.split(';');
        let range = parts.next().unwrap_or("").trim();
        if range.is_empty() {
            continue;
        }
        let mut q = 1.0;
        let mut params = SmallVec::new();
        for param in parts {
            let Some((k, v)) = param.split_once('=') else {
                continue;
            };
            let (k, v) = (k.trim(), v.trim().trim_matches('"'));
            if k.eq_ignore_ascii_case("q") {
                q = v.parse::<f32>().unwrap_or(0.0).clamp(0.0, 1.0);
            } else {
                params.push((k, v));
            }
        }
        out.push(MediaRange { range, params, q });
    }
    out
}

/// The outcome of a negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated<'a> {
    /// The chosen offered type.
    pub media_type: &'a str,
    /// Parameters of the header entry that selected it.
    pub params: Vec<(String, String)>,
}

/// Pick the best type from `offered` for `header`.
///
/// With no header (or a blank one) the first offered type is selected.
/// `None` means nothing offered is acceptable; callers answer 406 for
/// responses and 415 for requests.
///
/// ```rust
/// use apiforge_core::negotiation::negotiate;
///
/// let offered = ["application/json", "application/cbor"];
/// let pick = negotiate(Some("application/cbor;q=0.9, */*;q=0.1"), &offered).unwrap();
/// assert_eq!(pick.media_type, "application/cbor");
/// assert!(negotiate(Some("text/html"), &offered).is_none());
/// ```
pub fn negotiate<'a, S: AsRef<str>>(header: Option<&str>, offered: &'a [S]) -> Option<Negotiated<'a>> {
    let header = header.map(str::trim).unwrap_or("");
    if header.is_empty() {
        return offered.first().map(|o| Negotiated {
            media_type: o.as_ref(),
            params: Vec::new(),
        });
    }

    let mut candidates: SmallVec<[(usize, MediaRange<'_>); 4]> = parse_accept(header)
        .into_iter()
        .filter(|r| r.q > 0.0)
        .enumerate()
        .collect();

    candidates.sort_by(|(ia, a), (ib, b)| {
        b.specificity()
            .cmp(&a.specificity())
            .then_with(|| b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| ia.cmp(ib))
    });

    for (_, candidate) in &candidates {
        if let Some(found) = offered.iter().find(|o| candidate.matches(o.as_ref())) {
            return Some(Negotiated {
                media_type: found.as_ref(),
                params: candidate
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
    }
    None
}

/// Best of `allowed` for a header with quality values, preferring the first
/// allowed value on ties. Wildcards are not expanded.
pub fn select_q_value<'a>(header: &str, allowed: &[&'a str]) -> Option<&'a str> {
    let mut best: Option<&'a str> = None;
    let mut best_q = 0.0;
    for range in parse_accept(header) {
        let Some(name) = allowed.iter().copied().find(|a| *a == range.range) else {
            continue;
        };
        if range.q > best_q || (range.q == best_q && best.is_some() && Some(&name) == allowed.first()) {
            best_q = range.q;
            best = Some(name);
        }
    }
    best
}
