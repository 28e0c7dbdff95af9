//! DASH URL template substitution.
//!
//! From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf, templates may contain
//! `$RepresentationID$`, `$Number$`, `$SubNumber$`, `$Bandwidth$` and `$Time$`
//! identifiers, each with an optional `%0[width][conversion]` format tag, and
//! `$$` as an escape for a literal `$`. Instead of pulling in C printf() or a
//! reimplementation such as the printf_compat crate, we reimplement this
//! functionality directly.

use regex::{Captures, Regex, Replacer};
use std::sync::LazyLock;

use crate::{HibikiError, HibikiResult};

// An absent identifier with no format tag is the `$$` escape.
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|SubNumber|Bandwidth|Time)?(?:%0(\d+)([diuoxX]))?\$")
        .unwrap()
});

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z]+)(?:%0\d+[A-Za-z])?\$").unwrap());

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateValues<'a> {
    pub representation_id: Option<&'a str>,
    pub number: Option<u64>,
    pub sub_number: Option<u64>,
    pub bandwidth: Option<u64>,
    pub time: Option<u64>,
}

/// Substitute every identifier of `template`. Tokens whose value is absent
/// are left in place with a warning; only `$Time$` can legitimately be absent
/// (the index template carries no per-segment values).
pub fn fill_uri_template(template: &str, values: &TemplateValues) -> String {
    TEMPLATE_REGEX
        .replace_all(template, TemplateReplacer(values))
        .to_string()
}

/// Reject templates that use identifiers this engine does not know about.
pub fn validate_template(template: &str) -> HibikiResult<()> {
    for caps in IDENTIFIER_REGEX.captures_iter(template) {
        let name = caps.get(1).unwrap().as_str();
        if !matches!(
            name,
            "RepresentationID" | "Number" | "SubNumber" | "Bandwidth" | "Time"
        ) {
            return Err(HibikiError::UnknownTemplateIdentifier(
                caps.get(0).unwrap().as_str().to_string(),
            ));
        }
    }
    Ok(())
}

/// Round a fractional `$Time$` value to whole timescale units, warning when
/// the manifest timing is further than 0.2 units from integral.
pub fn to_template_time(time: f64) -> u64 {
    let rounded = time.round();
    let delta = (time - rounded).abs();
    if delta >= 0.2 {
        tracing::warn!(time, delta, "Rounding inaccurate segment time");
    }
    rounded.max(0.0) as u64
}

/// Widening multiply for media times in timescale units. The product of a
/// position offset and a segment duration can exceed u64 on absurd inputs;
/// that fails the read instead of wrapping.
pub fn scale_media_time(units: u64, scale: u64) -> HibikiResult<u64> {
    u64::try_from(units as u128 * scale as u128)
        .map_err(|_| HibikiError::NumericOverflow("segment media time"))
}

struct TemplateReplacer<'a>(&'a TemplateValues<'a>);

impl Replacer for TemplateReplacer<'_> {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        let token = caps.get(0).unwrap().as_str();
        let name = caps.get(1).map(|m| m.as_str());
        let width = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());
        let conversion = caps.get(3).map(|m| m.as_str()).unwrap_or("d");

        let Some(name) = name else {
            if width.is_some() {
                // e.g. "$%05d$": a format tag with nothing to format
                tracing::warn!(token, "Format tag without identifier left unresolved");
                dst.push_str(token);
            } else {
                dst.push('$');
            }
            return;
        };

        if name == "RepresentationID" {
            if width.is_some() {
                tracing::warn!(token, "$RepresentationID$ does not take a format tag, ignoring");
            }
            match self.0.representation_id {
                Some(id) => dst.push_str(id),
                None => {
                    tracing::warn!(token, "No representation id to substitute");
                    dst.push_str(token);
                }
            }
            return;
        }

        let value = match name {
            "Number" => self.0.number,
            "SubNumber" => self.0.sub_number,
            "Bandwidth" => self.0.bandwidth,
            "Time" => self.0.time,
            _ => unreachable!(),
        };
        let Some(value) = value else {
            tracing::warn!(token, "Missing substitution value, token left unresolved");
            dst.push_str(token);
            return;
        };

        let width = width.unwrap_or(1);
        let formatted = match conversion {
            "d" | "i" | "u" => format!("{value:0width$}"),
            "o" => format!("{value:0width$o}"),
            "x" => format!("{value:0width$x}"),
            "X" => format!("{value:0width$X}"),
            _ => unreachable!(),
        };
        dst.push_str(&formatted);
    }
}
