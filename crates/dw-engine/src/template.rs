// template.rs — Results-directory templates.
//
// A template names the per-snapshot subtree a results resource rotates
// into, e.g. `snapshots/{HOSTNAME}-{TAG}` or
// `snapshots/{DAY}/{ISO_TIMESTAMP}-{USERNAME}-{TAG}`. Templates must
// start with `snapshots/` so every rotation lands under the one subtree
// the content hash excludes. When no tag was given, `{TAG}` falls back to
// the zero-padded snapshot number.

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::Regex;

use crate::error::EngineError;

const VALID_VARS: &[&str] = &[
    "USERNAME",
    "USER",
    "HOSTNAME",
    "SNAPSHOT_NO",
    "ISO_TIMESTAMP",
    "DATE_TIME",
    "YEAR",
    "MONTH",
    "SHORT_MONTH",
    "DAY",
    "HOUR",
    "MIN",
    "SEC",
    "DAY_OF_WEEK",
    "TAG",
];

const SHORT_MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn var_pattern() -> Regex {
    Regex::new(r"\{([A-Z_]+)\}").expect("static regex compiles")
}

/// Refuse templates that escape `snapshots/` or use unknown variables.
pub fn validate_template(template: &str) -> Result<(), EngineError> {
    if !template.starts_with("snapshots/") {
        return Err(EngineError::user(format!(
            "results directory template '{}' must start with 'snapshots/'",
            template
        )));
    }
    for capture in var_pattern().captures_iter(template) {
        let var = capture.get(1).expect("group 1 exists").as_str();
        if !VALID_VARS.contains(&var) {
            return Err(EngineError::user(format!(
                "unknown variable '{{{}}}' in results directory template '{}'",
                var, template
            )));
        }
    }
    Ok(())
}

/// Values available to template expansion for one snapshot.
pub struct TemplateContext<'a> {
    pub username: &'a str,
    pub hostname: &'a str,
    pub timestamp: DateTime<Utc>,
    pub snapshot_no: u64,
    pub tag: Option<&'a str>,
}

pub fn expand_template(template: &str, ctx: &TemplateContext<'_>) -> String {
    let ts = ctx.timestamp;
    let tag = ctx
        .tag
        .map(|t| t.to_string())
        .unwrap_or_else(|| format!("{:03}", ctx.snapshot_no));
    var_pattern()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match caps.get(1).expect("group 1 exists").as_str() {
                "USERNAME" | "USER" => ctx.username.to_string(),
                "HOSTNAME" => ctx.hostname.to_string(),
                "SNAPSHOT_NO" => format!("{:03}", ctx.snapshot_no),
                // Truncate fractional seconds.
                "ISO_TIMESTAMP" | "DATE_TIME" => ts.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "YEAR" => format!("{:04}", ts.year()),
                "MONTH" => format!("{:02}", ts.month()),
                "SHORT_MONTH" => SHORT_MONTHS[ts.month0() as usize].to_string(),
                "DAY" => format!("{:02}", ts.day()),
                "HOUR" => format!("{:02}", ts.hour()),
                "MIN" => format!("{:02}", ts.minute()),
                "SEC" => format!("{:02}", ts.second()),
                "DAY_OF_WEEK" => ts.format("%A").to_string(),
                "TAG" => tag.clone(),
                other => format!("{{{}}}", other),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx(tag: Option<&'static str>) -> TemplateContext<'static> {
        TemplateContext {
            username: "ada",
            hostname: "lab7",
            timestamp: Utc.with_ymd_and_hms(2019, 3, 4, 15, 6, 7).unwrap(),
            snapshot_no: 12,
            tag,
        }
    }

    #[test]
    fn default_template_expands_host_and_tag() {
        let out = expand_template("snapshots/{HOSTNAME}-{TAG}", &ctx(Some("v1")));
        assert_eq!(out, "snapshots/lab7-v1");
    }

    #[test]
    fn tag_falls_back_to_snapshot_number() {
        let out = expand_template("snapshots/{HOSTNAME}-{TAG}", &ctx(None));
        assert_eq!(out, "snapshots/lab7-012");
    }

    #[test]
    fn timestamp_variables() {
        let out = expand_template(
            "snapshots/{DAY}/{ISO_TIMESTAMP}-{USERNAME}-{TAG}",
            &ctx(Some("t")),
        );
        assert_eq!(out, "snapshots/04/2019-03-04T15:06:07-ada-t");
        let dow = expand_template("snapshots/{DAY_OF_WEEK}-{SHORT_MONTH}", &ctx(None));
        assert_eq!(dow, "snapshots/Monday-Mar");
    }

    #[test]
    fn validation_rules() {
        validate_template("snapshots/{HOSTNAME}-{TAG}").unwrap();
        assert!(validate_template("archive/{TAG}").is_err());
        assert!(validate_template("snapshots/{BOGUS}").is_err());
    }
}
