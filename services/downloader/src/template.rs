//! Path and URL templates.
//!
//! Templates are strftime patterns over the run date (00 UTC) with the
//! extra placeholders `<type>`, `<param>` and `<version>`.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDate;

use crate::error::{DownloaderError, Result};

/// Values substituted for the angle-bracket placeholders.
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
    pub param: &'a str,
    pub member_type: &'a str,
    pub version: u8,
}

/// Check that a template only uses strftime fields chrono understands.
pub fn check(template: &str) -> Result<()> {
    if StrftimeItems::new(template).any(|item| matches!(item, Item::Error)) {
        return Err(DownloaderError::Config(format!(
            "Invalid date pattern in template {:?}",
            template
        )));
    }
    // fields such as %Z parse fine but cannot be rendered for a naive date
    render_date(template, NaiveDate::MIN).map(|_| ())
}

/// Render the strftime part of a template for `date` at 00 UTC.
pub fn render_date(template: &str, date: NaiveDate) -> Result<String> {
    let at = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| DownloaderError::Config(format!("No 00 UTC for {}", date)))?;
    let mut out = String::with_capacity(template.len() + 16);
    write!(out, "{}", at.format(template)).map_err(|_| {
        DownloaderError::Config(format!("Template {:?} cannot be rendered", template))
    })?;
    Ok(out)
}

/// Render a template: date fields first, then placeholders.
pub fn render(template: &str, date: NaiveDate, values: Placeholders<'_>) -> Result<String> {
    Ok(render_date(template, date)?
        .replace("<type>", values.member_type)
        .replace("<param>", values.param)
        .replace("<version>", &values.version.to_string()))
}

/// Join a base URL and a relative path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
