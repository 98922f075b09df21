use anyhow::Result;

pub(crate) const PRODUCTION: &str = "PRODUCTION";

/// Maps an integer log level onto a filter for the platform's crates.
///
/// Levels at or below -4 are debug, below 4 info, below 8 warn, and anything
/// higher only logs errors. Other crates log warnings.
pub(crate) fn filter(level: i32) -> Result<kubert::LogFilter> {
    let level = match level {
        l if l <= -4 => "debug",
        l if l < 4 => "info",
        l if l < 8 => "warn",
        _ => "error",
    };
    Ok(format!("loco={level},warn").parse()?)
}

/// JSON logs in production, plain text everywhere else.
pub(crate) fn format(explicit: Option<kubert::LogFormat>, app_env: &str) -> kubert::LogFormat {
    explicit.unwrap_or_else(|| {
        if app_env.eq_ignore_ascii_case(PRODUCTION) {
            kubert::LogFormat::Json
        } else {
            kubert::LogFormat::Plain
        }
    })
}
