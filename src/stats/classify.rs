//! User-agent and referrer classification for categorical breakdowns.

use url::Url;
use woothee::parser::Parser;

/// Reserved bucket for absent or unparseable values.
pub const UNKNOWN: &str = "unknown";

fn normalize(value: &str) -> String {
    // Woothee reports unparseable fields as the "UNKNOWN" sentinel.
    if value.is_empty() || value == "UNKNOWN" {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

/// Browser family from a stored user-agent string.
pub fn browser_family(user_agent: Option<&str>) -> String {
    match user_agent.and_then(|ua| Parser::new().parse(ua)) {
        Some(parsed) => normalize(parsed.name),
        None => UNKNOWN.to_string(),
    }
}

/// Platform (operating system) family from a stored user-agent string.
pub fn platform_family(user_agent: Option<&str>) -> String {
    match user_agent.and_then(|ua| Parser::new().parse(ua)) {
        Some(parsed) => normalize(parsed.os),
        None => UNKNOWN.to_string(),
    }
}

/// Registrable domain of a referer URL, lowercased, `www.` stripped.
pub fn referrer_domain(referer: Option<&str>) -> String {
    let Some(referer) = referer.filter(|r| !r.is_empty()) else {
        return UNKNOWN.to_string();
    };

    match Url::parse(referer).ok().and_then(|u| {
        u.host_str()
            .map(|h| h.to_lowercase().trim_start_matches("www.").to_string())
    }) {
        Some(domain) if !domain.is_empty() => domain,
        _ => UNKNOWN.to_string(),
    }
}

/// Country bucket from the stored geo mark.
pub fn country_bucket(country_code: Option<&str>) -> String {
    country_code
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Region bucket from the stored geo mark.
pub fn region_bucket(region_code: Option<&str>) -> String {
    region_code
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN.to_string())
}
