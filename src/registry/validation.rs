//! Registration request validation.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::RegisterComponent;

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^c[012]_\w+$").expect("component name pattern"));

static SEMVER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("semver pattern"));

/// Check a registration request, returning the first violation found.
pub fn validate(request: &RegisterComponent) -> Result<(), String> {
    if !NAME.is_match(&request.name) {
        return Err(format!(
            "name '{}' must match c0_*, c1_* or c2_*",
            request.name
        ));
    }
    if !request
        .name
        .starts_with(request.component_type.name_prefix())
    {
        return Err(format!(
            "name '{}' does not agree with type {}",
            request.name, request.component_type
        ));
    }
    if !SEMVER.is_match(&request.version) {
        return Err(format!("version '{}' is not MAJOR.MINOR.PATCH", request.version));
    }
    if !SEMVER.is_match(&request.api_version) {
        return Err(format!(
            "api_version '{}' is not MAJOR.MINOR.PATCH",
            request.api_version
        ));
    }

    let mut seen = HashSet::new();
    for channel in &request.channels {
        if channel.name.trim().is_empty() {
            return Err("channel name must not be empty".to_string());
        }
        if !seen.insert(channel.name.as_str()) {
            return Err(format!("channel '{}' declared twice", channel.name));
        }
        if channel.is_publisher() && channel.is_subscriber() {
            return Err(format!(
                "channel '{}' cannot both publish and subscribe",
                channel.name
            ));
        }
    }
    Ok(())
}
