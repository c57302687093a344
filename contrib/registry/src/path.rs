//! Pure path-model helpers: normalization, segment splitting, path
//! classification, `host:port` validation, and local interface enumeration.
//!
//! Everything here is a free function over owned `String`s/`&str`; nothing
//! touches the coordination store. That keeps the model trivially unit
//! testable and safe to call from any thread without synchronization.

use registry_errors::{RegistryError, Result};

/// The namespace layout is `/department/service[/instance-or-property[/property]]`.
/// `classify` recovers which of these five shapes a normalized path has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// `/department`
    Department,
    /// `/department/service`
    Service,
    /// `/department/service/host:port`
    Instance,
    /// `/department/service/property` (last segment is not `host:port`)
    ServiceProperty,
    /// `/department/service/host:port/property`
    InstanceProperty,
    /// Anything else: wrong segment count, or a 4-segment path whose third
    /// segment isn't a valid `host:port`.
    Undetected,
}

/// Trims whitespace, collapses runs of `/`, and strips a trailing `/`.
/// Embedded spaces inside a segment's body are preserved.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim();

    let mut result = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c == '/' && result.ends_with('/') {
            continue;
        }
        result.push(c);
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

/// Splits `s` on any character in `delims`, dropping empty tokens.
pub fn split(s: &str, delims: &str) -> Vec<String> {
    s.split(|c| delims.contains(c))
        .filter(|seg| !seg.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validates `host:port` as four decimal octets in `[0, 255]` plus a 16-bit
/// port strictly greater than zero. `0.0.0.0:<port>` is syntactically valid
/// here; only the registration boundary treats it specially.
pub fn validate_host_port(node: &str) -> bool {
    parse_host_port(node).is_some()
}

/// Parses `host:port` into `(host, port)`, applying the same validation as
/// [`validate_host_port`].
pub fn parse_host_port(node: &str) -> Option<(String, u16)> {
    let parts = split(node, ":.");
    if parts.len() != 5 {
        return None;
    }

    let mut octets = [0u8; 4];
    for (i, octet) in octets.iter_mut().enumerate() {
        *octet = parts[i].parse::<u16>().ok().filter(|v| *v <= 255)? as u8;
    }

    let port: u32 = parts[4].parse().ok()?;
    if port == 0 || port >= u16::MAX as u32 {
        return None;
    }

    let host = format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]);
    Some((host, port as u16))
}

/// Classifies a path by segment count, consulting [`validate_host_port`] on
/// the third segment when there are three or four segments.
pub fn classify(path: &str) -> PathKind {
    let normalized = normalize(path);
    if !normalized.starts_with('/') {
        return PathKind::Undetected;
    }

    let segments = split(&normalized, "/");
    match segments.len() {
        1 => PathKind::Department,
        2 => PathKind::Service,
        3 => {
            if validate_host_port(&segments[2]) {
                PathKind::Instance
            } else {
                PathKind::ServiceProperty
            }
        }
        4 => {
            if validate_host_port(&segments[2]) {
                PathKind::InstanceProperty
            } else {
                PathKind::Undetected
            }
        }
        _ => PathKind::Undetected,
    }
}

/// Builds `/department/service`.
pub fn service_path(department: &str, service: &str) -> String {
    format!("/{department}/{service}")
}

/// Builds `/department/service/node`.
pub fn instance_path(department: &str, service: &str, node: &str) -> String {
    format!("/{department}/{service}/{node}")
}

/// Appends a property segment to an already-built path.
pub fn extend_property(base: &str, property: &str) -> String {
    format!("{base}/{property}")
}

/// Enumerates local IPv4 addresses, skipping loopback (`127.*`) and
/// link-local (`169.254.*`) ranges, in the order the OS reports interfaces.
pub fn local_ipv4s() -> Result<Vec<String>> {
    let interfaces = if_addrs::get_if_addrs().map_err(RegistryError::Io)?;

    let mut ips = Vec::new();
    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        if let std::net::IpAddr::V4(v4) = iface.ip() {
            if v4.is_link_local() {
                continue;
            }
            ips.push(v4.to_string());
        }
    }

    Ok(ips)
}

/// The first non-loopback, non-link-local IPv4 address: the process
/// identity used for lock holder tags.
pub fn primary_ipv4() -> Result<String> {
    local_ipv4s()?
        .into_iter()
        .next()
        .ok_or_else(|| RegistryError::InvalidArgument("no non-loopback IPv4 address found".into()))
}
