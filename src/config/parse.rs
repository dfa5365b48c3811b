use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv4Addr;
use std::time::Duration;

use super::{ChannelConfig, Codec, Ed137Version, Transport};

static RE_BOOL: Lazy<Regex> = Lazy::new(|| Regex::new(r"true|false").expect("Invalid regex"));
static RE_SWITCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"yes|no|enable|disable|true|false").expect("Invalid regex"));
static RE_IP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").expect("Invalid regex"));
static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("Invalid regex"));
static RE_TRANSPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"tcp|udp").expect("Invalid regex"));
static RE_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"ED137[A-C]").expect("Invalid regex"));
static RE_CODEC: Lazy<Regex> = Lazy::new(|| Regex::new(r"g[0-9a-z]+").expect("Invalid regex"));

/// Strip `//` line comments and `/* */` block comments, keeping line breaks.
pub fn remove_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_block = false;
    while let Some(c) = chars.next() {
        if in_block {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block = false;
            } else if c == '\n' {
                out.push('\n');
            }
            continue;
        }
        match (c, chars.peek()) {
            ('/', Some('*')) => {
                chars.next();
                in_block = true;
            }
            ('/', Some('/')) => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn first_match(re: &Regex, line: &str, default: &str) -> String {
    re.find(line)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| default.to_string())
}

fn valid_ip(candidate: &str) -> bool {
    candidate.parse::<Ipv4Addr>().is_ok()
}

/// Parse `rec.cfg`. Each setting appears once per channel; the n-th
/// occurrence of every setting belongs to channel n. Returns the enabled
/// channels and the codec.
pub fn parse_rec_config(text: &str) -> (Vec<ChannelConfig>, Codec) {
    let mut enables: Vec<bool> = Vec::new();
    let mut ips = Vec::new();
    let mut ports = Vec::new();
    let mut transports = Vec::new();
    let mut interleaves = Vec::new();
    let mut keep_alives = Vec::new();
    let mut versions = Vec::new();
    let mut groups = Vec::new();
    let mut codec = "g711alaw".to_string();

    for line in remove_comments(text).lines() {
        if line.contains("Enable") {
            enables.push(first_match(&RE_BOOL, line, "true") == "true");
        } else if line.contains("rec_ip") {
            ips.push(first_match(&RE_IP, line, "127.0.0.1"));
        } else if line.contains("rec_port") {
            ports.push(first_match(&RE_NUMBER, line, "8554"));
        } else if line.contains("media_transport") {
            transports.push(first_match(&RE_TRANSPORT, line, "udp"));
        } else if line.contains("interleaved") {
            interleaves.push(first_match(&RE_SWITCH, line, "enable"));
        } else if line.contains("keep_alive_interval") {
            keep_alives.push(first_match(&RE_NUMBER, line, "20"));
        } else if line.contains("ed137_version") {
            versions.push(first_match(&RE_VERSION, line, "ED137B"));
        } else if line.contains("codec") {
            codec = first_match(&RE_CODEC, line, "g711alaw");
        } else if line.contains("rec_group") {
            groups.push(first_match(&RE_BOOL, line, "false") == "true");
        }
    }

    let count = if enables.is_empty() {
        ips.len()
    } else {
        enables.len()
    };

    let channels = (0..count)
        .filter(|&i| enables.get(i).copied().unwrap_or(true))
        .map(|i| {
            let ip = ips.get(i).map(String::as_str).unwrap_or("127.0.0.1");
            let port = ports.get(i).map(String::as_str).unwrap_or("8554");
            ChannelConfig {
                address: format!("{}:{}", ip, port),
                transport: transports
                    .get(i)
                    .map(|t| Transport::parse(t))
                    .unwrap_or(Transport::Udp),
                keep_alive: Duration::from_secs(
                    keep_alives.get(i).and_then(|k| k.parse().ok()).unwrap_or(20),
                ),
                version: versions
                    .get(i)
                    .and_then(|v| Ed137Version::parse(v))
                    .unwrap_or_default(),
                interleaved: interleaves
                    .get(i)
                    .map(|v| matches!(v.as_str(), "yes" | "enable" | "true"))
                    .unwrap_or(true),
                group: groups.get(i).copied().unwrap_or(false),
            }
        })
        .collect();

    (channels, Codec::parse(&codec))
}

/// Parse the `tmcs_server` section of `device_system.cfg`. Every address
/// found there is a plain UDP, ED137B, non-group recorder.
pub fn parse_device_system(text: &str) -> Vec<ChannelConfig> {
    let mut ips: Vec<Option<String>> = Vec::new();
    let mut ports: Vec<Option<u16>> = Vec::new();
    let mut in_section = false;

    for line in remove_comments(text).lines() {
        if line.is_empty() {
            continue;
        }
        if line.contains("tmcs_server") {
            in_section = true;
            continue;
        }
        if line.contains(')') {
            if in_section {
                break;
            }
            continue;
        }
        if !in_section {
            continue;
        }
        if line.contains("ip_address") {
            ips.push(
                RE_IP
                    .find(line)
                    .map(|m| m.as_str())
                    .filter(|ip| valid_ip(ip))
                    .map(str::to_string),
            );
        }
        if line.contains("port") {
            ports.push(
                RE_NUMBER
                    .find(line)
                    .and_then(|m| m.as_str().parse::<u16>().ok())
                    .filter(|p| *p > 0),
            );
        }
    }

    if ips.len() != ports.len() {
        return Vec::new();
    }

    ips.into_iter()
        .zip(ports)
        .filter_map(|(ip, port)| {
            let (ip, port) = (ip?, port?);
            Some(ChannelConfig {
                address: format!("{}:{}", ip, port),
                transport: Transport::Udp,
                keep_alive: Duration::from_secs(10),
                version: Ed137Version::B,
                interleaved: false,
                group: false,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REC_CFG: &str = r#"
/* recorder 1 */
Enable = true
rec_ip = 192.168.10.5
rec_port = 8554
media_transport = tcp // reliable link
interleaved = disable
keep_alive_interval = 15
ed137_version = ED137C
rec_group = false

/* recorder 2 (disabled) */
Enable = false
rec_ip = 192.168.10.6
rec_port = 8555
media_transport = udp
interleaved = enable
keep_alive_interval = 20
ed137_version = ED137B
rec_group = false

/* recorder 3 */
Enable = true
rec_ip = 192.168.10.7
rec_port = 8556
media_transport = udp
interleaved = yes
keep_alive_interval = 20
ed137_version = ED137B
rec_group = true

codec = g711ulaw
"#;

    #[test]
    fn test_remove_comments() {
        let text = "a = 1 // one\n/* block\nspans */b = 2\n";
        assert_eq!(remove_comments(text), "a = 1 \n\nb = 2\n");
    }

    #[test]
    fn test_parse_rec_config() {
        let (channels, codec) = parse_rec_config(REC_CFG);
        assert_eq!(codec, Codec::Ulaw);
        assert_eq!(channels.len(), 2);

        let first = &channels[0];
        assert_eq!(first.address, "192.168.10.5:8554");
        assert_eq!(first.transport, Transport::Tcp);
        assert!(!first.interleaved);
        assert_eq!(first.keep_alive, Duration::from_secs(15));
        assert_eq!(first.version, Ed137Version::C);
        assert!(!first.group);

        let second = &channels[1];
        assert_eq!(second.address, "192.168.10.7:8556");
        assert!(second.interleaved);
        assert!(second.group);
    }

    #[test]
    fn test_parse_rec_config_defaults() {
        let (channels, codec) = parse_rec_config("rec_ip = \nrec_port =\n");
        assert_eq!(codec, Codec::Alaw);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].address, "127.0.0.1:8554");
        assert_eq!(channels[0].version, Ed137Version::B);
        assert!(channels[0].interleaved);
    }

    #[test]
    fn test_parse_device_system() {
        let text = r#"
general (
    ip_address = 10.0.0.1
    port = 1
)
tmcs_server (
    ip_address = 10.0.0.9
    port = 5004
    ip_address = 999.0.0.1
    port = 5005
)
"#;
        let channels = parse_device_system(text);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].address, "10.0.0.9:5004");
        assert_eq!(channels[0].keep_alive, Duration::from_secs(10));
        assert!(!channels[0].interleaved);
    }

    #[test]
    fn test_parse_device_system_mismatched_counts() {
        let text = "tmcs_server (\n ip_address = 10.0.0.9\n)\n";
        assert!(parse_device_system(text).is_empty());
    }
}
