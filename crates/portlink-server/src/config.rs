//! Proxy port specification parsing

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid proxy port '{0}'")]
    InvalidPort(String),

    #[error("Invalid proxy port span '{0}': expected start-end with start <= end")]
    InvalidSpan(String),
}

/// Parse the `--proxy-ports` value
///
/// Accepts a contiguous span ("9000-9010", inclusive), a comma list
/// ("9000,9005,9010"), or a single port.
pub fn parse_proxy_ports(spec: &str) -> Result<Vec<u16>, ConfigError> {
    let spec = spec.trim();

    if let Some((start, end)) = spec.split_once('-') {
        let start: u16 = start
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort(start.trim().to_string()))?;
        let end: u16 = end
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort(end.trim().to_string()))?;
        if start == 0 || start > end {
            return Err(ConfigError::InvalidSpan(spec.to_string()));
        }
        return Ok((start..=end).collect());
    }

    spec.split(',')
        .map(|part| {
            let part = part.trim();
            match part.parse::<u16>() {
                Ok(0) | Err(_) => Err(ConfigError::InvalidPort(part.to_string())),
                Ok(port) => Ok(port),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_span() {
        let ports = parse_proxy_ports("9000-9010").unwrap();
        assert_eq!(ports.len(), 11);
        assert_eq!(ports[0], 9000);
        assert_eq!(ports[10], 9010);
    }

    #[test]
    fn parses_a_comma_list() {
        assert_eq!(
            parse_proxy_ports("9000, 9005,9010").unwrap(),
            vec![9000, 9005, 9010]
        );
    }

    #[test]
    fn parses_a_single_port() {
        assert_eq!(parse_proxy_ports("9000").unwrap(), vec![9000]);
    }

    #[test]
    fn rejects_reversed_span() {
        assert!(parse_proxy_ports("9010-9000").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_proxy_ports("").is_err());
        assert!(parse_proxy_ports("nine thousand").is_err());
        assert!(parse_proxy_ports("9000-").is_err());
        assert!(parse_proxy_ports("0").is_err());
        assert!(parse_proxy_ports("70000").is_err());
    }
}
