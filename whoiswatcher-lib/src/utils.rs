//! Domain name input handling.

use crate::error::WatchError;

/// Clean one line of input: trim, lower-case and drop a trailing root dot.
/// Returns `None` for blank lines and `#` comments.
pub fn normalize_domain_input(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    Some(trimmed.trim_end_matches('.').to_lowercase())
}

/// Validate a domain name before it is sent to a lookup adapter.
pub fn validate_domain(domain: &str) -> Result<(), WatchError> {
    if domain.is_empty() {
        return Err(WatchError::invalid_domain(
            domain,
            "Domain name cannot be empty",
        ));
    }

    if !domain.contains('.') {
        return Err(WatchError::invalid_domain(
            domain,
            "Domain name must include a TLD",
        ));
    }

    if !is_valid_fqdn(domain) {
        return Err(WatchError::invalid_domain(
            domain,
            "Labels must be 1-63 alphanumeric or hyphen characters",
        ));
    }

    Ok(())
}

/// Validate that an FQDN has basic valid structure.
fn is_valid_fqdn(domain: &str) -> bool {
    if domain.len() < 4 || domain.len() > 253 {
        return false;
    }

    let parts: Vec<&str> = domain.split('.').collect();
    if parts.len() < 2 {
        return false;
    }

    parts.iter().all(|part| {
        !part.is_empty()
            && part.len() <= 63
            && !part.starts_with('-')
            && !part.ends_with('-')
            && part.chars().all(|c| c.is_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain_input() {
        assert_eq!(
            normalize_domain_input("  Example.COM \r"),
            Some("example.com".to_string())
        );
        assert_eq!(
            normalize_domain_input("example.com."),
            Some("example.com".to_string())
        );
        assert_eq!(normalize_domain_input("   "), None);
        assert_eq!(normalize_domain_input("# comment"), None);
    }

    #[test]
    fn test_validate_domain() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("xn--bcher-kva.example").is_ok());
        assert!(validate_domain("").is_err());
        assert!(validate_domain("localhost").is_err());
        assert!(validate_domain("bad_domain.com").is_err());
    }

    #[test]
    fn test_is_valid_fqdn() {
        assert!(is_valid_fqdn("example.com"));
        assert!(is_valid_fqdn("test.co.uk"));
        assert!(is_valid_fqdn("sub.example.com"));

        assert!(!is_valid_fqdn("example"));
        assert!(!is_valid_fqdn(".com"));
        assert!(!is_valid_fqdn("example."));
        assert!(!is_valid_fqdn("-example.com"));
        assert!(!is_valid_fqdn("example.com-"));
        assert!(!is_valid_fqdn("a..com"));
    }
}
