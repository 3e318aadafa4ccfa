/// Domain-name syntax validation applied before any query is issued.
///
/// Limits per RFC 1035: 255 octets total, 63 per label. Underscore is
/// accepted (service labels such as `_dmarc`); an empty name means the root.
pub fn validate_domain_name(name: &str) -> Result<(), String> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        return Ok(()); // root
    }
    if name.len() > 253 {
        return Err(format!("Domain name too long: {} characters", name.len()));
    }

    for label in name.split('.') {
        if label.is_empty() {
            return Err("Domain name contains an empty label".to_string());
        }
        if label.len() > 63 {
            return Err(format!("Label too long: {label}"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'*')
        {
            return Err(format!("Label contains invalid characters: {label}"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("Label cannot start or end with a hyphen: {label}"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        validate_domain_name("example.com").unwrap();
        validate_domain_name("example.com.").unwrap();
        validate_domain_name("_dmarc.example.com").unwrap();
        validate_domain_name("*.example.com").unwrap();
        validate_domain_name("").unwrap();
        validate_domain_name(".").unwrap();
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_domain_name("exa mple.com").is_err());
        assert!(validate_domain_name("example..com").is_err());
        assert!(validate_domain_name("-leading.example.com").is_err());
        assert!(validate_domain_name(&format!("{}.com", "a".repeat(64))).is_err());
        assert!(validate_domain_name(&"a.".repeat(130)).is_err());
    }
}
