/// Sender address and domain helpers
pub struct DomainUtils;

impl DomainUtils {
    /// Bare lowercase address from a sender header value
    /// (`"Registrar <REGISTRAR@univ.edu>"` → `registrar@univ.edu`).
    pub fn extract_address(sender: &str) -> String {
        let sender = sender.trim();
        let address = match (sender.rfind('<'), sender.rfind('>')) {
            (Some(start), Some(end)) if start < end => &sender[start + 1..end],
            _ => sender,
        };
        address.trim().trim_matches('"').to_lowercase()
    }

    /// Extract domain from email address
    pub fn extract_domain(email: &str) -> Option<String> {
        let address = Self::extract_address(email);
        address
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_string())
            .filter(|domain| !domain.is_empty())
    }

    /// Exact match or subdomain of `pattern`
    pub fn matches_domain(domain: &str, pattern: &str) -> bool {
        let domain_lower = domain.to_lowercase();
        let pattern_lower = pattern.trim_start_matches('@').to_lowercase();

        if pattern_lower.is_empty() {
            return false;
        }

        domain_lower == pattern_lower || domain_lower.ends_with(&format!(".{}", pattern_lower))
    }

    /// Canonicalize domain (remove www prefix)
    pub fn canonicalize_domain(domain: &str) -> String {
        let domain_lower = domain.to_lowercase();
        if let Some(stripped) = domain_lower.strip_prefix("www.") {
            stripped.to_string()
        } else {
            domain_lower
        }
    }
}
