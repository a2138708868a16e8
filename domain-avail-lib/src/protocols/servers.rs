//! TLD to WHOIS server mappings.
//!
//! The built-in table covers common TLDs. Anything else is discovered through
//! an IANA referral at query time (see [`super::whois`]).

use std::collections::HashMap;

/// IANA's WHOIS service, authoritative for the TLD referral lookup.
pub const IANA_WHOIS_SERVER: &str = "whois.iana.org";

/// Get the built-in WHOIS server mappings.
///
/// Each entry maps a TLD to its registry host and, where the registry needs
/// more than the bare name, a query template with a `{domain}` placeholder.
pub fn get_whois_server_map() -> HashMap<&'static str, (&'static str, Option<&'static str>)> {
    HashMap::from([
        // Verisign
        ("com", ("whois.verisign-grs.com", None)),
        ("net", ("whois.verisign-grs.com", None)),
        ("cc", ("ccwhois.verisign-grs.com", None)),
        ("tv", ("tvwhois.verisign-grs.com", None)),
        // Other gTLDs
        ("org", ("whois.pir.org", None)),
        ("info", ("whois.nic.info", None)),
        ("biz", ("whois.nic.biz", None)),
        ("xyz", ("whois.nic.xyz", None)),
        ("app", ("whois.nic.google", None)),
        ("dev", ("whois.nic.google", None)),
        // ccTLDs
        ("io", ("whois.nic.io", None)),
        ("ai", ("whois.nic.ai", None)),
        ("co", ("whois.nic.co", None)),
        ("me", ("whois.nic.me", None)),
        ("us", ("whois.nic.us", None)),
        ("uk", ("whois.nic.uk", None)),
        ("de", ("whois.denic.de", Some("-T dn,ace {domain}"))),
        ("fr", ("whois.nic.fr", None)),
        ("nl", ("whois.domain-registry.nl", None)),
        ("eu", ("whois.eu", None)),
        ("be", ("whois.dns.be", None)),
        ("ch", ("whois.nic.ch", None)),
        ("at", ("whois.nic.at", None)),
        ("se", ("whois.iis.se", None)),
        ("pl", ("whois.dns.pl", None)),
        ("ca", ("whois.cira.ca", None)),
        ("jp", ("whois.jprs.jp", Some("{domain}/e"))),
        ("in", ("whois.registry.in", None)),
    ])
}

/// A WHOIS host plus the way it wants to be asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoisServer {
    /// Hostname, queried on port 43
    pub host: String,
    /// Query line with a `{domain}` placeholder; `None` sends the bare name
    pub query_template: Option<String>,
}

impl WhoisServer {
    /// A server that takes the bare domain as query.
    pub fn plain<H: Into<String>>(host: H) -> Self {
        Self {
            host: host.into(),
            query_template: None,
        }
    }

    /// The query line to send for `domain`, without the trailing CRLF.
    pub fn query_for(&self, domain: &str) -> String {
        match &self.query_template {
            Some(template) => template.replace("{domain}", domain),
            None => domain.to_string(),
        }
    }
}

/// Lookup table of known WHOIS servers.
#[derive(Debug, Clone)]
pub struct WhoisServers {
    entries: HashMap<String, WhoisServer>,
}

impl WhoisServers {
    /// The built-in table.
    pub fn builtin() -> Self {
        let entries = get_whois_server_map()
            .into_iter()
            .map(|(tld, (host, template))| {
                (
                    tld.to_string(),
                    WhoisServer {
                        host: host.to_string(),
                        query_template: template.map(str::to_string),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// The built-in table with `overrides` (TLD -> host) applied on top.
    ///
    /// An override replaces the whole entry, so it is queried with the bare
    /// domain name.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut servers = Self::builtin();
        for (tld, host) in overrides {
            servers
                .entries
                .insert(tld.trim_start_matches('.').to_lowercase(), WhoisServer::plain(host.trim()));
        }
        servers
    }

    /// Server for a TLD, if known.
    pub fn lookup(&self, tld: &str) -> Option<&WhoisServer> {
        self.entries.get(&tld.to_lowercase())
    }

    /// Number of known TLDs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for WhoisServers {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_contains_common_tlds() {
        let servers = WhoisServers::builtin();
        assert_eq!(
            servers.lookup("com"),
            Some(&WhoisServer::plain("whois.verisign-grs.com"))
        );
        assert!(servers.lookup("org").is_some());
        assert!(servers.lookup("COM").is_some());
        assert!(servers.lookup("nonexistent").is_none());
    }

    #[test]
    fn test_query_templates() {
        let servers = WhoisServers::builtin();
        let denic = servers.lookup("de").unwrap();
        assert_eq!(denic.query_for("example.de"), "-T dn,ace example.de");

        let verisign = servers.lookup("com").unwrap();
        assert_eq!(verisign.query_for("example.com"), "example.com");
    }

    #[test]
    fn test_overrides_replace_entries() {
        let overrides = HashMap::from([
            ("de".to_string(), "whois.example.net".to_string()),
            (".test".to_string(), "whois.test.invalid".to_string()),
        ]);
        let servers = WhoisServers::with_overrides(&overrides);

        let de = servers.lookup("de").unwrap();
        assert_eq!(de.host, "whois.example.net");
        assert_eq!(de.query_for("example.de"), "example.de");
        assert_eq!(servers.lookup("test").unwrap().host, "whois.test.invalid");
        assert_eq!(servers.len(), WhoisServers::builtin().len() + 1);
    }

    #[test]
    fn test_all_hosts_look_like_hostnames() {
        for (tld, (host, _)) in get_whois_server_map() {
            assert!(host.contains('.'), "host for {} is not a hostname", tld);
            assert!(!host.contains(' '), "host for {} contains a space", tld);
        }
    }
}
