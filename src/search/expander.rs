//! Query expansion (spec.md §4.5): static domain-synonym lookup plus
//! subject-context injection, both frozen constants reproduced verbatim from
//! the reference implementation (SPEC_FULL.md F.6).

use once_cell::sync::Lazy;
use std::collections::BTreeSet;

/// `(key, synonyms)` pairs. A key matches when it occurs as a substring of
/// the lowercased query; all of its synonyms are then candidates.
static EXPANSIONS: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        ("sql injection", vec!["sqli", "sql injection", "database injection"]),
        ("sqli", vec!["sql injection", "sqli", "database injection"]),
        ("xss", vec!["cross-site scripting", "xss", "script injection"]),
        ("cross-site scripting", vec!["xss", "cross-site scripting"]),
        ("csrf", vec!["cross-site request forgery", "csrf", "session riding"]),
        ("idor", vec!["insecure direct object reference", "idor", "broken access control"]),
        ("ssrf", vec!["server-side request forgery", "ssrf"]),
        ("rce", vec!["remote code execution", "rce", "command injection"]),
        ("lfi", vec!["local file inclusion", "lfi", "path traversal"]),
        ("rfi", vec!["remote file inclusion", "rfi"]),
        ("dos", vec!["denial of service", "dos", "ddos"]),
        ("mitm", vec!["man in the middle", "mitm", "arp spoofing"]),
        ("dns", vec!["domain name system", "dns", "name resolution"]),
        ("tcp", vec!["transmission control protocol", "tcp", "tcp/ip"]),
        ("udp", vec!["user datagram protocol", "udp"]),
        ("http", vec!["hypertext transfer protocol", "http", "web protocol"]),
        ("https", vec!["http secure", "https", "tls", "ssl"]),
        ("api", vec!["application programming interface", "api", "rest api", "endpoint"]),
        ("rest", vec!["representational state transfer", "rest", "restful"]),
        ("osi", vec!["open systems interconnection", "osi model", "osi layers"]),
        ("vpn", vec!["virtual private network", "vpn", "tunnel"]),
        ("ssh", vec!["secure shell", "ssh", "remote access"]),
        ("gdpr", vec!["general data protection regulation", "gdpr", "data protection"]),
        ("ctf", vec!["capture the flag", "ctf", "security challenge"]),
        ("owasp", vec!["open web application security project", "owasp", "owasp top 10"]),
        ("cidr", vec!["classless inter-domain routing", "cidr", "subnet"]),
        ("nat", vec!["network address translation", "nat", "port forwarding"]),
        ("dhcp", vec!["dynamic host configuration protocol", "dhcp", "ip assignment"]),
        ("arp", vec!["address resolution protocol", "arp", "mac address resolution"]),
        ("vlan", vec!["virtual local area network", "vlan", "network segmentation"]),
        ("firewall", vec!["firewall", "packet filter", "network security"]),
        ("regex", vec!["regular expression", "regex", "regexp", "pattern matching"]),
        ("orm", vec!["object relational mapping", "orm", "database abstraction"]),
        ("jwt", vec!["json web token", "jwt", "authentication token"]),
        ("cors", vec!["cross-origin resource sharing", "cors"]),
    ]
});

/// `subject_id → context terms`, in priority order (only the literal first
/// 3 terms of the list are examined; those already present in the query are
/// skipped rather than replaced by a 4th candidate).
static SUBJECT_CONTEXT: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        ("networks", vec!["network", "protocol", "layer", "packet", "routing", "switching"]),
        ("pentesting", vec!["vulnerability", "exploit", "attack", "security", "payload"]),
        ("backend", vec!["server", "api", "database", "endpoint", "middleware", "framework"]),
        ("linux", vec!["command", "terminal", "shell", "filesystem", "process", "permission"]),
        ("ctf", vec!["flag", "challenge", "crypto", "forensics", "reverse engineering"]),
        ("scripting", vec!["script", "automation", "function", "variable", "loop", "module"]),
        ("privacy", vec!["data protection", "regulation", "consent", "processing", "controller"]),
    ]
});

/// Expand `query` with CS-domain synonyms and, when `subject_id` names a
/// known subject, context terms for that subject.
///
/// Returns `query` unchanged when nothing new is added — callers compare the
/// result to the original by string inequality to derive `query_expanded`
/// (SPEC_FULL.md F.4), so an unchanged return must be byte-identical.
pub fn expand(query: &str, subject_id: Option<&str>) -> String {
    let lower_query = query.to_lowercase();
    let lower_query = lower_query.trim();

    let mut expansion_terms: BTreeSet<&'static str> = BTreeSet::new();

    for (key, synonyms) in EXPANSIONS.iter() {
        if lower_query.contains(key) {
            for s in synonyms {
                expansion_terms.insert(s);
            }
        }
    }

    if let Some(subject) = subject_id {
        if let Some((_, terms)) = SUBJECT_CONTEXT.iter().find(|(id, _)| *id == subject) {
            for term in terms.iter().take(3) {
                if !lower_query.contains(term) {
                    expansion_terms.insert(term);
                }
            }
        }
    }

    let query_words: BTreeSet<&str> = lower_query.split_whitespace().collect();
    let extra: Vec<&str> = expansion_terms
        .into_iter()
        .filter(|t| !query_words.contains(t))
        .collect();

    if extra.is_empty() {
        return query.to_string();
    }

    format!("{} {}", query, extra.join(" "))
}

/// Token set used to check the expansion monotonicity property (spec.md §8):
/// `tokens(expand(q)) ⊇ tokens(q)`.
pub fn tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase().split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unrelated_query_is_returned_unchanged() {
        assert_eq!(expand("a quiet afternoon", None), "a quiet afternoon");
    }

    #[test]
    fn expands_known_abbreviation() {
        let expanded = expand("what is sqli", None);
        assert!(expanded.contains("sql injection"));
        assert_ne!(expanded, "what is sqli");
    }

    #[test]
    fn subject_context_adds_up_to_three_terms() {
        let expanded = expand("packets", Some("networks"));
        assert!(expanded.contains("protocol"));
    }

    #[test]
    fn unknown_subject_is_ignored() {
        let expanded = expand("hello world", Some("astrophysics"));
        assert_eq!(expanded, "hello world");
    }

    #[test]
    fn expansion_is_monotone() {
        for q in ["sql injection basics", "what about xss", "plain query"] {
            let expanded = expand(q, Some("pentesting"));
            let before = tokens(q);
            let after = tokens(&expanded);
            assert!(before.is_subset(&after));
        }
    }

    const SUBJECTS: &[&str] = &[
        "networks", "pentesting", "backend", "linux", "ctf", "scripting", "privacy",
    ];

    proptest! {
        /// `tokens(expand(q)) ⊇ tokens(q)` for arbitrary queries and subjects,
        /// with or without a subject given (spec.md §4.5, §8).
        #[test]
        fn expansion_is_monotone_for_arbitrary_queries(
            query in "[a-zA-Z0-9 ]{0,40}",
            subject_idx in prop::option::of(0usize..SUBJECTS.len()),
        ) {
            let subject = subject_idx.map(|i| SUBJECTS[i]);
            let expanded = expand(&query, subject);
            let before = tokens(&query);
            let after = tokens(&expanded);
            prop_assert!(before.is_subset(&after));
        }
    }
}
