//! The `Message` entity from spec §3: an opaque DNS datagram with a mutable
//! transaction id, header flags (RD, CD, TC), a question section, and a
//! `security_level` attached after validation.
//!
//! On-wire encode/decode is out of scope for this crate (spec §1); we
//! delegate that to [`dns_types`], the same way `l4-udp-dns-client` and
//! `dns-over-tcp` do, and only add the header bookkeeping the orchestrator
//! itself needs to reason about (RD/CD) on top of it.

use dns_types::{DomainName, RecordType, ResponseCode};
use rand::Rng;

/// Validator verdict, attached to a [`Message`] once the DNSSEC hand-off
/// completes (spec glossary, `SecurityLevel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    #[default]
    Unchecked,
    Insecure,
    Secure,
    Bogus,
    Indeterminate,
}

/// A DNS question/response pair carried through the orchestrator.
///
/// Immutable between send and return, except that a fresh transaction id is
/// assigned per sub-query (spec §3).
#[derive(Debug, Clone)]
pub struct Message {
    request: dns_types::Query,
    response: Option<dns_types::Response>,
    security_level: SecurityLevel,
}

impl Message {
    /// Builds a new query message. `recurse` sets RD; `checking_disabled`
    /// sets CD (spec §4.6: DNSSEC-enabled resolvers default this to `true`
    /// so the client performs its own validation).
    pub fn query(domain: DomainName, rtype: RecordType, recurse: bool, checking_disabled: bool) -> Self {
        let request = dns_types::Query::new(domain, rtype)
            .with_recursion_desired(recurse)
            .with_checking_disabled(checking_disabled);

        Self {
            request,
            response: None,
            security_level: SecurityLevel::Unchecked,
        }
    }

    /// Returns a copy of this message with a fresh, randomly chosen 16-bit
    /// transaction id. Called once per sub-query dispatch (spec §4.3).
    pub fn with_fresh_id(&self, rng: &mut impl Rng) -> Self {
        let id: u16 = rng.r#gen();

        Self {
            request: self.request.clone().with_id(id),
            response: None,
            security_level: SecurityLevel::Unchecked,
        }
    }

    pub fn id(&self) -> u16 {
        self.response.as_ref().map_or_else(|| self.request.id(), |r| r.id())
    }

    pub fn domain(&self) -> DomainName {
        self.request.domain()
    }

    pub fn qtype(&self) -> RecordType {
        self.request.qtype()
    }

    pub fn recursion_desired(&self) -> bool {
        self.request.recursion_desired()
    }

    pub fn checking_disabled(&self) -> bool {
        self.request.checking_disabled()
    }

    pub fn request(&self) -> &dns_types::Query {
        &self.request
    }

    pub fn response(&self) -> Option<&dns_types::Response> {
        self.response.as_ref()
    }

    pub fn response_code(&self) -> Option<ResponseCode> {
        self.response.as_ref().map(dns_types::Response::response_code)
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    /// Attaches the response from a transport. Used by the orchestrator
    /// when it classifies a `RECEIVED` event (spec §4.4).
    pub fn with_response(mut self, response: dns_types::Response) -> Self {
        self.response = Some(response);
        self
    }

    /// Attaches the validator's verdict. Used when classifying a
    /// `VALIDATED` event (spec §4.4).
    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn example_domain() -> DomainName {
        DomainName::vec_from_str("example.com").unwrap()
    }

    #[test]
    fn query_defaults_match_spec() {
        let msg = Message::query(example_domain(), RecordType::A, true, true);

        assert!(msg.recursion_desired());
        assert!(msg.checking_disabled());
        assert_eq!(msg.security_level(), SecurityLevel::Unchecked);
    }

    #[test]
    fn fresh_id_changes_transaction_id_but_not_question() {
        let msg = Message::query(example_domain(), RecordType::AAAA, true, false);
        let mut rng = StdRng::seed_from_u64(7);

        let attempt1 = msg.with_fresh_id(&mut rng);
        let attempt2 = msg.with_fresh_id(&mut rng);

        assert_ne!(attempt1.id(), attempt2.id());
        assert_eq!(attempt1.domain(), attempt2.domain());
        assert_eq!(attempt1.qtype(), attempt2.qtype());
    }
}
