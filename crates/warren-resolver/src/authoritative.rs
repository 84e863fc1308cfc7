//! The authoritative responder: given a parsed request and the zone
//! store, build the response message.  No I/O happens here; the
//! server binary owns sockets and decoding, and anything it cannot
//! even parse never reaches this module.
//!
//! See section 4.3.2 of RFC 1034.

use warren_types::protocol::types::*;
use warren_types::zones::types::ZoneStore;

/// Answer a request from authoritative data alone.
///
/// The response copies the request's transaction id and opcode,
/// echoes its questions and RD flag, and answers each question
/// independently:
///
/// - records matching the question go to the answer section;
///
/// - otherwise, NS records at a delegation point below the covering
///   zone's origin go to the authority section (a referral, which
///   also clears the AA flag);
///
/// - otherwise, a name with records of other types yields an empty
///   NOERROR answer, and a name with nothing at all yields NXDOMAIN.
///
/// Recursion is never offered in this role: RA is always 0.
pub fn respond(request: &Message, zones: &ZoneStore) -> Message {
    let mut response = request.make_response();
    response.header.is_authoritative = true;

    let single_question = request.questions.len() == 1;
    for question in &request.questions {
        answer_question(question, zones, single_question, &mut response);
    }

    response
}

fn answer_question(
    question: &Question,
    zones: &ZoneStore,
    single_question: bool,
    response: &mut Message,
) {
    let rrs = match question.qtype {
        QueryType::ANY => zones.lookup_all(&question.name, question.qclass),
        _ => zones.lookup(&question.name, question.qtype, question.qclass),
    };

    if !rrs.is_empty() {
        response.answers.extend(rrs);
        return;
    }

    if let Some(zone) = zones.find(&question.name) {
        if let Some(ns_rrs) = zone.referral_for(&question.name) {
            // pointing at the delegated nameservers is not an
            // authoritative answer
            response.header.is_authoritative = false;
            response.authority.extend(ns_rrs);
            return;
        }

        if zone.has_name(&question.name) {
            // the name exists, just not with this type
            return;
        }
    }

    // the rcode is shared between questions, so only report a missing
    // name when it is unambiguous which name is missing
    if single_question {
        response.header.rcode = Rcode::NameError;
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use warren_types::protocol::types::test_util::*;
    use warren_types::zones::types::Zone;

    use super::*;

    fn zones() -> ZoneStore {
        let mut store = ZoneStore::new();
        let mut zone = Zone::builder(domain("test.com."))
            .soa(
                "ns1.test.com.",
                "admin.test.com.",
                2023120101,
                3600,
                1800,
                604800,
                3600,
            )
            .a(domain("www.test.com."), Ipv4Addr::new(192, 168, 1, 2))
            .mx(domain("test.com."), 10, domain("mail.test.com."))
            .build()
            .unwrap();
        zone.insert(ns_record("delegated.test.com.", "ns.delegated.test.com."));
        store.add_zone(zone);
        store
    }

    fn request(name: &str, qtype: QueryType) -> Message {
        let mut request = Message::from_question(
            4242,
            Question {
                name: domain(name),
                qtype,
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        request.header.recursion_desired = true;
        request
    }

    const A: QueryType = QueryType::Record(RecordType::A);

    #[test]
    fn response_flags() {
        let request = request("www.test.com.", A);
        let response = respond(&request, &zones());

        assert_eq!(request.header.id, response.header.id);
        assert_eq!(request.header.opcode, response.header.opcode);
        assert!(response.header.is_response);
        assert!(response.header.is_authoritative);
        assert!(!response.header.is_truncated);
        assert!(response.header.recursion_desired);
        assert!(!response.header.recursion_available);
        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(request.questions, response.questions);
    }

    #[test]
    fn answers_from_the_zone() {
        let response = respond(&request("www.test.com.", A), &zones());

        assert_eq!(
            vec![a_record("www.test.com.", Ipv4Addr::new(192, 168, 1, 2))],
            response.answers
        );
        assert!(response.authority.is_empty());
    }

    #[test]
    fn no_data_is_an_empty_noerror() {
        let response = respond(
            &request("www.test.com.", QueryType::Record(RecordType::PTR)),
            &zones(),
        );

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert!(response.answers.is_empty());
        assert!(response.header.is_authoritative);
    }

    #[test]
    fn missing_name_is_nxdomain() {
        let response = respond(&request("nope.test.com.", A), &zones());

        assert_eq!(Rcode::NameError, response.header.rcode);
        assert!(response.answers.is_empty());
    }

    #[test]
    fn uncovered_name_is_nxdomain() {
        let response = respond(&request("www.example.net.", A), &zones());

        assert_eq!(Rcode::NameError, response.header.rcode);
    }

    #[test]
    fn delegation_is_a_referral() {
        let response = respond(&request("www.delegated.test.com.", A), &zones());

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert!(response.answers.is_empty());
        assert!(!response.header.is_authoritative);
        assert_eq!(
            vec![ns_record("delegated.test.com.", "ns.delegated.test.com.")],
            response.authority
        );
    }

    #[test]
    fn any_query_returns_all_records_at_the_name() {
        let response = respond(&request("test.com.", QueryType::ANY), &zones());

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(2, response.answers.len()); // SOA and MX

        let mut rtypes: Vec<RecordType> = response
            .answers
            .iter()
            .map(|rr| rr.rtype_with_data.rtype())
            .collect();
        rtypes.sort();
        assert_eq!(vec![RecordType::SOA, RecordType::MX], rtypes);
    }

    #[test]
    fn multiple_questions_are_answered_independently() {
        let mut request = request("www.test.com.", A);
        request.questions.push(Question {
            name: domain("test.com."),
            qtype: QueryType::Record(RecordType::MX),
            qclass: QueryClass::Record(RecordClass::IN),
        });
        // a missing name does not flip the shared rcode when other
        // questions were answered
        request.questions.push(Question {
            name: domain("nope.test.com."),
            qtype: A,
            qclass: QueryClass::Record(RecordClass::IN),
        });

        let response = respond(&request, &zones());

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(2, response.answers.len());
    }

    #[test]
    fn mismatched_class_is_not_answered() {
        let mut request = request("www.test.com.", A);
        request.questions[0].qclass = QueryClass::Record(RecordClass::from(3));

        let response = respond(&request, &zones());

        assert!(response.answers.is_empty());
    }
}
