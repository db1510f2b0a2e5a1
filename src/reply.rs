//! Helpers for shaping response messages.

use hickory_proto::op::{Edns, Message, MessageType, ResponseCode};

/// EDNS payload size advertised in responses.
pub const EDNS_PAYLOAD: u16 = 4096;

/// Start a response to `request`: same ID, opcode, RD flag and question.
pub fn reply_to(request: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(request.op_code());
    response.set_recursion_desired(request.recursion_desired());
    response.add_queries(request.queries().to_vec());
    response
}

/// A response carrying only a response code.
pub fn error_reply(request: &Message, code: ResponseCode) -> Message {
    let mut response = reply_to(request);
    response.set_response_code(code);
    response
}

/// Answer an EDNS request with a bare OPT record: our payload size and the
/// request's DO bit. Request options are not echoed.
pub fn echo_edns(request: &Message, response: &mut Message) {
    if let Some(request_edns) = request.extensions() {
        let mut edns = Edns::new();
        edns.set_max_payload(EDNS_PAYLOAD);
        edns.set_version(0);
        edns.set_dnssec_ok(request_edns.flags().dnssec_ok);
        response.set_edns(edns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{OpCode, Query};
    use hickory_proto::rr::rdata::opt::{EdnsCode, EdnsOption};
    use hickory_proto::rr::{Name, RecordType};

    fn request() -> Message {
        let mut msg = Message::new();
        msg.set_id(4321);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(
            Name::from_ascii("www.example.").unwrap(),
            RecordType::A,
        ));
        msg
    }

    #[test]
    fn test_reply_to_copies_header_and_question() {
        let response = reply_to(&request());
        assert_eq!(response.id(), 4321);
        assert_eq!(response.message_type(), MessageType::Response);
        assert!(response.recursion_desired());
        assert_eq!(response.queries().len(), 1);
        assert_eq!(response.response_code(), ResponseCode::NoError);
    }

    #[test]
    fn test_echo_edns_only_when_present() {
        let mut response = reply_to(&request());
        echo_edns(&request(), &mut response);
        assert!(response.extensions().is_none());

        let mut with_edns = request();
        let mut edns = Edns::new();
        edns.set_max_payload(1232);
        with_edns.set_edns(edns);

        echo_edns(&with_edns, &mut response);
        let edns = response.extensions().as_ref().unwrap();
        assert_eq!(edns.max_payload(), EDNS_PAYLOAD);
        assert!(!edns.flags().dnssec_ok);
    }

    #[test]
    fn test_echo_edns_keeps_do_bit_and_drops_options() {
        let mut with_edns = request();
        let mut edns = Edns::new();
        edns.set_dnssec_ok(true);
        edns.options_mut()
            .insert(EdnsOption::Unknown(u16::from(EdnsCode::Cookie), vec![1; 8]));
        with_edns.set_edns(edns);

        let mut response = reply_to(&with_edns);
        echo_edns(&with_edns, &mut response);
        let edns = response.extensions().as_ref().unwrap();
        assert!(edns.flags().dnssec_ok);
        assert_eq!(edns.version(), 0);
        assert!(edns.option(EdnsCode::Cookie).is_none());
    }
}
