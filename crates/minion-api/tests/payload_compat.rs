//! Payload compatibility checks against controller-shaped documents.

use minion_api::dto::{DetectorRequest, EchoRequest, EchoResponse, PollerRequest};
use minion_api::{FromXml, ToXml};
use pretty_assertions::assert_eq;

#[test]
fn echo_request_round_trips_to_compact_response() {
    let req = EchoRequest::from_xml(r#"<echo-request id="10" message="Hi" delay="0"/>"#).unwrap();
    let resp = EchoResponse::from_request(&req);
    assert_eq!(resp.to_xml(), r#"<echo-response id="10" message="Hi"/>"#);
}

#[test]
fn attribute_lookup_ignores_key_case() {
    let req = PollerRequest::from_xml(
        r#"<poller-request class-name="c" service-name="s" address="1.1.1.1"><attribute key="Timeout" value="500"/></poller-request>"#,
    )
    .unwrap();
    assert_eq!(req.get_attribute_value_as_int("timeout", 0), 500);
    assert_eq!(req.get_attribute_value_as_int("TIMEOUT", 0), 500);
    assert_eq!(req.get_attribute_value_as_int("Timeout", 0), 500);
}

#[test]
fn timeout_units_differ_between_poller_and_detector() {
    let poll = PollerRequest::from_xml(
        r#"<poller-request><attribute key="timeout" value="1000"/></poller-request>"#,
    )
    .unwrap();
    let detect = DetectorRequest::from_xml(
        r#"<detector-request><detector-attribute key="timeout">1000</detector-attribute></detector-request>"#,
    )
    .unwrap();
    assert_eq!(poll.timeout().as_micros(), 1000);
    assert_eq!(detect.timeout().as_millis(), 1000);
}

#[test]
fn malformed_xml_is_an_error() {
    assert!(EchoRequest::from_xml("<echo-request id=").is_err());
    assert!(EchoRequest::from_xml_bytes(&[0xff, 0xfe]).is_err());
}
