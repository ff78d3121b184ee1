use webhook_fanout::{sign, verify_signature, SIGNATURE_HEADER};

fn main() {
    let secret = "supersecret";
    let payload = br#"{"event":"order.created","timestamp":"2024-01-01T00:00:00Z","data":{"id":123}}"#;

    // What the receiver finds in the request headers.
    let headers = vec![(SIGNATURE_HEADER, sign(payload, secret))];

    let valid = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(SIGNATURE_HEADER))
        .is_some_and(|(_, value)| verify_signature(payload, secret, value));

    println!("signature valid: {valid}");
}
