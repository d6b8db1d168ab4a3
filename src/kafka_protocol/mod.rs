//! Wire-level Kafka protocol types: the request header and frame shapes
//! (spec §3/§6), response encoding, and the broker's error taxonomy.

pub mod kafka_error;
pub mod kafka_error_codes;
pub mod kafka_request_header;
pub mod kafka_request_message;
pub mod kafka_response_message;
